//! Network worker
//!
//! One task owns the indexer session. Callers talk to it through a
//! [`NetworkHandle`]; subscription updates come out of a notification
//! channel. When a connect attempt times out or the session closes
//! unexpectedly, the worker moves to the next server in round-robin order
//! and re-subscribes everything it was subscribed to.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::electrum::ElectrumClient;
use super::indexer::{ChainIndexer, ChainSubscriber, IndexerError, Notification, RefLocation};

/// Give up on a server that has not completed the handshake by then
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("No servers configured")]
    NoServers,
    #[error("All {0} servers failed")]
    AllServersFailed(usize),
    #[error("Network worker stopped")]
    Stopped,
    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),
}

/// Round-robin server list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRotation {
    servers: Vec<String>,
    next: usize,
}

impl ServerRotation {
    pub fn new(servers: Vec<String>) -> Self {
        Self { servers, next: 0 }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Replace the list and start again from its first server
    pub fn set(&mut self, servers: Vec<String>) {
        self.servers = servers;
        self.next = 0;
    }

    pub fn next_server(&mut self) -> Option<String> {
        if self.servers.is_empty() {
            return None;
        }
        let server = self.servers[self.next % self.servers.len()].clone();
        self.next = (self.next + 1) % self.servers.len();
        Some(server)
    }
}

/// Opens indexer sessions
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: ChainSubscriber + 'static;

    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(Self::Session, mpsc::UnboundedReceiver<Notification>), IndexerError>;
}

/// Electrum over WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct ElectrumConnector;

#[async_trait]
impl Connector for ElectrumConnector {
    type Session = ElectrumClient;

    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(ElectrumClient, mpsc::UnboundedReceiver<Notification>), IndexerError> {
        ElectrumClient::connect(url, timeout).await
    }
}

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

pub enum WorkerCommand {
    /// Connect if not connected; replies with the server url
    Connect(Reply<String>),
    /// Replace the server list and reconnect
    SetServers(Vec<String>, Reply<String>),
    Broadcast(String, Reply<String>),
    GetRef(String, Reply<Vec<RefLocation>>),
    GetTransaction(String, Reply<String>),
    /// Subscribe script hashes and publish their current statuses
    SyncPending(Vec<String>, Reply<usize>),
    Shutdown,
}

/// Cloneable client side of the worker
#[derive(Clone)]
pub struct NetworkHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl NetworkHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> WorkerCommand) -> Result<T, WorkerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| WorkerError::Stopped)?;
        response.await.map_err(|_| WorkerError::Stopped)?
    }

    pub async fn connect(&self) -> Result<String, WorkerError> {
        self.request(WorkerCommand::Connect).await
    }

    pub async fn set_servers(&self, servers: Vec<String>) -> Result<String, WorkerError> {
        self.request(|reply| WorkerCommand::SetServers(servers, reply)).await
    }

    pub async fn broadcast(&self, raw_hex: &str) -> Result<String, WorkerError> {
        let raw_hex = raw_hex.to_string();
        self.request(|reply| WorkerCommand::Broadcast(raw_hex, reply)).await
    }

    pub async fn get_ref(&self, reference: &str) -> Result<Vec<RefLocation>, WorkerError> {
        let reference = reference.to_string();
        self.request(|reply| WorkerCommand::GetRef(reference, reply)).await
    }

    pub async fn get_transaction(&self, txid: &str) -> Result<String, WorkerError> {
        let txid = txid.to_string();
        self.request(|reply| WorkerCommand::GetTransaction(txid, reply)).await
    }

    pub async fn sync_pending(&self, script_hashes: Vec<String>) -> Result<usize, WorkerError> {
        self.request(|reply| WorkerCommand::SyncPending(script_hashes, reply)).await
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }
}

enum Event {
    Command(Option<WorkerCommand>),
    Notification(Option<Notification>),
}

async fn recv_notification(receiver: &mut Option<mpsc::UnboundedReceiver<Notification>>) -> Option<Notification> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

pub struct NetworkWorker<C: Connector> {
    connector: C,
    rotation: ServerRotation,
    connect_timeout: Duration,
    session: Option<(String, C::Session)>,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    subscriptions: BTreeSet<String>,
    events: mpsc::UnboundedSender<Notification>,
}

impl<C: Connector> NetworkWorker<C> {
    /// Start the worker task
    ///
    /// Returns the handle, the stream of notifications, and the task.
    pub fn spawn(
        connector: C,
        servers: Vec<String>,
        connect_timeout: Duration,
    ) -> (NetworkHandle, mpsc::UnboundedReceiver<Notification>, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let worker = Self {
            connector,
            rotation: ServerRotation::new(servers),
            connect_timeout,
            session: None,
            notifications: None,
            subscriptions: BTreeSet::new(),
            events,
        };
        let task = tokio::spawn(worker.run(command_rx));
        (NetworkHandle { commands }, event_rx, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        loop {
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                notification = recv_notification(&mut self.notifications) => Event::Notification(notification),
            };
            match event {
                Event::Command(None) | Event::Command(Some(WorkerCommand::Shutdown)) => break,
                Event::Command(Some(command)) => self.handle(command).await,
                Event::Notification(Some(Notification::Disconnected { reason })) => {
                    self.on_disconnect(reason).await;
                }
                Event::Notification(Some(notification)) => {
                    let _ = self.events.send(notification);
                }
                Event::Notification(None) => self.on_disconnect("notification channel closed".into()).await,
            }
        }
        log::info!("Network worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Connect(reply) => {
                let result = match &self.session {
                    Some((url, _)) => Ok(url.clone()),
                    None => self.connect_next().await,
                };
                let _ = reply.send(result);
            }
            WorkerCommand::SetServers(servers, reply) => {
                self.rotation.set(servers);
                self.drop_session();
                let _ = reply.send(self.connect_next().await);
            }
            WorkerCommand::Broadcast(raw_hex, reply) => {
                let result = match self.session().await {
                    Ok(session) => session.broadcast(&raw_hex).await.map_err(WorkerError::from),
                    Err(e) => Err(e),
                };
                self.check_session(&result).await;
                let _ = reply.send(result);
            }
            WorkerCommand::GetRef(reference, reply) => {
                let result = match self.session().await {
                    Ok(session) => session.get_ref(&reference).await.map_err(WorkerError::from),
                    Err(e) => Err(e),
                };
                self.check_session(&result).await;
                let _ = reply.send(result);
            }
            WorkerCommand::GetTransaction(txid, reply) => {
                let result = match self.session().await {
                    Ok(session) => session.get_transaction(&txid).await.map_err(WorkerError::from),
                    Err(e) => Err(e),
                };
                self.check_session(&result).await;
                let _ = reply.send(result);
            }
            WorkerCommand::SyncPending(script_hashes, reply) => {
                let result = match self.session().await.map(|_| ()) {
                    Ok(()) => {
                        let fresh: Vec<String> = script_hashes
                            .into_iter()
                            .filter(|h| self.subscriptions.insert(h.clone()))
                            .collect();
                        self.subscribe(&fresh).await.map(|_| fresh.len())
                    }
                    Err(e) => Err(e),
                };
                self.check_session(&result).await;
                let _ = reply.send(result);
            }
            WorkerCommand::Shutdown => {}
        }
    }

    /// The live session, connecting first if there is none
    async fn session(&mut self) -> Result<&C::Session, WorkerError> {
        if self.session.is_none() {
            self.connect_next().await?;
        }
        self.session
            .as_ref()
            .map(|(_, session)| session)
            .ok_or(WorkerError::AllServersFailed(self.rotation.len()))
    }

    /// Fail over when a request found the session closed
    async fn check_session<T>(&mut self, result: &Result<T, WorkerError>) {
        if let Err(WorkerError::Indexer(IndexerError::Closed)) = result {
            self.on_disconnect("request on closed session".into()).await;
        }
    }

    fn drop_session(&mut self) {
        self.session = None;
        self.notifications = None;
    }

    async fn on_disconnect(&mut self, reason: String) {
        let server = self.session.as_ref().map(|(url, _)| url.clone()).unwrap_or_default();
        log::warn!("Lost connection to {}: {}", server, reason);
        self.drop_session();
        let _ = self.events.send(Notification::Disconnected { reason });
        if let Err(e) = self.connect_next().await {
            log::error!("Reconnect failed: {}", e);
        }
    }

    /// Try each server once, starting after the last one used
    async fn connect_next(&mut self) -> Result<String, WorkerError> {
        if self.rotation.is_empty() {
            return Err(WorkerError::NoServers);
        }
        for _ in 0..self.rotation.len() {
            let Some(url) = self.rotation.next_server() else {
                break;
            };
            let attempt = tokio::time::timeout(
                self.connect_timeout,
                self.connector.connect(&url, self.connect_timeout),
            )
            .await;
            match attempt {
                Ok(Ok((session, notifications))) => {
                    log::info!("Connected to {}", url);
                    self.session = Some((url.clone(), session));
                    self.notifications = Some(notifications);
                    let subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
                    self.subscribe_headers().await;
                    if let Err(e) = self.subscribe(&subscriptions).await {
                        log::warn!("Resubscribe on {} failed: {}", url, e);
                    }
                    return Ok(url);
                }
                Ok(Err(e)) => log::warn!("Connect to {} failed: {}", url, e),
                Err(_) => log::warn!("Connect to {} timed out", url),
            }
        }
        Err(WorkerError::AllServersFailed(self.rotation.len()))
    }

    async fn subscribe_headers(&self) {
        let Some((_, session)) = &self.session else {
            return;
        };
        match session.subscribe_headers().await {
            Ok(tip) => {
                let _ = self.events.send(Notification::Header(tip));
            }
            Err(e) => log::debug!("Header subscription failed: {}", e),
        }
    }

    /// Subscribe and publish each current status
    async fn subscribe(&self, script_hashes: &[String]) -> Result<(), WorkerError> {
        let Some((_, session)) = &self.session else {
            return Ok(());
        };
        for script_hash in script_hashes {
            let status = session.subscribe_script_hash(script_hash).await?;
            let _ = self.events.send(Notification::ScriptHash {
                script_hash: script_hash.clone(),
                status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{HeaderNotification, HeadersResponse, MockIndexer, UnspentEntry};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Session over the shared mock chain
    struct MockSession {
        indexer: Arc<MockIndexer>,
    }

    #[async_trait]
    impl ChainIndexer for MockSession {
        async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentEntry>, IndexerError> {
            self.indexer.list_unspent(script_hash).await
        }
        async fn get_transaction(&self, txid: &str) -> Result<String, IndexerError> {
            self.indexer.get_transaction(txid).await
        }
        async fn broadcast(&self, raw_hex: &str) -> Result<String, IndexerError> {
            self.indexer.broadcast(raw_hex).await
        }
        async fn get_ref(&self, reference: &str) -> Result<Vec<RefLocation>, IndexerError> {
            self.indexer.get_ref(reference).await
        }
        async fn block_headers(&self, start: u32, count: u32) -> Result<HeadersResponse, IndexerError> {
            self.indexer.block_headers(start, count).await
        }
    }

    #[async_trait]
    impl ChainSubscriber for MockSession {
        async fn subscribe_script_hash(&self, script_hash: &str) -> Result<Option<String>, IndexerError> {
            self.indexer.subscribe_script_hash(script_hash).await
        }
        async fn subscribe_headers(&self) -> Result<HeaderNotification, IndexerError> {
            self.indexer.subscribe_headers().await
        }
    }

    #[derive(Default)]
    struct MockConnector {
        indexer: Arc<MockIndexer>,
        down: HashSet<String>,
        hanging: HashSet<String>,
        attempts: Arc<Mutex<Vec<String>>>,
        sessions: Arc<Mutex<Vec<mpsc::UnboundedSender<Notification>>>>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Session = MockSession;

        async fn connect(
            &self,
            url: &str,
            _: Duration,
        ) -> Result<(MockSession, mpsc::UnboundedReceiver<Notification>), IndexerError> {
            self.attempts.lock().unwrap().push(url.to_string());
            if self.hanging.contains(url) {
                std::future::pending::<()>().await;
            }
            if self.down.contains(url) {
                return Err(IndexerError::ConnectionFailed(url.to_string()));
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push(sender);
            Ok((
                MockSession {
                    indexer: self.indexer.clone(),
                },
                receiver,
            ))
        }
    }

    fn servers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rotation_wraps() {
        let mut rotation = ServerRotation::new(servers(&["a", "b", "c"]));
        let order: Vec<String> = (0..4).filter_map(|_| rotation.next_server()).collect();
        assert_eq!(order, servers(&["a", "b", "c", "a"]));
        rotation.set(servers(&["x"]));
        assert_eq!(rotation.next_server().as_deref(), Some("x"));
        assert_eq!(rotation.next_server().as_deref(), Some("x"));
        assert_eq!(ServerRotation::default().next_server(), None);
    }

    #[tokio::test]
    async fn test_connect_skips_failed_and_slow_servers() {
        let connector = MockConnector {
            down: ["a".to_string()].into(),
            hanging: ["b".to_string()].into(),
            ..Default::default()
        };
        let attempts = connector.attempts.clone();
        let (handle, _events, task) =
            NetworkWorker::spawn(connector, servers(&["a", "b", "c"]), Duration::from_millis(50));

        assert_eq!(handle.connect().await.unwrap(), "c");
        assert_eq!(*attempts.lock().unwrap(), servers(&["a", "b", "c"]));
        // already connected
        assert_eq!(handle.connect().await.unwrap(), "c");
        assert_eq!(attempts.lock().unwrap().len(), 3);
        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_servers() {
        let (handle, _events, _task) =
            NetworkWorker::spawn(MockConnector::default(), Vec::new(), CONNECT_TIMEOUT);
        assert_eq!(handle.connect().await, Err(WorkerError::NoServers));
        assert_eq!(handle.get_transaction("ab").await, Err(WorkerError::NoServers));

        let connector = MockConnector {
            down: ["a".to_string()].into(),
            ..Default::default()
        };
        let (handle, _events, _task) = NetworkWorker::spawn(connector, servers(&["a"]), CONNECT_TIMEOUT);
        assert_eq!(handle.connect().await, Err(WorkerError::AllServersFailed(1)));
    }

    #[tokio::test]
    async fn test_unexpected_close_fails_over_and_resubscribes() {
        let connector = MockConnector::default();
        let script = crate::wallet::Wallet::new().p2pkh_script().unwrap();
        connector.indexer.fund(&script, 1_000).unwrap();
        let hash = crate::script::script_hash(&script);
        let expected = connector.indexer.status(&hash);
        let (attempts, sessions) = (connector.attempts.clone(), connector.sessions.clone());
        let (handle, mut events, _task) =
            NetworkWorker::spawn(connector, servers(&["a", "b"]), CONNECT_TIMEOUT);

        assert_eq!(handle.sync_pending(vec![hash.clone(), hash.clone()]).await.unwrap(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            Notification::ScriptHash {
                script_hash: hash.clone(),
                status: expected.clone()
            }
        );

        let first = sessions.lock().unwrap()[0].clone();
        first
            .send(Notification::Disconnected {
                reason: "reset".into(),
            })
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), Notification::Disconnected { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            Notification::ScriptHash {
                script_hash: hash,
                status: expected
            }
        );
        assert_eq!(*attempts.lock().unwrap(), servers(&["a", "b"]));
        assert_eq!(handle.connect().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_requests_go_through_session() {
        let connector = MockConnector::default();
        let indexer = connector.indexer.clone();
        let script = crate::wallet::Wallet::new().p2pkh_script().unwrap();
        let utxo = indexer.fund(&script, 1_000).unwrap();
        let (handle, _events, _task) = NetworkWorker::spawn(connector, servers(&["a"]), CONNECT_TIMEOUT);

        let hex = handle.get_transaction(&utxo.txid).await.unwrap();
        assert_eq!(hex, indexer.get_transaction(&utxo.txid).await.unwrap());
        assert!(matches!(
            handle.get_ref(&"00".repeat(36)).await,
            Err(WorkerError::Indexer(IndexerError::NotFound(_)))
        ));
        assert!(matches!(
            handle.broadcast("00").await,
            Err(WorkerError::Indexer(IndexerError::BroadcastRejected(_)))
        ));
        assert_eq!(handle.set_servers(servers(&["z"])).await.unwrap(), "z");
    }
}
