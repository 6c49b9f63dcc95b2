//! Electrum JSON-RPC client over WebSocket
//!
//! Requests are correlated with responses by id. Subscription updates are
//! forwarded on an unbounded channel together with a final
//! [`Notification::Disconnected`] when the socket closes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::indexer::{
    ChainIndexer, ChainSubscriber, HeaderNotification, HeadersResponse, IndexerError, Notification,
    RefLocation, UnspentEntry,
};

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, IndexerError>>>>>;

/// A decoded inbound frame
#[derive(Debug, PartialEq)]
enum Incoming {
    Response {
        id: u64,
        result: Result<Value, IndexerError>,
    },
    Notification(Notification),
}

fn parse_incoming(text: &str) -> Result<Incoming, IndexerError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| IndexerError::InvalidResponse(e.to_string()))?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error").filter(|e| !e.is_null()) {
            Some(error) => Err(IndexerError::Server {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, result });
    }

    let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = value.get("params").and_then(Value::as_array);
    match (method, params.map(Vec::as_slice)) {
        ("blockchain.scripthash.subscribe", Some([hash, status, ..])) => {
            Ok(Incoming::Notification(Notification::ScriptHash {
                script_hash: hash.as_str().unwrap_or_default().to_string(),
                status: status.as_str().map(str::to_string),
            }))
        }
        ("blockchain.headers.subscribe", Some([header, ..])) => {
            let header: HeaderNotification = serde_json::from_value(header.clone())
                .map_err(|e| IndexerError::InvalidResponse(e.to_string()))?;
            Ok(Incoming::Notification(Notification::Header(header)))
        }
        _ => Err(IndexerError::InvalidResponse(format!("unexpected message: {}", text))),
    }
}

/// Connected Electrum session
pub struct ElectrumClient {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ElectrumClient {
    /// Open a WebSocket session
    ///
    /// Returns the client and the receiver for subscription updates.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), IndexerError> {
        log::info!("Connecting to {}", url);
        let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| IndexerError::Timeout)?
            .map_err(|e| IndexerError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let server = url.to_string();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => match parse_incoming(text.as_str()) {
                        Ok(Incoming::Response { id, result }) => {
                            if let Some(reply) = reader_pending.lock().await.remove(&id) {
                                let _ = reply.send(result);
                            }
                        }
                        Ok(Incoming::Notification(n)) => {
                            if notify_tx.send(n).is_err() {
                                break "notification receiver dropped".to_string();
                            }
                        }
                        Err(e) => log::warn!("{}: {}", server, e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_else(|| "closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };
            log::info!("Disconnected from {}: {}", server, reason);
            for (_, reply) in reader_pending.lock().await.drain() {
                let _ = reply.send(Err(IndexerError::Closed));
            }
            let _ = notify_tx.send(Notification::Disconnected { reason });
        });

        let client = Self {
            url: url.to_string(),
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: REQUEST_TIMEOUT,
            reader,
            writer,
        };
        Ok((client, notify_rx))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() || self.outgoing.is_closed()
    }

    /// Send one JSON-RPC request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();
        self.pending.lock().await.insert(id, reply);

        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        log::debug!("-> {} {}", method, id);
        if self.outgoing.send(Message::text(body.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(IndexerError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IndexerError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(IndexerError::Timeout)
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, IndexerError> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result).map_err(|e| IndexerError::InvalidResponse(e.to_string()))
    }

    pub async fn ping(&self) -> Result<(), IndexerError> {
        self.request("server.ping", json!([])).await.map(|_| ())
    }
}

impl Drop for ElectrumClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl ChainIndexer for ElectrumClient {
    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentEntry>, IndexerError> {
        self.call("blockchain.scripthash.listunspent", json!([script_hash]))
            .await
    }

    async fn get_transaction(&self, txid: &str) -> Result<String, IndexerError> {
        self.call("blockchain.transaction.get", json!([txid])).await
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, IndexerError> {
        match self
            .call("blockchain.transaction.broadcast", json!([raw_hex]))
            .await
        {
            Err(IndexerError::Server { message, .. }) => Err(IndexerError::BroadcastRejected(message)),
            other => other,
        }
    }

    async fn get_ref(&self, reference: &str) -> Result<Vec<RefLocation>, IndexerError> {
        self.call("blockchain.ref.get", json!([reference])).await
    }

    async fn block_headers(&self, start_height: u32, count: u32) -> Result<HeadersResponse, IndexerError> {
        self.call("blockchain.block.headers", json!([start_height, count]))
            .await
    }
}

#[async_trait]
impl ChainSubscriber for ElectrumClient {
    async fn subscribe_script_hash(&self, script_hash: &str) -> Result<Option<String>, IndexerError> {
        self.call("blockchain.scripthash.subscribe", json!([script_hash]))
            .await
    }

    async fn subscribe_headers(&self) -> Result<HeaderNotification, IndexerError> {
        self.call("blockchain.headers.subscribe", json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let incoming = parse_incoming(r#"{"jsonrpc":"2.0","id":7,"result":["a"]}"#).unwrap();
        assert_eq!(
            incoming,
            Incoming::Response {
                id: 7,
                result: Ok(json!(["a"]))
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let incoming = parse_incoming(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":1,"message":"missing inputs"}}"#,
        )
        .unwrap();
        assert_eq!(
            incoming,
            Incoming::Response {
                id: 3,
                result: Err(IndexerError::Server {
                    code: 1,
                    message: "missing inputs".into()
                })
            }
        );
    }

    #[test]
    fn test_parse_notifications() {
        let status = parse_incoming(
            r#"{"jsonrpc":"2.0","method":"blockchain.scripthash.subscribe","params":["ab","cd"]}"#,
        )
        .unwrap();
        assert_eq!(
            status,
            Incoming::Notification(Notification::ScriptHash {
                script_hash: "ab".into(),
                status: Some("cd".into())
            })
        );

        let cleared = parse_incoming(
            r#"{"method":"blockchain.scripthash.subscribe","params":["ab",null]}"#,
        )
        .unwrap();
        assert!(matches!(
            cleared,
            Incoming::Notification(Notification::ScriptHash { status: None, .. })
        ));

        let header = parse_incoming(
            r#"{"method":"blockchain.headers.subscribe","params":[{"height":5,"hex":"00"}]}"#,
        )
        .unwrap();
        assert_eq!(
            header,
            Incoming::Notification(Notification::Header(HeaderNotification {
                height: 5,
                hex: "00".into()
            }))
        );

        assert!(parse_incoming("not json").is_err());
        assert!(parse_incoming(r#"{"method":"unknown","params":[]}"#).is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = ElectrumClient::connect("ws://127.0.0.1:1", Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(IndexerError::ConnectionFailed(_)) | Err(IndexerError::Timeout)
        ));
    }
}
