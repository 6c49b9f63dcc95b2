//! Per-subscription serialization
//!
//! Each (script hash, contract type) subscription is driven by one task.
//! While a reconciliation runs, incoming statuses collapse into a single
//! pending slot holding only the latest; a status equal to the last one
//! processed is dropped and clears the pending slot.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::wallet::Subscription;

use super::SyncError;

/// Opaque indexer status; `None` for a script hash with no outputs
pub type Status = Option<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Processing,
}

/// What to do with a status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    Run(Status),
    Buffered,
    Dropped,
    Idle,
}

#[derive(Debug, Default)]
pub struct StatusGate {
    state: GateState,
    pending: Option<Status>,
    last: Option<Status>,
}

impl StatusGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Accept a status notification
    pub fn offer(&mut self, status: Status) -> GateAction {
        if self.last.as_ref() == Some(&status) {
            // back to the in-flight status, so anything buffered is stale
            self.pending = None;
            return GateAction::Dropped;
        }
        match self.state {
            GateState::Idle => {
                self.state = GateState::Processing;
                self.last = Some(status.clone());
                GateAction::Run(status)
            }
            GateState::Processing => {
                self.pending = Some(status);
                GateAction::Buffered
            }
        }
    }

    /// The in-flight run ended; returns the follow-up run, if any
    ///
    /// A failed run forgets its status so the same status can retry it.
    pub fn finish(&mut self, success: bool) -> GateAction {
        if !success {
            self.last = None;
        }
        match self.pending.take() {
            Some(status) if self.last.as_ref() != Some(&status) => {
                self.last = Some(status.clone());
                GateAction::Run(status)
            }
            _ => {
                self.state = GateState::Idle;
                GateAction::Idle
            }
        }
    }
}

/// Runs the reconciliation of one subscription
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn reconcile(&self, subscription: &Subscription, status: Status) -> Result<(), SyncError>;
}

/// Mailbox of a subscription task
pub struct SubscriptionHandle {
    pub subscription: Subscription,
    sender: mpsc::UnboundedSender<Status>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Queue a status; false once the task has stopped
    pub fn notify(&self, status: Status) -> bool {
        self.sender.send(status).is_ok()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }

    /// Close the mailbox and wait for the in-flight run to end
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            log::warn!("Subscription task ended abnormally: {}", e);
        }
    }
}

/// Start the task serializing reconciliations of `subscription`
pub fn spawn_subscription<R: Reconciler>(reconciler: Arc<R>, subscription: Subscription) -> SubscriptionHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(reconciler, subscription.clone(), receiver));
    SubscriptionHandle {
        subscription,
        sender,
        task,
    }
}

async fn run<R: Reconciler>(
    reconciler: Arc<R>,
    subscription: Subscription,
    mut receiver: mpsc::UnboundedReceiver<Status>,
) {
    let mut gate = StatusGate::new();
    while let Some(status) = receiver.recv().await {
        let mut action = gate.offer(status);
        while let GateAction::Run(status) = action {
            let result = reconciler.reconcile(&subscription, status).await;
            if let Err(e) = &result {
                log::warn!(
                    "Sync of {} {} failed: {}",
                    subscription.contract_type.as_str(),
                    subscription.script_hash,
                    e
                );
            }
            while let Ok(next) = receiver.try_recv() {
                gate.offer(next);
            }
            action = gate.finish(result.is_ok());
        }
    }
    log::debug!("Subscription task for {} stopped", subscription.script_hash);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::ContractType;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn status(s: &str) -> Status {
        Some(s.to_string())
    }

    #[test]
    fn test_mid_flight_statuses_collapse() {
        let mut gate = StatusGate::new();
        assert_eq!(gate.offer(status("a")), GateAction::Run(status("a")));
        assert_eq!(gate.offer(status("b")), GateAction::Buffered);
        assert_eq!(gate.offer(status("c")), GateAction::Buffered);
        assert_eq!(gate.finish(true), GateAction::Run(status("c")));
        assert_eq!(gate.finish(true), GateAction::Idle);
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut gate = StatusGate::new();
        gate.offer(status("a"));
        assert_eq!(gate.offer(status("a")), GateAction::Dropped);
        assert_eq!(gate.finish(true), GateAction::Idle);
        assert_eq!(gate.offer(status("a")), GateAction::Dropped);
        assert_eq!(gate.offer(None), GateAction::Run(None));
    }

    #[test]
    fn test_return_to_in_flight_status_clears_pending() {
        let mut gate = StatusGate::new();
        gate.offer(status("a"));
        assert_eq!(gate.offer(status("b")), GateAction::Buffered);
        assert_eq!(gate.offer(status("a")), GateAction::Dropped);
        assert_eq!(gate.finish(true), GateAction::Idle);
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_failed_run_can_retry() {
        let mut gate = StatusGate::new();
        gate.offer(status("a"));
        gate.finish(false);
        assert_eq!(gate.offer(status("a")), GateAction::Run(status("a")));
    }

    /// Blocks the first run until released and records every run
    struct Recorder {
        runs: Mutex<Vec<Status>>,
        started: mpsc::UnboundedSender<()>,
        release: Notify,
    }

    #[async_trait]
    impl Reconciler for Recorder {
        async fn reconcile(&self, _: &Subscription, status: Status) -> Result<(), SyncError> {
            let first = {
                let mut runs = self.runs.lock().unwrap();
                runs.push(status);
                runs.len() == 1
            };
            let _ = self.started.send(());
            if first {
                self.release.notified().await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_two_statuses_mid_flight_give_one_extra_run() {
        let (started, mut started_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            runs: Mutex::new(Vec::new()),
            started,
            release: Notify::new(),
        });
        let subscription = Subscription {
            script_hash: "aa".into(),
            contract_type: ContractType::Rxd,
        };
        let handle = spawn_subscription(recorder.clone(), subscription);

        handle.notify(status("s1"));
        started_rx.recv().await.unwrap();
        handle.notify(status("s2"));
        handle.notify(status("s3"));
        recorder.release.notify_one();

        started_rx.recv().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(100), started_rx.recv())
            .await
            .is_err());
        assert_eq!(*recorder.runs.lock().unwrap(), vec![status("s1"), status("s3")]);
        handle.close().await;
    }
}
