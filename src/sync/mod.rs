//! Wallet synchronization
//!
//! Keeps the store in step with the indexer, one subscription at a time:
//! - A status gate serializing runs per (script hash, contract type)
//! - The reconciliation pipeline (diff, token discovery, bulk insert, balances)
//! - Ref resolution with author/container proof checks
//! - The consolidation-required flag
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use radiant_wallet::sync::{SyncContext, SyncEngine};
//!
//! let engine = Arc::new(SyncEngine::new(SyncContext::new(store, indexer)));
//! let reports = engine.sync_all(&wallet.subscriptions()?).await?;
//! println!("{} outputs added", reports.iter().map(|r| r.added).sum::<usize>());
//! ```

pub mod consolidation;
pub mod engine;
pub mod gate;
pub mod resolve;

use thiserror::Error;

use crate::core::TransactionError;
use crate::network::IndexerError;
use crate::storage::StoreError;

pub use consolidation::{check_consolidation, consolidation_required, ConsolidationNeed};
pub use engine::{
    diff_unspent, SyncContext, SyncEngine, SyncReport, SyncSession, UnspentDiff,
    DEFAULT_CONSOLIDATION_THRESHOLD, DEFAULT_INSERT_CHUNK_SIZE,
};
pub use gate::{spawn_subscription, GateAction, GateState, Reconciler, Status, StatusGate, SubscriptionHandle};
pub use resolve::Resolver;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    /// The indexer listed an output its transaction does not have
    #[error("Output {0} not found in its transaction")]
    MissingOutput(String),
    #[error("No subscription for {0}")]
    UnknownSubscription(String),
}
