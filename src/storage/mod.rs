//! Wallet storage
//!
//! - The [`WalletStore`] trait and its atomic batches
//! - An in-memory reference implementation
//! - JSON snapshot persistence

pub mod memory;
pub mod persistence;
pub mod store;

pub use memory::{MemoryStore, StoreState};
pub use persistence::{load_json, save_json, SnapshotConfig, SnapshotStorage};
pub use store::{
    keys, Balance, HeaderRecord, StoreBatch, StoreError, StoreOp, SubscriptionStatus,
    SyncProgress, WalletStore,
};
