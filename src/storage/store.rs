//! Wallet store interface
//!
//! The store holds wallet outputs, token records, subscription cursors,
//! balances, headers and small key/value state. Every multi-record mutation
//! goes through [`WalletStore::apply`] with a [`StoreBatch`], which is applied
//! atomically: readers see either none or all of a batch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Txo;
use crate::script::Script;
use crate::token::{ContractType, Outpoint, SmartToken};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Progress of one subscription's sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub done: bool,
    pub num_synced: usize,
    pub num_total: usize,
    pub error: bool,
}

/// Per script hash sync cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub script_hash: String,
    /// Opaque indexer status, changes iff the unspent set changes
    pub status: Option<String>,
    pub contract_type: ContractType,
    pub sync: SyncProgress,
}

impl SubscriptionStatus {
    pub fn new(script_hash: impl Into<String>, contract_type: ContractType) -> Self {
        Self {
            script_hash: script_hash.into(),
            status: None,
            contract_type,
            sync: SyncProgress::default(),
        }
    }
}

/// Confirmed and unconfirmed totals for RXD or one token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// `"RXD"` or a token ref
    pub id: String,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed + self.unconfirmed
    }
}

/// Stored block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub hash: String,
    pub height: u32,
    /// 80-byte raw header, hex
    pub buffer: String,
    pub reorg: bool,
}

/// One mutation inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert unless `(txid, vout)` already exists
    InsertTxo(Txo),
    MarkSpent { txid: String, vout: u32 },
    SetHeight { txid: String, vout: u32, height: Option<u32> },
    /// Upsert by ref; `owner` links the token to a txo, which may be inserted in the same batch
    PutToken {
        token: SmartToken,
        owner: Option<(String, u32)>,
    },
    MarkTokenSpent { reference: Outpoint },
    PutSubscription(SubscriptionStatus),
    PutBalance(Balance),
    PutHeader(HeaderRecord),
    /// Mark every header at or above `from_height` as reorged
    MarkReorg { from_height: u32 },
    PutKv { key: String, value: serde_json::Value },
}

/// An ordered list of mutations applied atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreBatch {
    pub ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(&mut self, op: StoreOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn insert_txo(&mut self, txo: Txo) -> &mut Self {
        self.push(StoreOp::InsertTxo(txo))
    }

    pub fn mark_spent(&mut self, txid: &str, vout: u32) -> &mut Self {
        self.push(StoreOp::MarkSpent {
            txid: txid.to_string(),
            vout,
        })
    }

    pub fn set_height(&mut self, txid: &str, vout: u32, height: Option<u32>) -> &mut Self {
        self.push(StoreOp::SetHeight {
            txid: txid.to_string(),
            vout,
            height,
        })
    }

    pub fn put_token(&mut self, token: SmartToken, owner: Option<(String, u32)>) -> &mut Self {
        self.push(StoreOp::PutToken { token, owner })
    }

    pub fn put_subscription(&mut self, status: SubscriptionStatus) -> &mut Self {
        self.push(StoreOp::PutSubscription(status))
    }

    pub fn put_balance(&mut self, balance: Balance) -> &mut Self {
        self.push(StoreOp::PutBalance(balance))
    }

    pub fn put_kv(&mut self, key: &str, value: serde_json::Value) -> &mut Self {
        self.push(StoreOp::PutKv {
            key: key.to_string(),
            value,
        })
    }

    pub fn extend(&mut self, other: StoreBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }
}

/// Well-known keys of the key/value table
pub mod keys {
    pub const SERVERS: &str = "servers";
    pub const CONSOLIDATION_REQUIRED: &str = "consolidationRequired";
    pub const FEE_RATE: &str = "feeRate";
    pub const LAST_NOTIFICATION: &str = "lastNotification";
}

/// Shared wallet store
pub trait WalletStore: Send + Sync {
    /// Apply a batch atomically
    fn apply(&self, batch: StoreBatch) -> Result<(), StoreError>;

    fn txo(&self, txid: &str, vout: u32) -> Option<Txo>;
    fn txo_by_id(&self, id: u64) -> Option<Txo>;
    /// Unspent outputs of a contract type, in insertion order
    fn unspent(&self, contract_type: ContractType) -> Vec<Txo>;
    /// Unspent outputs locked by exactly `script`
    fn unspent_by_script(&self, script: &Script) -> Vec<Txo>;

    /// Token by display-orientation ref
    fn token(&self, reference: &Outpoint) -> Option<SmartToken>;
    fn tokens(&self) -> Vec<SmartToken>;

    fn subscription(&self, script_hash: &str) -> Option<SubscriptionStatus>;
    fn subscriptions(&self) -> Vec<SubscriptionStatus>;

    fn balance(&self, id: &str) -> Option<Balance>;

    /// Highest header not marked reorged
    fn header_tip(&self) -> Option<HeaderRecord>;
    fn header_at(&self, height: u32) -> Option<HeaderRecord>;

    fn kv(&self, key: &str) -> Option<serde_json::Value>;
}
