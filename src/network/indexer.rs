//! Chain indexer capability
//!
//! The wallet consumes an Electrum-style indexer through [`ChainIndexer`].
//! Implementations: [`crate::network::ElectrumClient`] over a WebSocket and
//! [`crate::network::MockIndexer`] for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection closed")]
    Closed,
    #[error("Request timed out")]
    Timeout,
    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A ref carried by an unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentRef {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One entry of `blockchain.scripthash.listunspent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    pub tx_hash: String,
    pub tx_pos: u32,
    /// `0` or negative while in the mempool
    pub height: i64,
    pub value: u64,
    #[serde(default)]
    pub refs: Vec<UnspentRef>,
}

impl UnspentEntry {
    pub fn confirmed_height(&self) -> Option<u32> {
        u32::try_from(self.height).ok().filter(|h| *h > 0)
    }

    pub fn key(&self) -> (String, u32) {
        (self.tx_hash.clone(), self.tx_pos)
    }
}

/// One entry of `blockchain.ref.get`; the first is the mint location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefLocation {
    pub tx_hash: String,
    pub height: i64,
}

/// Response of `blockchain.block.headers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersResponse {
    /// Concatenated 80-byte headers
    pub hex: String,
    pub count: u32,
    pub max: u32,
}

/// Payload of `blockchain.headers.subscribe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    pub height: u32,
    pub hex: String,
}

/// Read/broadcast access to the chain
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentEntry>, IndexerError>;

    /// Raw transaction hex
    async fn get_transaction(&self, txid: &str) -> Result<String, IndexerError>;

    /// Returns the txid reported by the server
    async fn broadcast(&self, raw_hex: &str) -> Result<String, IndexerError>;

    /// Locations of a ref, keyed by its display-orientation `ref` string
    async fn get_ref(&self, reference: &str) -> Result<Vec<RefLocation>, IndexerError>;

    async fn block_headers(&self, start_height: u32, count: u32) -> Result<HeadersResponse, IndexerError>;
}

/// Push notifications on top of [`ChainIndexer`]
///
/// Updates arrive on the channel handed out when the session was opened.
#[async_trait]
pub trait ChainSubscriber: ChainIndexer {
    /// Subscribe and return the current status
    async fn subscribe_script_hash(&self, script_hash: &str) -> Result<Option<String>, IndexerError>;

    /// Subscribe and return the current tip
    async fn subscribe_headers(&self) -> Result<HeaderNotification, IndexerError>;
}

/// Pushed by a subscribed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ScriptHash {
        script_hash: String,
        status: Option<String>,
    },
    Header(HeaderNotification),
    /// The connection ended without being asked to
    Disconnected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspent_entry_json() {
        let json = r#"{"tx_hash":"ab","tx_pos":1,"height":0,"value":546,
            "refs":[{"ref":"cd","type":"single"}]}"#;
        let entry: UnspentEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.confirmed_height(), None);
        assert_eq!(entry.refs[0].reference, "cd");
        assert_eq!(entry.key(), ("ab".to_string(), 1));

        let confirmed: UnspentEntry =
            serde_json::from_str(r#"{"tx_hash":"ab","tx_pos":0,"height":812,"value":1}"#).unwrap();
        assert_eq!(confirmed.confirmed_height(), Some(812));
        assert!(confirmed.refs.is_empty());
    }
}
