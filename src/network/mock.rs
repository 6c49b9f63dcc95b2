//! In-memory indexer
//!
//! Keeps a tiny chain: accepted transactions, the unspent set indexed by
//! script hash (both exact and ref-agnostic), ref mint locations and headers.
//! Broadcasts are checked against the unspent set so double spends fail the
//! way a real node would reject them.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::indexer::{
    ChainIndexer, ChainSubscriber, HeaderNotification, HeadersResponse, IndexerError, RefLocation,
    UnspentEntry,
};
use crate::core::{Transaction, TxInput, TxOutput, Utxo};
use crate::crypto::sha256_hex;
use crate::script::{script_hash, zero_ref_script_hash, Script};

#[derive(Debug, Clone)]
struct MockOutput {
    txid: String,
    vout: u32,
    value: u64,
    script: Script,
    height: i64,
}

#[derive(Debug, Default)]
struct MockChain {
    transactions: HashMap<String, String>,
    heights: HashMap<String, i64>,
    unspent: BTreeMap<(String, u32), MockOutput>,
    spent: HashSet<(String, u32)>,
    refs: HashMap<String, Vec<RefLocation>>,
    headers: BTreeMap<u32, String>,
    tip: i64,
    coinbase_nonce: u32,
}

impl MockChain {
    fn accept(&mut self, tx: &Transaction, hex: String) -> Result<String, IndexerError> {
        let txid = tx.txid().map_err(|e| IndexerError::InvalidResponse(e.to_string()))?;
        let spends: Vec<(String, u32)> = tx
            .inputs
            .iter()
            .filter(|i| i.prev_vout != u32::MAX)
            .map(|i| (i.prev_txid.clone(), i.prev_vout))
            .collect();
        if let Some(key) = spends.iter().find(|k| !self.unspent.contains_key(*k)) {
            let reason = if self.spent.contains(key) { "spent" } else { "missing" };
            return Err(IndexerError::BroadcastRejected(format!(
                "{} input {}:{}",
                reason, key.0, key.1
            )));
        }
        for key in spends {
            self.unspent.remove(&key);
            self.spent.insert(key);
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            let vout = vout as u32;
            self.unspent.insert(
                (txid.clone(), vout),
                MockOutput {
                    txid: txid.clone(),
                    vout,
                    value: output.value,
                    script: output.script.clone(),
                    height: 0,
                },
            );
            for reference in output.script.push_refs() {
                let locations = self.refs.entry(reference.reverse().to_ref()).or_default();
                if locations.last().map(|l| &l.tx_hash) != Some(&txid) {
                    locations.push(RefLocation {
                        tx_hash: txid.clone(),
                        height: 0,
                    });
                }
            }
        }
        self.heights.insert(txid.clone(), 0);
        self.transactions.insert(txid.clone(), hex);
        Ok(txid)
    }

    fn entries(&self, hash: &str) -> Vec<UnspentEntry> {
        self.unspent
            .values()
            .filter(|o| script_hash(&o.script) == hash || zero_ref_script_hash(&o.script) == hash)
            .map(|o| UnspentEntry {
                tx_hash: o.txid.clone(),
                tx_pos: o.vout,
                height: o.height,
                value: o.value,
                refs: Vec::new(),
            })
            .collect()
    }
}

/// [`ChainIndexer`] over an in-memory chain
#[derive(Debug, Default)]
pub struct MockIndexer {
    chain: Mutex<MockChain>,
    fail_broadcasts: AtomicUsize,
    broadcasts: AtomicUsize,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_chain<T>(&self, f: impl FnOnce(&mut MockChain) -> T) -> Result<T, IndexerError> {
        let mut chain = self
            .chain
            .lock()
            .map_err(|_| IndexerError::ConnectionFailed("mock chain poisoned".into()))?;
        Ok(f(&mut chain))
    }

    /// Create a coin out of thin air, returned as a spendable utxo
    pub fn fund(&self, script: &Script, value: u64) -> Result<Utxo, IndexerError> {
        self.with_chain(|chain| {
            chain.coinbase_nonce += 1;
            let mut input = TxInput::new("00".repeat(32), u32::MAX);
            input.script_sig = Script::new().push(&chain.coinbase_nonce.to_le_bytes());
            let tx = Transaction::new(vec![input], vec![TxOutput::new(value, script.clone())]);
            let hex = tx
                .to_hex()
                .map_err(|e| IndexerError::InvalidResponse(e.to_string()))?;
            let txid = chain.accept(&tx, hex)?;
            Ok(Utxo::new(txid, 0, script.clone(), value))
        })?
    }

    /// Confirm every mempool transaction in a new block
    pub fn mine(&self) -> Result<u32, IndexerError> {
        self.with_chain(|chain| {
            chain.tip += 1;
            let tip = chain.tip;
            for output in chain.unspent.values_mut().filter(|o| o.height <= 0) {
                output.height = tip;
            }
            for height in chain.heights.values_mut().filter(|h| **h <= 0) {
                *height = tip;
            }
            for location in chain.refs.values_mut().flatten().filter(|l| l.height <= 0) {
                location.height = tip;
            }
            tip as u32
        })
    }

    /// Make the next `n` broadcasts fail
    pub fn fail_next_broadcasts(&self, n: usize) {
        self.fail_broadcasts.store(n, Ordering::SeqCst);
    }

    /// Number of accepted broadcasts
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    pub fn is_unspent(&self, txid: &str, vout: u32) -> bool {
        self.with_chain(|c| c.unspent.contains_key(&(txid.to_string(), vout)))
            .unwrap_or(false)
    }

    pub fn transaction(&self, txid: &str) -> Option<Transaction> {
        let hex = self.with_chain(|c| c.transactions.get(txid).cloned()).ok()??;
        Transaction::from_hex(&hex).ok()
    }

    /// Electrum-style status: changes whenever the unspent set for the hash changes
    pub fn status(&self, hash: &str) -> Option<String> {
        let entries = self.with_chain(|c| c.entries(hash)).ok()?;
        if entries.is_empty() {
            return None;
        }
        let summary: String = entries
            .iter()
            .map(|e| format!("{}:{}:{};", e.tx_hash, e.tx_pos, e.height))
            .collect();
        Some(sha256_hex(summary.as_bytes()))
    }

    /// Set the header at `height`, replacing any previous one
    pub fn put_header(&self, height: u32, hex: &str) -> Result<(), IndexerError> {
        self.with_chain(|c| {
            c.headers.insert(height, hex.to_string());
        })
    }
}

#[async_trait]
impl ChainIndexer for MockIndexer {
    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentEntry>, IndexerError> {
        self.with_chain(|c| c.entries(script_hash))
    }

    async fn get_transaction(&self, txid: &str) -> Result<String, IndexerError> {
        self.with_chain(|c| c.transactions.get(txid).cloned())?
            .ok_or_else(|| IndexerError::NotFound(txid.to_string()))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, IndexerError> {
        let pending_failures = self.fail_broadcasts.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_broadcasts.store(pending_failures - 1, Ordering::SeqCst);
            return Err(IndexerError::ConnectionFailed("injected failure".into()));
        }
        let tx = Transaction::from_hex(raw_hex)
            .map_err(|e| IndexerError::BroadcastRejected(e.to_string()))?;
        let txid = self.with_chain(|c| c.accept(&tx, raw_hex.to_string()))??;
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(txid)
    }

    async fn get_ref(&self, reference: &str) -> Result<Vec<RefLocation>, IndexerError> {
        self.with_chain(|c| c.refs.get(reference).cloned())?
            .ok_or_else(|| IndexerError::NotFound(reference.to_string()))
    }

    async fn block_headers(&self, start_height: u32, count: u32) -> Result<HeadersResponse, IndexerError> {
        self.with_chain(|c| {
            let headers: Vec<&String> = (start_height..start_height.saturating_add(count))
                .map_while(|h| c.headers.get(&h))
                .collect();
            HeadersResponse {
                hex: headers.iter().map(|h| h.as_str()).collect(),
                count: headers.len() as u32,
                max: 2016,
            }
        })
    }
}

#[async_trait]
impl ChainSubscriber for MockIndexer {
    async fn subscribe_script_hash(&self, script_hash: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.status(script_hash))
    }

    async fn subscribe_headers(&self) -> Result<HeaderNotification, IndexerError> {
        self.with_chain(|c| c.headers.last_key_value().map(|(h, hex)| HeaderNotification {
            height: *h,
            hex: hex.clone(),
        }))?
        .ok_or_else(|| IndexerError::NotFound("headers".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeeRate;
    use crate::crypto::KeyPair;
    use crate::script::p2pkh_script;
    use crate::wallet::TransactionBuilder;

    #[tokio::test]
    async fn test_fund_spend_and_double_spend() {
        let indexer = MockIndexer::new();
        let key = KeyPair::generate();
        let script = p2pkh_script(&key.address()).unwrap();
        let utxo = indexer.fund(&script, 50_000).unwrap();

        let hash = script_hash(&script);
        assert_eq!(indexer.list_unspent(&hash).await.unwrap().len(), 1);
        let before = indexer.status(&hash);

        let signed = TransactionBuilder::new(FeeRate(1))
            .add_input(utxo.clone())
            .add_output(TxOutput::new(10_000, script.clone()))
            .signing_key(&key)
            .change_to(&key.address())
            .unwrap()
            .build()
            .unwrap();
        let txid = indexer.broadcast(&signed.hex).await.unwrap();
        assert_eq!(txid, signed.txid);
        assert!(!indexer.is_unspent(&utxo.txid, 0));
        assert_eq!(indexer.list_unspent(&hash).await.unwrap().len(), 2);
        assert_ne!(indexer.status(&hash), before);

        let again = indexer.broadcast(&signed.hex).await;
        assert!(matches!(again, Err(IndexerError::BroadcastRejected(_))));
        assert_eq!(indexer.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_mine_confirms() {
        let indexer = MockIndexer::new();
        let script = Script::from_bytes(vec![0x51]);
        let utxo = indexer.fund(&script, 1_000).unwrap();
        assert_eq!(indexer.mine().unwrap(), 1);
        let entries = indexer.list_unspent(&script_hash(&script)).await.unwrap();
        assert_eq!(entries[0].confirmed_height(), Some(1));
        assert_eq!(
            Transaction::from_hex(&indexer.get_transaction(&utxo.txid).await.unwrap())
                .unwrap()
                .txid()
                .unwrap(),
            utxo.txid
        );
        assert!(matches!(
            indexer.get_transaction(&"ff".repeat(32)).await,
            Err(IndexerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let indexer = MockIndexer::new();
        indexer.fail_next_broadcasts(1);
        assert!(matches!(
            indexer.broadcast("00").await,
            Err(IndexerError::ConnectionFailed(_))
        ));
        assert!(matches!(
            indexer.broadcast("00").await,
            Err(IndexerError::BroadcastRejected(_))
        ));
    }
}
