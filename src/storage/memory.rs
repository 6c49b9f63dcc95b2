//! In-memory reference store

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use super::store::{
    Balance, HeaderRecord, StoreBatch, StoreError, StoreOp, SubscriptionStatus, WalletStore,
};
use crate::core::Txo;
use crate::script::Script;
use crate::token::{ContractType, Outpoint, SmartToken};

/// Serializable contents of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    next_txo_id: u64,
    next_token_id: u64,
    txos: BTreeMap<u64, Txo>,
    /// Keyed by `ref` string
    tokens: BTreeMap<String, SmartToken>,
    subscriptions: BTreeMap<String, SubscriptionStatus>,
    balances: BTreeMap<String, Balance>,
    headers: BTreeMap<u32, HeaderRecord>,
    kvp: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    by_outpoint: HashMap<(String, u32), u64>,
    #[serde(skip)]
    by_contract: HashMap<(ContractType, bool), BTreeSet<u64>>,
}

impl StoreState {
    /// Rebuild the lookup indexes (not serialized)
    pub fn rebuild_indexes(&mut self) {
        self.by_outpoint.clear();
        self.by_contract.clear();
        for (id, txo) in &self.txos {
            self.by_outpoint.insert(txo.key(), *id);
            self.by_contract
                .entry((txo.contract_type, txo.spent))
                .or_default()
                .insert(*id);
        }
    }

    pub fn txo_count(&self) -> usize {
        self.txos.len()
    }

    fn reindex_spent(&mut self, id: u64, contract_type: ContractType, was: bool, now: bool) {
        if was == now {
            return;
        }
        if let Some(set) = self.by_contract.get_mut(&(contract_type, was)) {
            set.remove(&id);
        }
        self.by_contract.entry((contract_type, now)).or_default().insert(id);
    }

    fn apply_op(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match op {
            StoreOp::InsertTxo(mut txo) => {
                if self.by_outpoint.contains_key(&txo.key()) {
                    return Ok(());
                }
                self.next_txo_id += 1;
                txo.id = self.next_txo_id;
                self.by_outpoint.insert(txo.key(), txo.id);
                self.by_contract
                    .entry((txo.contract_type, txo.spent))
                    .or_default()
                    .insert(txo.id);
                self.txos.insert(txo.id, txo);
            }
            StoreOp::MarkSpent { txid, vout } => {
                let Some(id) = self.by_outpoint.get(&(txid, vout)).copied() else {
                    return Ok(());
                };
                if let Some(txo) = self.txos.get_mut(&id) {
                    let (ct, was) = (txo.contract_type, txo.spent);
                    txo.spent = true;
                    self.reindex_spent(id, ct, was, true);
                }
            }
            StoreOp::SetHeight { txid, vout, height } => {
                let id = self
                    .by_outpoint
                    .get(&(txid.clone(), vout))
                    .copied()
                    .ok_or_else(|| StoreError::NotFound(format!("{}:{}", txid, vout)))?;
                if let Some(txo) = self.txos.get_mut(&id) {
                    txo.height = height;
                }
            }
            StoreOp::PutToken { mut token, owner } => {
                if let Some((txid, vout)) = owner {
                    let id = self.by_outpoint.get(&(txid.clone(), vout)).copied().ok_or_else(|| {
                        StoreError::InvalidData(format!("Token owner {}:{} not in store", txid, vout))
                    })?;
                    token.last_txo_id = Some(id);
                }
                let key = token.reference.to_ref();
                match self.tokens.get(&key).and_then(|t| t.id) {
                    Some(id) => token.id = Some(id),
                    None => {
                        self.next_token_id += 1;
                        token.id = Some(self.next_token_id);
                    }
                }
                self.tokens.insert(key, token);
            }
            StoreOp::MarkTokenSpent { reference } => {
                if let Some(token) = self.tokens.get_mut(&reference.to_ref()) {
                    token.spent = true;
                }
            }
            StoreOp::PutSubscription(status) => {
                self.subscriptions.insert(status.script_hash.clone(), status);
            }
            StoreOp::PutBalance(balance) => {
                self.balances.insert(balance.id.clone(), balance);
            }
            StoreOp::PutHeader(header) => {
                self.headers.insert(header.height, header);
            }
            StoreOp::MarkReorg { from_height } => {
                for header in self.headers.range_mut(from_height..).map(|(_, h)| h) {
                    header.reorg = true;
                }
            }
            StoreOp::PutKv { key, value } => {
                self.kvp.insert(key, value);
            }
        }
        Ok(())
    }
}

/// [`WalletStore`] backed by process memory
///
/// `apply` stages the batch on a copy of the state and swaps it in only if
/// every op succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(mut state: StoreState) -> Self {
        state.rebuild_indexes();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state, for persistence
    pub fn snapshot(&self) -> Result<StoreState, StoreError> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| StoreError::Poisoned)
    }

    fn read<T: Default>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(_) => {
                log::error!("Store lock poisoned");
                T::default()
            }
        }
    }
}

impl WalletStore for MemoryStore {
    fn apply(&self, batch: StoreBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut staged = state.clone();
        for op in batch.ops {
            staged.apply_op(op)?;
        }
        *state = staged;
        Ok(())
    }

    fn txo(&self, txid: &str, vout: u32) -> Option<Txo> {
        self.read(|s| {
            s.by_outpoint
                .get(&(txid.to_string(), vout))
                .and_then(|id| s.txos.get(id))
                .cloned()
        })
    }

    fn txo_by_id(&self, id: u64) -> Option<Txo> {
        self.read(|s| s.txos.get(&id).cloned())
    }

    fn unspent(&self, contract_type: ContractType) -> Vec<Txo> {
        self.read(|s| {
            s.by_contract
                .get(&(contract_type, false))
                .map(|ids| ids.iter().filter_map(|id| s.txos.get(id)).cloned().collect())
                .unwrap_or_default()
        })
    }

    fn unspent_by_script(&self, script: &Script) -> Vec<Txo> {
        self.read(|s| {
            s.txos
                .values()
                .filter(|t| !t.spent && &t.script == script)
                .cloned()
                .collect()
        })
    }

    fn token(&self, reference: &Outpoint) -> Option<SmartToken> {
        self.read(|s| s.tokens.get(&reference.to_ref()).cloned())
    }

    fn tokens(&self) -> Vec<SmartToken> {
        self.read(|s| s.tokens.values().cloned().collect())
    }

    fn subscription(&self, script_hash: &str) -> Option<SubscriptionStatus> {
        self.read(|s| s.subscriptions.get(script_hash).cloned())
    }

    fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        self.read(|s| s.subscriptions.values().cloned().collect())
    }

    fn balance(&self, id: &str) -> Option<Balance> {
        self.read(|s| s.balances.get(id).cloned())
    }

    fn header_tip(&self) -> Option<HeaderRecord> {
        self.read(|s| s.headers.values().rev().find(|h| !h.reorg).cloned())
    }

    fn header_at(&self, height: u32) -> Option<HeaderRecord> {
        self.read(|s| s.headers.get(&height).cloned())
    }

    fn kv(&self, key: &str) -> Option<serde_json::Value> {
        self.read(|s| s.kvp.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Utxo;

    fn txo(n: u8, vout: u32, ct: ContractType) -> Txo {
        let utxo = Utxo::new(format!("{:02x}", n).repeat(32), vout, Script::from_bytes(vec![n]), 1_000);
        Txo::new(utxo, None, ct)
    }

    fn token(n: u8) -> SmartToken {
        let mut payload = crate::token::TokenPayload::default();
        payload
            .meta
            .insert("name".into(), ciborium::Value::Text(format!("token {}", n)));
        SmartToken::from_payload(
            Outpoint::from_bytes([n; 36]),
            crate::token::Operation::Nft,
            &payload,
            None,
            None,
        )
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch.insert_txo(txo(1, 0, ContractType::Rxd));
        store.apply(batch.clone()).unwrap();
        store.apply(batch).unwrap();
        assert_eq!(store.unspent(ContractType::Rxd).len(), 1);
        assert_eq!(store.txo(&"01".repeat(32), 0).unwrap().id, 1);
    }

    #[test]
    fn test_spent_index() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch
            .insert_txo(txo(1, 0, ContractType::Rxd))
            .insert_txo(txo(2, 0, ContractType::Rxd))
            .insert_txo(txo(3, 0, ContractType::Nft));
        store.apply(batch).unwrap();

        let mut spend = StoreBatch::new();
        spend.mark_spent(&"01".repeat(32), 0);
        store.apply(spend).unwrap();

        let unspent = store.unspent(ContractType::Rxd);
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].txid, "02".repeat(32));
        assert_eq!(store.unspent(ContractType::Nft).len(), 1);
        assert!(store.txo(&"01".repeat(32), 0).unwrap().spent);
    }

    #[test]
    fn test_token_links_to_txo_in_same_batch() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch
            .insert_txo(txo(5, 1, ContractType::Nft))
            .put_token(token(7), Some(("05".repeat(32), 1)));
        store.apply(batch).unwrap();

        let stored = store.token(&Outpoint::from_bytes([7; 36])).unwrap();
        assert_eq!(stored.last_txo_id, store.txo(&"05".repeat(32), 1).map(|t| t.id));
        assert_eq!(stored.id, Some(1));

        // upsert keeps the id
        let mut again = StoreBatch::new();
        again.put_token(token(7), None);
        store.apply(again).unwrap();
        assert_eq!(store.tokens().len(), 1);
        assert_eq!(store.tokens()[0].id, Some(1));
    }

    #[test]
    fn test_failed_batch_leaves_store_untouched() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch
            .insert_txo(txo(1, 0, ContractType::Rxd))
            .put_token(token(7), Some(("ff".repeat(32), 0)));
        assert!(matches!(store.apply(batch), Err(StoreError::InvalidData(_))));
        assert!(store.unspent(ContractType::Rxd).is_empty());
        assert!(store.tokens().is_empty());
    }

    #[test]
    fn test_header_tip_skips_reorged() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        for height in 100..105 {
            batch.push(StoreOp::PutHeader(HeaderRecord {
                hash: format!("{:064x}", height),
                height,
                buffer: String::new(),
                reorg: false,
            }));
        }
        batch.push(StoreOp::MarkReorg { from_height: 103 });
        store.apply(batch).unwrap();
        assert_eq!(store.header_tip().unwrap().height, 102);
        assert!(store.header_at(104).unwrap().reorg);
    }

    #[test]
    fn test_snapshot_restores_indexes() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch
            .insert_txo(txo(1, 0, ContractType::Ft))
            .put_kv("feeRate", serde_json::json!(10_000));
        store.apply(batch).unwrap();

        let json = serde_json::to_string(&store.snapshot().unwrap()).unwrap();
        let restored = MemoryStore::from_state(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.unspent(ContractType::Ft).len(), 1);
        assert_eq!(restored.kv("feeRate"), Some(serde_json::json!(10_000)));
    }
}
