//! Consolidation-required flag
//!
//! A read-only count over local unspent outputs. The flag is only evaluated
//! once every subscription reports a finished sync, so a half-synced wallet
//! never prompts for consolidation.

use std::collections::BTreeMap;

use serde_json::json;

use crate::storage::{keys, StoreBatch, StoreError, WalletStore};
use crate::token::ContractType;

/// Unspent counts behind the consolidation decision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationNeed {
    pub rxd: usize,
    /// Unspent count per FT locking script (hex)
    pub ft_scripts: BTreeMap<String, usize>,
    pub required: bool,
}

pub fn consolidation_required(store: &dyn WalletStore, threshold: usize) -> ConsolidationNeed {
    let rxd = store.unspent(ContractType::Rxd).len();
    let mut ft_scripts = BTreeMap::new();
    for txo in store.unspent(ContractType::Ft) {
        *ft_scripts.entry(txo.script.to_hex()).or_insert(0) += 1;
    }
    let required = rxd > threshold || ft_scripts.values().any(|count| *count > threshold);
    ConsolidationNeed {
        rxd,
        ft_scripts,
        required,
    }
}

/// Store the flag once all subscriptions are synced
///
/// Returns `None` while any subscription is still syncing.
pub fn check_consolidation(store: &dyn WalletStore, threshold: usize) -> Result<Option<bool>, StoreError> {
    let subscriptions = store.subscriptions();
    if subscriptions.is_empty() || subscriptions.iter().any(|s| !s.sync.done) {
        return Ok(None);
    }
    let need = consolidation_required(store, threshold);
    let value = json!(need.required);
    if store.kv(keys::CONSOLIDATION_REQUIRED).as_ref() != Some(&value) {
        if need.required {
            log::info!(
                "Consolidation recommended: {} RXD outputs, {} FT scripts",
                need.rxd,
                need.ft_scripts.len()
            );
        }
        let mut batch = StoreBatch::new();
        batch.put_kv(keys::CONSOLIDATION_REQUIRED, value);
        store.apply(batch)?;
    }
    Ok(Some(need.required))
}
