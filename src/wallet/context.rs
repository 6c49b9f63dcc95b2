//! Shared context for wallet operations

use crate::core::{Txo, Utxo};
use crate::network::{ChainIndexer, IndexerError};
use crate::script::{ScriptTemplate, Script};
use crate::storage::{StoreBatch, StoreError, WalletStore};
use crate::token::ContractType;

use super::builder::SignedTransaction;
use super::coin_select::{SelectInput, SelectionParams};
use super::wallet::Wallet;

/// Everything a send, mint or swap needs, passed explicitly
pub struct WalletContext<'a> {
    pub wallet: &'a Wallet,
    pub store: &'a dyn WalletStore,
    pub indexer: &'a dyn ChainIndexer,
    pub params: SelectionParams,
}

impl<'a> WalletContext<'a> {
    pub fn new(
        wallet: &'a Wallet,
        store: &'a dyn WalletStore,
        indexer: &'a dyn ChainIndexer,
        params: SelectionParams,
    ) -> Self {
        Self {
            wallet,
            store,
            indexer,
            params,
        }
    }

    /// Spendable coins of the main address
    pub fn rxd_inputs(&self) -> Vec<SelectInput> {
        let address = self.wallet.address();
        self.store
            .unspent(ContractType::Rxd)
            .into_iter()
            .filter(|t| {
                matches!(ScriptTemplate::match_script(&t.script),
                    ScriptTemplate::P2pkh { address: a } if a == address)
            })
            .map(|t| SelectInput::p2pkh(t.to_utxo()))
            .collect()
    }

    /// Contract type of an output we should record for ourselves
    ///
    /// Token outputs are recorded only when the token is already known;
    /// unknown tokens are left for sync to decode.
    pub fn owned_contract_type(&self, script: &Script) -> Option<ContractType> {
        let template = ScriptTemplate::match_script(script);
        let owner = match &template {
            ScriptTemplate::P2pkh { address } => address,
            ScriptTemplate::Nft { address, .. } | ScriptTemplate::Ft { address, .. } => address,
            _ => return None,
        };
        if !self.wallet.is_own_address(owner) {
            return None;
        }
        match template.contract_type()? {
            ContractType::Rxd => Some(ContractType::Rxd),
            ct => {
                let reference = template.token_ref()?.reverse();
                self.store.token(&reference).map(|_| ct)
            }
        }
    }

    /// Ops marking `spent` and inserting our outputs of `signed` as change
    pub fn record_batch(&self, signed: &SignedTransaction, spent: &[Utxo]) -> StoreBatch {
        self.record_batch_reserving(signed, spent, &[])
    }

    /// Like [`record_batch`](Self::record_batch), skipping the `reserved` outputs
    ///
    /// Reserved outputs belong to a pending multi-step flow and must not be
    /// picked up by coin selection.
    pub fn record_batch_reserving(
        &self,
        signed: &SignedTransaction,
        spent: &[Utxo],
        reserved: &[u32],
    ) -> StoreBatch {
        let mut batch = StoreBatch::new();
        for utxo in spent {
            batch.mark_spent(&utxo.txid, utxo.vout);
        }
        for (vout, output) in signed.tx.outputs.iter().enumerate() {
            if reserved.contains(&(vout as u32)) {
                continue;
            }
            if let Some(ct) = self.owned_contract_type(&output.script) {
                let utxo = Utxo::new(signed.txid.clone(), vout as u32, output.script.clone(), output.value);
                let mut txo = Txo::new(utxo, None, ct);
                txo.change = true;
                batch.insert_txo(txo);
            }
        }
        batch
    }

    /// Broadcast, then record the result in one atomic batch
    ///
    /// Nothing is written when the broadcast fails.
    pub async fn broadcast<E>(
        &self,
        signed: &SignedTransaction,
        spent: &[Utxo],
        extra: StoreBatch,
    ) -> Result<String, E>
    where
        E: From<IndexerError> + From<StoreError>,
    {
        self.broadcast_reserving(signed, spent, &[], extra).await
    }

    /// Broadcast without recording the `reserved` outputs as spendable
    pub async fn broadcast_reserving<E>(
        &self,
        signed: &SignedTransaction,
        spent: &[Utxo],
        reserved: &[u32],
        extra: StoreBatch,
    ) -> Result<String, E>
    where
        E: From<IndexerError> + From<StoreError>,
    {
        let txid = self.indexer.broadcast(&signed.hex).await?;
        if txid != signed.txid {
            log::warn!("Indexer reported txid {} for {}", txid, signed.txid);
        }
        let mut batch = self.record_batch_reserving(signed, spent, reserved);
        batch.extend(extra);
        self.store.apply(batch)?;
        log::info!("Broadcast {} (fee {})", signed.txid, signed.fee);
        Ok(signed.txid.clone())
    }
}
