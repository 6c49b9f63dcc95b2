//! Reconciliation of one subscription against the indexer
//!
//! A run lists the remote unspent outputs of the subscription's script hash
//! and diffs them against local unspent records by `(txid, vout)`. New token
//! outputs have their refs resolved, claimed authors and containers are
//! fetched as metadata-only records, and everything is written in chunked
//! batches followed by one batch of spends, heights, balances and the
//! subscription status.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::core::{Transaction, Txo, Utxo};
use crate::network::{ChainIndexer, Notification, UnspentEntry};
use crate::script::{zero_ref_script_hash, ScriptTemplate};
use crate::storage::{Balance, StoreBatch, StoreOp, SubscriptionStatus, SyncProgress, WalletStore};
use crate::token::{ContractType, Outpoint, SmartToken};
use crate::wallet::Subscription;

use super::consolidation::check_consolidation;
use super::gate::{spawn_subscription, Reconciler, Status, SubscriptionHandle};
use super::resolve::Resolver;
use super::SyncError;

pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 10;

/// Collaborators and tuning of the sync engine
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn WalletStore>,
    pub indexer: Arc<dyn ChainIndexer>,
    /// Outputs written per insert batch
    pub insert_chunk_size: usize,
    pub consolidation_threshold: usize,
}

impl SyncContext {
    pub fn new(store: Arc<dyn WalletStore>, indexer: Arc<dyn ChainIndexer>) -> Self {
        Self {
            store,
            indexer,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
        }
    }

    pub fn with_insert_chunk_size(mut self, size: usize) -> Self {
        self.insert_chunk_size = size.max(1);
        self
    }

    pub fn with_consolidation_threshold(mut self, threshold: usize) -> Self {
        self.consolidation_threshold = threshold;
        self
    }
}

/// Remote vs local unspent outputs of one subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentDiff {
    /// Listed remotely, unknown locally
    pub added: Vec<UnspentEntry>,
    /// Unspent locally, no longer listed
    pub spent: Vec<Txo>,
    /// In both, with a changed height
    pub confirmed: Vec<(Txo, Option<u32>)>,
}

/// Diff `local` unspent records against the `remote` listing
///
/// An output the store already knows, even as spent, is never re-added.
pub fn diff_unspent(store: &dyn WalletStore, local: &[Txo], remote: &[UnspentEntry]) -> UnspentDiff {
    let listed: HashMap<(String, u32), &UnspentEntry> = remote.iter().map(|e| (e.key(), e)).collect();
    let mut diff = UnspentDiff::default();
    for txo in local {
        match listed.get(&txo.key()) {
            None => diff.spent.push(txo.clone()),
            Some(entry) if entry.confirmed_height() != txo.height => {
                diff.confirmed.push((txo.clone(), entry.confirmed_height()))
            }
            Some(_) => {}
        }
    }
    let mut seen = HashSet::new();
    diff.added = remote
        .iter()
        .filter(|e| seen.insert(e.key()) && store.txo(&e.tx_hash, e.tx_pos).is_none())
        .cloned()
        .collect();
    diff
}

/// Counts of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub spent: usize,
    pub confirmed: usize,
    /// Tokens discovered through wallet outputs
    pub tokens: usize,
    /// Authors and containers stored without an owning output
    pub related: usize,
    /// Token outputs left for a later run because their ref did not decode
    pub skipped: usize,
}

/// A new output and the ref it carries, if any
struct Incoming {
    txo: Txo,
    reference: Option<Outpoint>,
}

pub struct SyncEngine {
    ctx: SyncContext,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Run the pipeline once for `subscription`, recording `status` on success
    ///
    /// A failed run leaves the subscription flagged with `sync.error`.
    pub async fn sync_subscription(
        &self,
        subscription: &Subscription,
        status: Status,
    ) -> Result<SyncReport, SyncError> {
        match self.run(subscription, status).await {
            Ok(report) => {
                log::info!(
                    "Synced {} {}: +{} -{} ~{} ({} tokens, {} related)",
                    subscription.contract_type.as_str(),
                    subscription.script_hash,
                    report.added,
                    report.spent,
                    report.confirmed,
                    report.tokens,
                    report.related
                );
                if let Err(e) = check_consolidation(self.ctx.store.as_ref(), self.ctx.consolidation_threshold) {
                    log::warn!("Consolidation check failed: {}", e);
                }
                Ok(report)
            }
            Err(e) => {
                self.flag_error(subscription);
                Err(e)
            }
        }
    }

    /// Sync each subscription once, in order
    pub async fn sync_all(&self, subscriptions: &[Subscription]) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let status = self
                .ctx
                .store
                .subscription(&subscription.script_hash)
                .and_then(|s| s.status);
            reports.push(self.sync_subscription(subscription, status).await?);
        }
        Ok(reports)
    }

    fn flag_error(&self, subscription: &Subscription) {
        let store = self.ctx.store.as_ref();
        let mut record = store
            .subscription(&subscription.script_hash)
            .unwrap_or_else(|| SubscriptionStatus::new(&subscription.script_hash, subscription.contract_type));
        record.sync.error = true;
        let mut batch = StoreBatch::new();
        batch.put_subscription(record);
        if let Err(e) = store.apply(batch) {
            log::error!("Failed to flag sync error for {}: {}", subscription.script_hash, e);
        }
    }

    async fn run(&self, subscription: &Subscription, status: Status) -> Result<SyncReport, SyncError> {
        let store = self.ctx.store.as_ref();
        let contract_type = subscription.contract_type;
        let remote = self.ctx.indexer.list_unspent(&subscription.script_hash).await?;
        let local: Vec<Txo> = store
            .unspent(contract_type)
            .into_iter()
            .filter(|t| zero_ref_script_hash(&t.script) == subscription.script_hash)
            .collect();
        let diff = diff_unspent(store, &local, &remote);
        let mut report = SyncReport {
            spent: diff.spent.len(),
            confirmed: diff.confirmed.len(),
            ..Default::default()
        };

        let resolver = Resolver::new(self.ctx.indexer.as_ref());
        let transactions = fetch_transactions(&resolver, &diff.added).await?;

        // Outputs and the refs first seen in this run
        let mut incoming = Vec::with_capacity(diff.added.len());
        let mut new_refs: BTreeMap<Outpoint, (String, Option<u32>)> = BTreeMap::new();
        for entry in &diff.added {
            let output = transactions
                .get(&entry.tx_hash)
                .and_then(|tx| tx.outputs.get(entry.tx_pos as usize))
                .ok_or_else(|| SyncError::MissingOutput(format!("{}:{}", entry.tx_hash, entry.tx_pos)))?;
            let utxo = Utxo::new(entry.tx_hash.clone(), entry.tx_pos, output.script.clone(), output.value);
            let height = entry.confirmed_height();

            if contract_type == ContractType::Rxd {
                incoming.push(Incoming {
                    txo: Txo::new(utxo, height, ContractType::Rxd),
                    reference: None,
                });
                continue;
            }
            let template = ScriptTemplate::match_script(&output.script);
            let (Some(ct), Some(reference)) = (template.contract_type(), template.token_ref()) else {
                log::warn!("Unrecognized token output {}:{}", entry.tx_hash, entry.tx_pos);
                report.skipped += 1;
                continue;
            };
            if ct != contract_type {
                report.skipped += 1;
                continue;
            }
            let reference = reference.reverse();
            if store.token(&reference).is_none() {
                new_refs
                    .entry(reference)
                    .or_insert_with(|| (entry.tx_hash.clone(), height));
            }
            incoming.push(Incoming {
                txo: Txo::new(utxo, height, ct),
                reference: Some(reference),
            });
        }

        // Resolve new refs concurrently, then their claims breadth first
        let resolved = join_all(
            new_refs
                .iter()
                .map(|(reference, (holder, height))| resolver.resolve(*reference, Some(holder.as_str()), *height)),
        )
        .await;
        let mut memo: HashMap<Outpoint, Option<SmartToken>> = HashMap::new();
        for (reference, token) in new_refs.keys().zip(resolved) {
            memo.insert(*reference, token?);
        }
        let related = expand_related(&resolver, store, &mut memo).await?;
        report.related = related.len();

        let mut records: Vec<(Txo, Option<SmartToken>)> = Vec::with_capacity(incoming.len());
        let mut relinked = HashSet::new();
        for Incoming { txo, reference } in incoming {
            let Some(reference) = reference else {
                records.push((txo, None));
                continue;
            };
            let mut token = match memo.get(&reference) {
                Some(Some(token)) => token.clone(),
                Some(None) => {
                    log::warn!("Skipping {}:{}, ref {} did not decode", txo.txid, txo.vout, reference.short_ref());
                    report.skipped += 1;
                    continue;
                }
                None => match store.token(&reference) {
                    Some(token) => token,
                    None => continue,
                },
            };
            token.spent = false;
            relinked.insert(reference);
            records.push((txo, Some(token)));
        }
        report.added = records.len();
        report.tokens = memo
            .iter()
            .filter(|(r, t)| t.is_some() && new_refs.contains_key(*r) && relinked.contains(*r))
            .count();

        if !related.is_empty() {
            let mut batch = StoreBatch::new();
            for token in related {
                batch.put_token(token, None);
            }
            store.apply(batch)?;
        }
        for chunk in records.chunks(self.ctx.insert_chunk_size.max(1)) {
            let mut batch = StoreBatch::new();
            for (txo, token) in chunk {
                batch.insert_txo(txo.clone());
                if let Some(token) = token {
                    batch.put_token(token.clone(), Some(txo.key()));
                }
            }
            store.apply(batch)?;
        }

        let mut batch = StoreBatch::new();
        let spent_ids: HashSet<u64> = diff.spent.iter().map(|t| t.id).collect();
        for txo in &diff.spent {
            batch.mark_spent(&txo.txid, txo.vout);
        }
        if contract_type == ContractType::Nft {
            for token in store.tokens() {
                let moved = token.last_txo_id.is_some_and(|id| spent_ids.contains(&id));
                if moved && !token.spent && !relinked.contains(&token.reference) {
                    batch.push(StoreOp::MarkTokenSpent {
                        reference: token.reference,
                    });
                }
            }
        }
        let heights: HashMap<(String, u32), Option<u32>> =
            diff.confirmed.iter().map(|(t, h)| (t.key(), *h)).collect();
        for (txo, height) in &diff.confirmed {
            batch.set_height(&txo.txid, txo.vout, *height);
        }
        for balance in recompute_balances(store, contract_type, &spent_ids, &heights, &diff.spent) {
            batch.put_balance(balance);
        }
        batch.put_subscription(SubscriptionStatus {
            script_hash: subscription.script_hash.clone(),
            status,
            contract_type,
            sync: SyncProgress {
                done: true,
                num_synced: remote.len() - (diff.added.len() - report.added),
                num_total: remote.len(),
                error: false,
            },
        });
        store.apply(batch)?;
        Ok(report)
    }
}

/// Fetch the transactions holding `added`, each once
async fn fetch_transactions(
    resolver: &Resolver<'_>,
    added: &[UnspentEntry],
) -> Result<HashMap<String, Transaction>, SyncError> {
    let mut seen = HashSet::new();
    let txids: Vec<&str> = added
        .iter()
        .map(|e| e.tx_hash.as_str())
        .filter(|txid| seen.insert(*txid))
        .collect();
    let fetched = join_all(txids.iter().map(|txid| resolver.transaction(txid))).await;
    txids
        .into_iter()
        .zip(fetched)
        .map(|(txid, tx)| tx.map(|tx| (txid.to_string(), tx)))
        .collect()
}

fn claims(token: &SmartToken) -> impl Iterator<Item = Outpoint> {
    [token.author, token.container].into_iter().flatten()
}

/// Resolve claimed refs that are neither stored nor resolved in this run
async fn expand_related(
    resolver: &Resolver<'_>,
    store: &dyn WalletStore,
    memo: &mut HashMap<Outpoint, Option<SmartToken>>,
) -> Result<Vec<SmartToken>, SyncError> {
    let mut related = Vec::new();
    let mut frontier: Vec<Outpoint> = memo.values().flatten().flat_map(claims).collect();
    while !frontier.is_empty() {
        let mut seen = HashSet::new();
        frontier.retain(|r| seen.insert(*r) && !memo.contains_key(r) && store.token(r).is_none());
        let resolved = join_all(frontier.iter().map(|r| resolver.resolve(*r, None, None))).await;
        let mut next = Vec::new();
        for (reference, token) in frontier.into_iter().zip(resolved) {
            let token = token?;
            if let Some(token) = &token {
                log::debug!("Related ref {} resolved", reference.short_ref());
                next.extend(claims(token));
                related.push(token.clone());
            }
            memo.insert(reference, token);
        }
        frontier = next;
    }
    Ok(related)
}

/// Balances after the run's spends and height changes
///
/// RXD is one balance; FT is one balance per ref. Refs whose last output
/// was spent get a zero balance.
fn recompute_balances(
    store: &dyn WalletStore,
    contract_type: ContractType,
    spent_ids: &HashSet<u64>,
    heights: &HashMap<(String, u32), Option<u32>>,
    spent: &[Txo],
) -> Vec<Balance> {
    let unspent: Vec<Txo> = store
        .unspent(contract_type)
        .into_iter()
        .filter(|t| !spent_ids.contains(&t.id))
        .map(|mut t| {
            if let Some(height) = heights.get(&t.key()) {
                t.height = *height;
            }
            t
        })
        .collect();
    let add = |balance: &mut Balance, txo: &Txo| {
        if txo.is_confirmed() {
            balance.confirmed += txo.value;
        } else {
            balance.unconfirmed += txo.value;
        }
    };
    match contract_type {
        ContractType::Rxd => {
            let mut balance = Balance {
                id: "RXD".into(),
                ..Default::default()
            };
            for txo in &unspent {
                add(&mut balance, txo);
            }
            vec![balance]
        }
        ContractType::Ft => {
            let ft_ref = |txo: &Txo| ScriptTemplate::match_script(&txo.script).token_ref().map(|r| r.reverse().to_ref());
            let mut balances: BTreeMap<String, Balance> = spent
                .iter()
                .filter_map(ft_ref)
                .map(|id| (id.clone(), Balance { id, ..Default::default() }))
                .collect();
            for txo in &unspent {
                if let Some(id) = ft_ref(txo) {
                    let balance = balances.entry(id.clone()).or_insert_with(|| Balance {
                        id,
                        ..Default::default()
                    });
                    add(balance, txo);
                }
            }
            balances.into_values().collect()
        }
        _ => Vec::new(),
    }
}

#[async_trait]
impl Reconciler for SyncEngine {
    async fn reconcile(&self, subscription: &Subscription, status: Status) -> Result<(), SyncError> {
        self.sync_subscription(subscription, status).await.map(|_| ())
    }
}

/// Live sync: one serialized task per subscription, fed by notifications
pub struct SyncSession {
    handles: HashMap<String, SubscriptionHandle>,
}

impl SyncSession {
    pub fn start(engine: Arc<SyncEngine>, subscriptions: &[Subscription]) -> Self {
        let handles = subscriptions
            .iter()
            .map(|s| (s.script_hash.clone(), spawn_subscription(engine.clone(), s.clone())))
            .collect();
        Self { handles }
    }

    /// Queue a status for the subscription of `script_hash`
    pub fn notify(&self, script_hash: &str, status: Status) -> Result<(), SyncError> {
        let handle = self
            .handles
            .get(script_hash)
            .ok_or_else(|| SyncError::UnknownSubscription(script_hash.to_string()))?;
        if !handle.notify(status) {
            log::warn!("Subscription task for {} has stopped", script_hash);
        }
        Ok(())
    }

    /// Route an indexer notification; returns false for anything but a known script hash
    pub fn dispatch(&self, notification: &Notification) -> bool {
        match notification {
            Notification::ScriptHash { script_hash, status } => {
                self.notify(script_hash, status.clone()).is_ok()
            }
            _ => false,
        }
    }

    /// Let in-flight runs finish and stop every task
    pub async fn close(self) {
        for (_, handle) in self.handles {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FeeRate, TxOutput};
    use crate::mint::{mint_token, TokenDraft};
    use crate::network::{HeadersResponse, IndexerError, MockIndexer, RefLocation};
    use crate::storage::{keys, MemoryStore};
    use crate::wallet::{transfer_nft, SelectionParams, TransactionBuilder, Wallet, WalletContext};
    use serde_json::json;

    struct Harness {
        wallet: Wallet,
        store: Arc<MemoryStore>,
        indexer: Arc<MockIndexer>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                wallet: Wallet::new(),
                store: Arc::new(MemoryStore::new()),
                indexer: Arc::new(MockIndexer::new()),
            }
        }

        fn ctx(&self) -> WalletContext<'_> {
            WalletContext::new(
                &self.wallet,
                self.store.as_ref(),
                self.indexer.as_ref(),
                SelectionParams::new(FeeRate::default()),
            )
        }

        /// Engine over a separate, empty store sharing the chain
        fn engine_with(&self, store: Arc<MemoryStore>) -> SyncEngine {
            SyncEngine::new(SyncContext::new(store, self.indexer.clone()))
        }

        fn engine(&self) -> SyncEngine {
            self.engine_with(self.store.clone())
        }

        fn subscription(&self, ct: ContractType) -> Subscription {
            self.wallet
                .subscriptions()
                .unwrap()
                .into_iter()
                .find(|s| s.contract_type == ct)
                .unwrap()
        }

        fn fund(&self, value: u64) -> Utxo {
            let script = self.wallet.p2pkh_script().unwrap();
            self.indexer.fund(&script, value).unwrap()
        }

        /// Fund on chain and record the coin, as a wallet about to spend would have
        fn fund_recorded(&self, value: u64) -> Utxo {
            let utxo = self.fund(value);
            let mut batch = StoreBatch::new();
            batch.insert_txo(Txo::new(utxo.clone(), None, ContractType::Rxd));
            self.store.apply(batch).unwrap();
            utxo
        }
    }

    #[tokio::test]
    async fn test_spent_output_replaced_by_new_one() {
        let h = Harness::new();
        let mut funded = Vec::new();
        let mut batch = StoreBatch::new();
        for i in 0..5 {
            let utxo = h.fund(1_000_000 + i);
            batch.insert_txo(Txo::new(utxo.clone(), None, ContractType::Rxd));
            funded.push(utxo);
        }
        h.store.apply(batch).unwrap();
        let fifth = h.store.txo(&funded[4].txid, 0).unwrap();
        assert_eq!(fifth.id, 5);

        // output 5 is spent elsewhere into a new wallet output T:0
        let signed = TransactionBuilder::new(FeeRate::default())
            .add_input(funded[4].clone())
            .add_output(TxOutput::new(990_000, h.wallet.p2pkh_script().unwrap()))
            .signing_key(h.wallet.key())
            .skip_fee_check()
            .build()
            .unwrap();
        h.indexer.broadcast(&signed.hex).await.unwrap();

        let sub = h.subscription(ContractType::Rxd);
        let status = h.indexer.status(&sub.script_hash);
        let report = h.engine().sync_subscription(&sub, status.clone()).await.unwrap();
        assert_eq!((report.added, report.spent), (1, 1));

        assert!(h.store.txo_by_id(5).unwrap().spent);
        let unspent = h.store.unspent(ContractType::Rxd);
        assert_eq!(unspent.len(), 5);
        let new: Vec<&Txo> = unspent.iter().filter(|t| t.id > 5).collect();
        assert_eq!(new.len(), 1);
        assert_eq!((new[0].txid.as_str(), new[0].vout), (signed.txid.as_str(), 0));

        let record = h.store.subscription(&sub.script_hash).unwrap();
        assert_eq!(record.status, status);
        assert!(record.sync.done);
        assert!(!record.sync.error);
        let balance = h.store.balance("RXD").unwrap();
        assert_eq!(balance.unconfirmed, 4_000_000 + 6 + 990_000);
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let h = Harness::new();
        h.fund(5_000);
        h.fund(7_000);
        h.indexer.mine().unwrap();
        let sub = h.subscription(ContractType::Rxd);
        let engine = h.engine();

        engine.sync_subscription(&sub, Some("a".into())).await.unwrap();
        let before = h.store.snapshot().unwrap();
        let report = engine.sync_subscription(&sub, Some("a".into())).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(h.store.snapshot().unwrap(), before);

        let record = h.store.subscription(&sub.script_hash).unwrap();
        assert_eq!((record.sync.num_synced, record.sync.num_total), (2, 2));
        let balance = h.store.balance("RXD").unwrap();
        assert_eq!((balance.confirmed, balance.unconfirmed), (12_000, 0));
    }

    #[tokio::test]
    async fn test_confirmation_updates_height() {
        let h = Harness::new();
        let utxo = h.fund(5_000);
        let sub = h.subscription(ContractType::Rxd);
        let engine = h.engine();
        engine.sync_subscription(&sub, None).await.unwrap();
        assert_eq!(h.store.txo(&utxo.txid, 0).unwrap().height, None);

        let height = h.indexer.mine().unwrap();
        let report = engine.sync_subscription(&sub, Some("b".into())).await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(h.store.txo(&utxo.txid, 0).unwrap().height, Some(height));
        assert_eq!(h.store.balance("RXD").unwrap().confirmed, 5_000);
    }

    #[tokio::test]
    async fn test_small_chunks_insert_everything() {
        let h = Harness::new();
        for i in 0..7 {
            h.fund(1_000 + i);
        }
        let engine = SyncEngine::new(SyncContext::new(h.store.clone(), h.indexer.clone()).with_insert_chunk_size(2));
        let report = engine
            .sync_subscription(&h.subscription(ContractType::Rxd), None)
            .await
            .unwrap();
        assert_eq!(report.added, 7);
        assert_eq!(h.store.unspent(ContractType::Rxd).len(), 7);
    }

    #[tokio::test]
    async fn test_minted_nft_discovered_fresh() {
        let h = Harness::new();
        h.fund_recorded(100_000_000);
        let mut draft = TokenDraft::nft("Discovered");
        draft.description = "restored".into();
        let minted = mint_token(&h.ctx(), &draft).await.unwrap();

        let restored = Arc::new(MemoryStore::new());
        let engine = h.engine_with(restored.clone());
        let report = engine
            .sync_subscription(&h.subscription(ContractType::Nft), None)
            .await
            .unwrap();
        assert_eq!((report.added, report.tokens), (1, 1));

        let token = restored.token(&minted.reference).unwrap();
        assert_eq!(token.name, "Discovered");
        assert!(token.fresh);
        let txo = restored.txo_by_id(token.last_txo_id.unwrap()).unwrap();
        assert_eq!((txo.txid.as_str(), txo.contract_type), (minted.reveal_txid.as_str(), ContractType::Nft));

        // sending it away marks the token spent on the next run
        let sent = transfer_nft(&h.ctx(), &minted.reference, &Wallet::new().address())
            .await
            .unwrap();
        assert!(!sent.txid.is_empty());
        let report = engine
            .sync_subscription(&h.subscription(ContractType::Nft), Some("moved".into()))
            .await
            .unwrap();
        assert_eq!(report.spent, 1);
        assert!(restored.token(&minted.reference).unwrap().spent);
    }

    #[tokio::test]
    async fn test_claimed_author_stored_without_owner() {
        let h = Harness::new();
        h.fund_recorded(200_000_000);
        let author = mint_token(&h.ctx(), &TokenDraft::nft("Author")).await.unwrap().reference;
        let mut draft = TokenDraft::nft("Work");
        draft.author = Some(author);
        let work = mint_token(&h.ctx(), &draft).await.unwrap().reference;
        transfer_nft(&h.ctx(), &author, &Wallet::new().address()).await.unwrap();

        let restored = Arc::new(MemoryStore::new());
        let report = h
            .engine_with(restored.clone())
            .sync_subscription(&h.subscription(ContractType::Nft), None)
            .await
            .unwrap();
        assert_eq!((report.added, report.related), (1, 1));
        assert_eq!(restored.token(&work).unwrap().author, Some(author));
        let related = restored.token(&author).unwrap();
        assert_eq!(related.name, "Author");
        assert_eq!(related.last_txo_id, None);
    }

    /// Indexer whose connection is gone
    struct Offline;

    #[async_trait]
    impl ChainIndexer for Offline {
        async fn list_unspent(&self, _: &str) -> Result<Vec<UnspentEntry>, IndexerError> {
            Err(IndexerError::Closed)
        }
        async fn get_transaction(&self, _: &str) -> Result<String, IndexerError> {
            Err(IndexerError::Closed)
        }
        async fn broadcast(&self, _: &str) -> Result<String, IndexerError> {
            Err(IndexerError::Closed)
        }
        async fn get_ref(&self, _: &str) -> Result<Vec<RefLocation>, IndexerError> {
            Err(IndexerError::Closed)
        }
        async fn block_headers(&self, _: u32, _: u32) -> Result<HeadersResponse, IndexerError> {
            Err(IndexerError::Closed)
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_flags_error() {
        let h = Harness::new();
        let sub = h.subscription(ContractType::Rxd);
        h.engine().sync_subscription(&sub, None).await.unwrap();
        assert!(!h.store.subscription(&sub.script_hash).unwrap().sync.error);

        let offline = SyncEngine::new(SyncContext::new(h.store.clone(), Arc::new(Offline)));
        assert!(matches!(
            offline.sync_subscription(&sub, Some("x".into())).await,
            Err(SyncError::NetworkError(IndexerError::Closed))
        ));
        let record = h.store.subscription(&sub.script_hash).unwrap();
        assert!(record.sync.error);
        assert_eq!(record.status, None);
    }

    #[tokio::test]
    async fn test_consolidation_flag_after_all_synced() {
        let h = Harness::new();
        for i in 0..4 {
            h.fund(10_000 + i);
        }
        let engine = SyncEngine::new(
            SyncContext::new(h.store.clone(), h.indexer.clone()).with_consolidation_threshold(3),
        );
        let subs = h.wallet.subscriptions().unwrap();
        engine.sync_subscription(&subs[0], None).await.unwrap();
        assert_eq!(h.store.kv(keys::CONSOLIDATION_REQUIRED), Some(json!(true)));

        let reports = engine.sync_all(&subs).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(h.store.kv(keys::CONSOLIDATION_REQUIRED), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_session_routes_notifications() {
        let h = Harness::new();
        h.fund(5_000);
        let subs = h.wallet.subscriptions().unwrap();
        let session = SyncSession::start(Arc::new(h.engine()), &subs);
        let status = h.indexer.status(&subs[0].script_hash);
        assert!(session.dispatch(&Notification::ScriptHash {
            script_hash: subs[0].script_hash.clone(),
            status: status.clone(),
        }));
        assert!(!session.dispatch(&Notification::Disconnected { reason: "eof".into() }));
        assert!(matches!(
            session.notify("ff", None),
            Err(SyncError::UnknownSubscription(_))
        ));
        session.close().await;
        assert_eq!(h.store.unspent(ContractType::Rxd).len(), 1);
        assert_eq!(h.store.subscription(&subs[0].script_hash).unwrap().status, status);
    }
}
