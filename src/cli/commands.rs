//! CLI commands for the wallet
//!
//! Implements all command handlers for the CLI interface. Network commands
//! sync the wallet before acting and save its store afterwards, also when
//! the action fails, so a retried run resumes from what reached the chain.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{WalletConfig, CONFIG_FILE};
use crate::headers::HeaderChain;
use crate::mint::{
    commit_bundle, prepare_bundle, reveal_batch, reveal_bundle, BroadcastStep, BundleStage, BundleState,
    TokenDraft,
};
use crate::network::{ChainIndexer, ChainSubscriber, ElectrumClient, Notification, ServerRotation, WorkerError};
use crate::storage::{keys, load_json, MemoryStore, SnapshotStorage, WalletStore};
use crate::sync::{SyncEngine, SyncReport};
use crate::token::{Outpoint, TokenType};
use crate::wallet::{consolidate_all, send_rxd, Wallet, WalletContext, WalletManager};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub config: WalletConfig,
    pub wallet_manager: WalletManager,
}

impl AppState {
    /// Load the config of `data_dir`, writing defaults on first use
    pub fn new(data_dir: &Path, servers: Vec<String>) -> CliResult<Self> {
        let mut config = WalletConfig::load_or_default(data_dir)?;
        std::fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            config.save(&config_path)?;
        }
        if !servers.is_empty() {
            config.servers = servers;
        }
        let wallet_manager = WalletManager::new(&config.wallets_dir())?;
        Ok(Self { config, wallet_manager })
    }

    pub fn open(&self, address: &str) -> CliResult<OpenWallet> {
        let wallet = self.wallet_manager.load_wallet(address)?;
        let snapshots = SnapshotStorage::new(self.config.snapshot_config(address))?;
        let store = Arc::new(snapshots.load_or_default()?);
        Ok(OpenWallet {
            wallet,
            store,
            snapshots,
        })
    }
}

/// A wallet with its store loaded
pub struct OpenWallet {
    pub wallet: Wallet,
    pub store: Arc<MemoryStore>,
    snapshots: SnapshotStorage,
}

impl OpenWallet {
    pub fn save(&self) -> CliResult<()> {
        self.snapshots.save(&self.store)?;
        Ok(())
    }
}

/// An indexer session; keeps the notification channel open while in use
pub struct Online {
    pub client: Arc<ElectrumClient>,
    _notifications: mpsc::UnboundedReceiver<Notification>,
}

/// Connect to the first reachable server
pub async fn connect(config: &WalletConfig) -> CliResult<Online> {
    let mut rotation = ServerRotation::new(config.servers.clone());
    if rotation.is_empty() {
        return Err(WorkerError::NoServers.into());
    }
    for _ in 0..rotation.len() {
        let Some(url) = rotation.next_server() else {
            break;
        };
        match ElectrumClient::connect(&url, config.connect_timeout()).await {
            Ok((client, notifications)) => {
                return Ok(Online {
                    client: Arc::new(client),
                    _notifications: notifications,
                })
            }
            Err(e) => log::warn!("Server {} unavailable: {}", url, e),
        }
    }
    Err(WorkerError::AllServersFailed(rotation.len()).into())
}

/// Sync every subscription of the wallet, then the header chain if configured
pub async fn sync_wallet(config: &WalletConfig, open: &OpenWallet, online: &Online) -> CliResult<Vec<SyncReport>> {
    let store: Arc<dyn WalletStore> = open.store.clone();
    let indexer: Arc<dyn ChainIndexer> = online.client.clone();
    let engine = SyncEngine::new(config.sync_context(store, indexer));

    let mut reports = Vec::new();
    for subscription in open.wallet.subscriptions()? {
        let status = online.client.subscribe_script_hash(&subscription.script_hash).await?;
        reports.push(engine.sync_subscription(&subscription, status).await?);
    }

    if let Some(params) = config.chain_params() {
        let chain = HeaderChain::new(open.store.as_ref(), online.client.as_ref(), params);
        chain.init()?;
        let tip = online.client.subscribe_headers().await?;
        match chain.on_header(&tip).await {
            Ok(update) => log::info!("Header chain: {:?}", update),
            Err(e) => log::warn!("Header verification failed at {}: {}", tip.height, e),
        }
    }
    open.save()?;
    Ok(reports)
}

/// Create a new wallet
pub fn cmd_wallet_create(state: &AppState, label: Option<&str>) -> CliResult<()> {
    let wallet = state.wallet_manager.create_wallet(label)?;
    let info = wallet.export_public_info();

    println!("🔐 New wallet created!");
    println!("   📍 Address: {}", info.address);
    println!("   🔄 Swap address: {}", info.swap_address);
    println!("   🔑 Public Key: {}...", &info.public_key[..32]);
    if let Some(l) = &info.label {
        println!("   🏷️  Label: {}", l);
    }
    println!("\n   ⚠️  IMPORTANT: Your private keys are stored in {:?}", state.config.wallets_dir());
    println!("   Back up this directory to avoid losing access to your funds!");
    Ok(())
}

/// List wallets with their last synced RXD balance
pub fn cmd_wallet_list(state: &AppState) -> CliResult<()> {
    let addresses = state.wallet_manager.list_wallets()?;
    if addresses.is_empty() {
        println!("📭 No wallets found. Create one with: radiant-wallet wallet create");
        return Ok(());
    }
    println!("📋 Wallets:");
    for address in addresses {
        let open = state.open(&address)?;
        let rxd = open.store.balance("RXD").unwrap_or_default();
        let label = open.wallet.label.as_deref().unwrap_or("unlabeled");
        println!("   {} ({}) - {} photons", address, label, rxd.confirmed + rxd.unconfirmed);
    }
    Ok(())
}

/// Show balances, syncing first unless `offline`
pub async fn cmd_wallet_balance(state: &AppState, address: &str, offline: bool) -> CliResult<()> {
    let open = state.open(address)?;
    if !offline {
        let online = connect(&state.config).await?;
        let reports = sync_wallet(&state.config, &open, &online).await?;
        let added: usize = reports.iter().map(|r| r.added).sum();
        let spent: usize = reports.iter().map(|r| r.spent).sum();
        println!("🔄 Synced: {} new outputs, {} spent", added, spent);
    }

    let store = open.store.as_ref();
    let rxd = store.balance("RXD").unwrap_or_default();
    println!("💰 Balance for {}", address);
    println!("   RXD: {} confirmed, {} unconfirmed", rxd.confirmed, rxd.unconfirmed);

    let held: Vec<_> = store
        .tokens()
        .into_iter()
        .filter(|t| !t.spent && t.last_txo_id.is_some())
        .collect();
    for token in held.iter().filter(|t| t.token_type == TokenType::Ft) {
        let balance = store.balance(&token.reference.to_ref()).unwrap_or_default();
        println!(
            "   {} ({}): {} confirmed, {} unconfirmed",
            token.ticker.as_deref().unwrap_or(&token.name),
            token.reference.short_ref(),
            balance.confirmed,
            balance.unconfirmed
        );
    }
    let nfts: Vec<_> = held.iter().filter(|t| t.token_type == TokenType::Nft).collect();
    if !nfts.is_empty() {
        println!("\n   NFTs:");
        for token in nfts {
            println!("   ├─ {} {}", token.reference.short_ref(), token.name);
        }
    }
    if store.kv(keys::CONSOLIDATION_REQUIRED) == Some(serde_json::Value::Bool(true)) {
        println!("\n   ℹ️  Many small outputs; run: radiant-wallet wallet consolidate -a {}", address);
    }
    Ok(())
}

/// Send RXD to an address
pub async fn cmd_wallet_send(state: &AppState, address: &str, to: &str, amount: u64) -> CliResult<()> {
    let open = state.open(address)?;
    let online = connect(&state.config).await?;
    sync_wallet(&state.config, &open, &online).await?;

    let ctx = WalletContext::new(
        &open.wallet,
        open.store.as_ref(),
        online.client.as_ref(),
        state.config.selection_params(),
    );
    let result = send_rxd(&ctx, to, amount).await;
    open.save()?;
    let result = result?;

    println!("📤 Transaction broadcast:");
    println!("   TxID: {}", result.txid);
    println!("   Fee: {} photons", result.fee);
    Ok(())
}

/// Merge small outputs above the configured threshold
pub async fn cmd_wallet_consolidate(state: &AppState, address: &str) -> CliResult<()> {
    let open = state.open(address)?;
    let online = connect(&state.config).await?;
    sync_wallet(&state.config, &open, &online).await?;

    let ctx = WalletContext::new(
        &open.wallet,
        open.store.as_ref(),
        online.client.as_ref(),
        state.config.selection_params(),
    );
    let result = consolidate_all(
        &ctx,
        state.config.consolidation_threshold,
        state.config.consolidation_max_inputs,
    )
    .await;
    open.save()?;
    let result = result?;

    if result.txids.is_empty() {
        println!("✅ Nothing to consolidate");
    } else {
        println!("🧹 Consolidated in {} transactions, fee {} photons", result.txids.len(), result.fee);
        for txid in &result.txids {
            println!("   ├─ {}", txid);
        }
    }
    Ok(())
}

/// Create a bundle file from a JSON array of token drafts
pub fn cmd_bundle_init(
    state: &AppState,
    address: &str,
    drafts: &Path,
    file: &Path,
    batch_size: Option<usize>,
) -> CliResult<()> {
    if file.exists() {
        println!("⚠️  Bundle already exists at {:?}", file);
        return Ok(());
    }
    let wallet = state.wallet_manager.load_wallet(address)?;
    let drafts: Vec<TokenDraft> = load_json(drafts)?;
    let bundle = BundleState::new(
        &wallet.address(),
        drafts,
        batch_size.unwrap_or(state.config.mint_batch_size),
    )?;
    bundle.save(file)?;

    println!("📦 Bundle created: {:?}", file);
    println!("   Tokens: {}", bundle.drafts.len());
    println!("   Batches: {}", bundle.batches.len());
    if let Some(delegate) = &bundle.delegate {
        println!("   Claimed refs: {}", delegate.refs.len());
    }
    Ok(())
}

fn load_bundle(file: &Path) -> CliResult<BundleState> {
    if !file.exists() {
        return Err(format!("no bundle at {:?}; create one with: radiant-wallet bundle init", file).into());
    }
    Ok(BundleState::load(file)?)
}

/// Check claims and estimate the cost of a bundle
pub async fn cmd_bundle_prepare(state: &AppState, address: &str, file: &Path) -> CliResult<()> {
    let bundle = load_bundle(file)?;
    if bundle.stage() != BundleStage::Prepared {
        return Err(format!("bundle is already {:?}", bundle.stage()).into());
    }
    let open = state.open(address)?;
    let online = connect(&state.config).await?;
    sync_wallet(&state.config, &open, &online).await?;

    let ctx = WalletContext::new(
        &open.wallet,
        open.store.as_ref(),
        online.client.as_ref(),
        state.config.selection_params(),
    );
    let (prepared, estimate) = prepare_bundle(&ctx, bundle.drafts, bundle.batch_size)?;
    prepared.save(file)?;

    println!("🧾 Bundle estimate:");
    println!("   Tokens: {} in {} batches", estimate.tokens, estimate.batches);
    println!("   ├─ Token outputs: {}", estimate.token_value);
    println!("   ├─ Delegate fees: {}", estimate.delegate_fees);
    println!("   ├─ Funding fee: {}", estimate.funding_fee);
    println!("   ├─ Commit fees: {}", estimate.commit_fees);
    println!("   ├─ Reveal fees: {}", estimate.reveal_fees);
    println!("   └─ Total: {} photons (available {})", estimate.total, estimate.available);
    if !estimate.affordable() {
        println!("\n❌ Insufficient funds: need {} more photons", estimate.total - estimate.available);
    }
    Ok(())
}

/// Broadcast the delegate, funding and commit transactions
pub async fn cmd_bundle_commit(state: &AppState, address: &str, file: &Path) -> CliResult<()> {
    let mut bundle = load_bundle(file)?;
    let open = state.open(address)?;
    let online = connect(&state.config).await?;
    sync_wallet(&state.config, &open, &online).await?;

    let ctx = WalletContext::new(
        &open.wallet,
        open.store.as_ref(),
        online.client.as_ref(),
        state.config.selection_params(),
    );
    let result = commit_bundle(&ctx, &mut bundle, Some(file)).await;
    open.save()?;
    result?;

    println!("✅ Bundle committed ({} batches)", bundle.batches.len());
    println!("   Fees so far: {} photons", bundle.fees.total());
    Ok(())
}

/// Reveal one batch, or every batch
pub async fn cmd_bundle_reveal(state: &AppState, address: &str, file: &Path, batch: Option<usize>) -> CliResult<()> {
    let mut bundle = load_bundle(file)?;
    let open = state.open(address)?;
    let online = connect(&state.config).await?;
    sync_wallet(&state.config, &open, &online).await?;

    let ctx = WalletContext::new(
        &open.wallet,
        open.store.as_ref(),
        online.client.as_ref(),
        state.config.selection_params(),
    );
    let result = match batch {
        Some(index) => reveal_batch(&ctx, &mut bundle, index, Some(file)).await,
        None => reveal_bundle(&ctx, &mut bundle, Some(file)).await,
    };
    open.save()?;
    result?;

    println!("✨ Bundle is {:?}", bundle.stage());
    for utxo in bundle.tokens.iter().filter_map(|t| t.utxo.as_ref()) {
        println!("   ├─ {}", Outpoint::from_utxo(&utxo.txid, utxo.vout)?.short_ref());
    }
    println!("   Total fees: {} photons", bundle.fees.total());
    Ok(())
}

/// Print the progress of a bundle
pub fn cmd_bundle_status(file: &Path) -> CliResult<()> {
    let bundle = load_bundle(file)?;
    println!("📦 Bundle {:?}: {:?}", file, bundle.stage());
    for (index, batch) in bundle.batches.iter().enumerate() {
        let mark = |step: &Option<BroadcastStep>| match step {
            Some(s) if s.broadcast => "sent",
            Some(_) => "signed",
            None => "-",
        };
        println!(
            "   batch {} (tokens {}..{}): commit {}, reveal {}",
            index,
            batch.first,
            batch.first + batch.count,
            mark(&batch.commit),
            mark(&batch.reveal)
        );
    }
    for entry in &bundle.fees.entries {
        println!("   {} {} {}", entry.step, entry.txid, entry.fee);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::save_json;

    #[test]
    fn test_state_writes_default_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = AppState::new(temp_dir.path(), vec!["wss://x.example".into()]).unwrap();
        assert!(temp_dir.path().join(CONFIG_FILE).exists());
        assert_eq!(state.config.servers, vec!["wss://x.example".to_string()]);

        let saved = WalletConfig::load(&temp_dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.servers.is_empty());
    }

    #[test]
    fn test_open_wallet_store_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = AppState::new(temp_dir.path(), Vec::new()).unwrap();
        let wallet = state.wallet_manager.create_wallet(Some("main")).unwrap();

        let open = state.open(&wallet.address()).unwrap();
        assert!(open.store.tokens().is_empty());
        open.save().unwrap();
        assert!(state
            .config
            .snapshot_config(&wallet.address())
            .data_dir
            .join(format!("{}.json", wallet.address()))
            .exists());
    }

    #[test]
    fn test_bundle_init_writes_state() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = AppState::new(temp_dir.path(), Vec::new()).unwrap();
        let wallet = state.wallet_manager.create_wallet(None).unwrap();

        let drafts_path = temp_dir.path().join("drafts.json");
        let drafts: Vec<TokenDraft> = (0..5).map(|i| TokenDraft::nft(&format!("Item {}", i))).collect();
        save_json(&drafts_path, &drafts).unwrap();

        let file = temp_dir.path().join("bundle.json");
        cmd_bundle_init(&state, &wallet.address(), &drafts_path, &file, Some(2)).unwrap();

        let bundle = BundleState::load(&file).unwrap();
        assert_eq!(bundle.batches.len(), 3);
        assert_eq!(bundle.stage(), BundleStage::Prepared);
        assert!(bundle.delegate.is_none());
        cmd_bundle_status(&file).unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_servers() {
        let err = connect(&WalletConfig::default()).await.err().unwrap();
        assert!(err.to_string().contains("No"), "{}", err);
    }
}
