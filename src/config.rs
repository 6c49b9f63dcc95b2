//! Wallet configuration
//!
//! Loaded from `config.json` in the data directory. Missing fields take
//! their defaults, so an empty object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::{FeeRate, DEFAULT_DUST_THRESHOLD};
use crate::headers::{ChainParams, Checkpoint};
use crate::network::ChainIndexer;
use crate::storage::{load_json, save_json, SnapshotConfig, StoreError, WalletStore};
use crate::sync::{SyncContext, DEFAULT_CONSOLIDATION_THRESHOLD, DEFAULT_INSERT_CHUNK_SIZE};
use crate::wallet::SelectionParams;

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_CONSOLIDATION_MAX_INPUTS: usize = 200;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MINT_BATCH_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Indexer WebSocket URLs, tried in order
    pub servers: Vec<String>,
    pub fee_rate: FeeRate,
    pub dust_threshold: u64,
    /// Unspent outputs per script above which consolidation is required
    pub consolidation_threshold: usize,
    pub consolidation_max_inputs: usize,
    pub insert_chunk_size: usize,
    pub connect_timeout_secs: u64,
    pub mint_batch_size: usize,
    pub data_dir: PathBuf,
    /// Header verification is off without a checkpoint
    pub checkpoint: Option<Checkpoint>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            fee_rate: FeeRate::default(),
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            consolidation_max_inputs: DEFAULT_CONSOLIDATION_MAX_INPUTS,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            mint_batch_size: DEFAULT_MINT_BATCH_SIZE,
            data_dir: PathBuf::from(".wallet_data"),
            checkpoint: None,
        }
    }
}

impl WalletConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.json` from `data_dir`, or defaults rooted there
    pub fn load_or_default(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        Ok(save_json(path, self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consolidation_max_inputs == 0 {
            return Err(ConfigError::Invalid("consolidation_max_inputs must be positive".into()));
        }
        if self.insert_chunk_size == 0 {
            return Err(ConfigError::Invalid("insert_chunk_size must be positive".into()));
        }
        if self.mint_batch_size == 0 {
            return Err(ConfigError::Invalid("mint_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn selection_params(&self) -> SelectionParams {
        SelectionParams {
            fee_rate: self.fee_rate,
            dust_threshold: self.dust_threshold,
        }
    }

    pub fn sync_context(&self, store: Arc<dyn WalletStore>, indexer: Arc<dyn ChainIndexer>) -> SyncContext {
        SyncContext::new(store, indexer)
            .with_insert_chunk_size(self.insert_chunk_size)
            .with_consolidation_threshold(self.consolidation_threshold)
    }

    /// Snapshot location of one wallet's store
    pub fn snapshot_config(&self, address: &str) -> SnapshotConfig {
        SnapshotConfig {
            data_dir: self.data_dir.join("stores"),
            snapshot_file: format!("{}.json", address),
            ..Default::default()
        }
    }

    pub fn chain_params(&self) -> Option<ChainParams> {
        self.checkpoint.clone().map(ChainParams::new)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }
}
