//! Snapshot persistence
//!
//! Saves and loads [`MemoryStore`] snapshots as JSON, plus small JSON
//! helpers used for other file-based state such as mint bundles.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use super::memory::{MemoryStore, StoreState};
use super::store::StoreError;

/// Snapshot location and backup policy
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wallet_data"),
            snapshot_file: "wallet.json".to_string(),
            backup_enabled: true,
            max_backups: 3,
        }
    }
}

/// Snapshot storage manager
pub struct SnapshotStorage {
    config: SnapshotConfig,
}

impl SnapshotStorage {
    pub fn new(config: SnapshotConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.snapshot_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.snapshot_file, index))
    }

    /// Write the store to disk, keeping the previous snapshot as backup 0
    pub fn save(&self, store: &MemoryStore) -> Result<(), StoreError> {
        let path = self.snapshot_path();
        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }
        save_json(&path, &store.snapshot()?)
    }

    pub fn load(&self) -> Result<MemoryStore, StoreError> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let state: StoreState = load_json(&path)?;
        log::info!("Loaded wallet snapshot with {} outputs", state.txo_count());
        Ok(MemoryStore::from_state(state))
    }

    /// Load the snapshot, or start empty when none exists yet
    pub fn load_or_default(&self) -> Result<MemoryStore, StoreError> {
        if self.exists() {
            self.load()
        } else {
            Ok(MemoryStore::new())
        }
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }

    fn rotate_backups(&self) -> Result<(), StoreError> {
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }
        Ok(())
    }

    pub fn restore_backup(&self, backup_index: usize) -> Result<MemoryStore, StoreError> {
        let path = self.backup_path(backup_index);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("Backup {}", backup_index)));
        }
        Ok(MemoryStore::from_state(load_json(&path)?))
    }

    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }
}

/// Write `value` as pretty JSON via a temp file and atomic rename
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let temp_path = path.with_extension("tmp");
    let file = fs::File::create(&temp_path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
