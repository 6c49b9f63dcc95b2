//! Wallet keys and persistence
//!
//! A wallet holds two keys: the main key owning coins and tokens, and a swap
//! key whose address parks assets offered in a pending swap.

use crate::crypto::{KeyError, KeyPair};
use crate::script::{
    ft_script, nft_script, p2pkh_script, script_hash, zero_ref_script_hash, Script, ScriptError,
};
use crate::token::{ContractType, Outpoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

/// Serializable wallet data for persistence
#[derive(Debug, Serialize, Deserialize)]
struct WalletData {
    main_wif: String,
    swap_wif: String,
    address: String,
    label: Option<String>,
}

/// A script hash the wallet subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub script_hash: String,
    pub contract_type: ContractType,
}

/// Radiant wallet keys
pub struct Wallet {
    key: KeyPair,
    swap_key: KeyPair,
    /// Optional label for the wallet
    pub label: Option<String>,
}

impl Wallet {
    /// Create a new wallet with fresh keys
    pub fn new() -> Self {
        Self {
            key: KeyPair::generate(),
            swap_key: KeyPair::generate(),
            label: None,
        }
    }

    /// Create a wallet with a label
    pub fn with_label(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            ..Self::new()
        }
    }

    /// Import a wallet from WIF keys
    pub fn from_wif(main_wif: &str, swap_wif: &str) -> Result<Self, WalletError> {
        Ok(Self {
            key: KeyPair::from_wif(main_wif)?,
            swap_key: KeyPair::from_wif(swap_wif)?,
            label: None,
        })
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn swap_key(&self) -> &KeyPair {
        &self.swap_key
    }

    pub fn address(&self) -> String {
        self.key.address()
    }

    pub fn swap_address(&self) -> String {
        self.swap_key.address()
    }

    pub fn is_own_address(&self, address: &str) -> bool {
        address == self.address() || address == self.swap_address()
    }

    /// Key owning `address`, if it is one of ours
    pub fn key_for_address(&self, address: &str) -> Option<&KeyPair> {
        if address == self.address() {
            Some(&self.key)
        } else if address == self.swap_address() {
            Some(&self.swap_key)
        } else {
            None
        }
    }

    pub fn p2pkh_script(&self) -> Result<Script, WalletError> {
        Ok(p2pkh_script(&self.address())?)
    }

    /// Script hashes covering coins, NFTs and FTs of the main address
    pub fn subscriptions(&self) -> Result<Vec<Subscription>, WalletError> {
        let address = self.address();
        let zero = Outpoint::zero();
        Ok(vec![
            Subscription {
                script_hash: script_hash(&p2pkh_script(&address)?),
                contract_type: ContractType::Rxd,
            },
            Subscription {
                script_hash: zero_ref_script_hash(&nft_script(&address, &zero)?),
                contract_type: ContractType::Nft,
            },
            Subscription {
                script_hash: zero_ref_script_hash(&ft_script(&address, &zero)?),
                contract_type: ContractType::Ft,
            },
        ])
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            main_wif: self.key.to_wif(),
            swap_wif: self.swap_key.to_wif(),
            address: self.address(),
            label: self.label.clone(),
        };
        let json = serde_json::to_string_pretty(&data)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;
        let mut wallet = Self::from_wif(&data.main_wif, &data.swap_wif)?;
        wallet.label = data.label;
        Ok(wallet)
    }

    /// Export wallet info (without private keys)
    pub fn export_public_info(&self) -> WalletInfo {
        WalletInfo {
            address: self.address(),
            swap_address: self.swap_address(),
            public_key: self.key.public_key_hex(),
            label: self.label.clone(),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Public wallet information (safe to share)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub swap_address: String,
    pub public_key: String,
    pub label: Option<String>,
}

/// Wallet files in one directory, named by address
pub struct WalletManager {
    wallets_dir: PathBuf,
}

impl WalletManager {
    pub fn new(wallets_dir: &Path) -> Result<Self, WalletError> {
        fs::create_dir_all(wallets_dir)?;
        Ok(Self {
            wallets_dir: wallets_dir.to_path_buf(),
        })
    }

    fn wallet_path(&self, address: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", address))
    }

    /// Create and save a new wallet
    pub fn create_wallet(&self, label: Option<&str>) -> Result<Wallet, WalletError> {
        let wallet = match label {
            Some(l) => Wallet::with_label(l),
            None => Wallet::new(),
        };
        wallet.save(&self.wallet_path(&wallet.address()))?;
        log::info!("Created wallet {}", wallet.address());
        Ok(wallet)
    }

    /// List all wallet addresses
    pub fn list_wallets(&self) -> Result<Vec<String>, WalletError> {
        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.wallets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(wallet) = Wallet::load(&path) {
                    addresses.push(wallet.address());
                }
            }
        }
        addresses.sort();
        Ok(addresses)
    }

    pub fn load_wallet(&self, address: &str) -> Result<Wallet, WalletError> {
        Wallet::load(&self.wallet_path(address))
    }

    pub fn delete_wallet(&self, address: &str) -> Result<(), WalletError> {
        fs::remove_file(self.wallet_path(address))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert!(!wallet.address().is_empty());
        assert_ne!(wallet.address(), wallet.swap_address());
        assert!(wallet.is_own_address(&wallet.swap_address()));
        assert!(wallet.key_for_address(&Wallet::new().address()).is_none());
    }

    #[test]
    fn test_wallet_import() {
        let wallet1 = Wallet::new();
        let wallet2 = Wallet::from_wif(&wallet1.key().to_wif(), &wallet1.swap_key().to_wif()).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
        assert_eq!(wallet1.swap_address(), wallet2.swap_address());
        assert!(Wallet::from_wif("bad", "bad").is_err());
    }

    #[test]
    fn test_wallet_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test_wallet.json");

        let wallet1 = Wallet::with_label("Test Wallet");
        wallet1.save(&path).unwrap();

        let wallet2 = Wallet::load(&path).unwrap();
        assert_eq!(wallet1.address(), wallet2.address());
        assert_eq!(wallet1.label, wallet2.label);
    }

    #[test]
    fn test_manager_lists_wallets() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = WalletManager::new(temp_dir.path()).unwrap();
        let a = manager.create_wallet(Some("a")).unwrap();
        let b = manager.create_wallet(None).unwrap();

        let listed = manager.list_wallets().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a.address()) && listed.contains(&b.address()));

        manager.delete_wallet(&a.address()).unwrap();
        assert_eq!(manager.list_wallets().unwrap(), vec![b.address()]);
        assert_eq!(manager.load_wallet(&b.address()).unwrap().address(), b.address());
    }

    #[test]
    fn test_subscriptions_are_distinct() {
        let subs = Wallet::new().subscriptions().unwrap();
        assert_eq!(subs.len(), 3);
        assert_ne!(subs[1].script_hash, subs[2].script_hash);
    }
}
