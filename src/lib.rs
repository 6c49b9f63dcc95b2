//! Radiant Wallet: a client-side wallet core for the Radiant blockchain
//!
//! This crate provides everything a wallet needs to hold and move RXD and
//! Glyph smart tokens:
//! - Script templates for P2PKH, NFT, FT, mutable, commit, delegate and dmint outputs
//! - Atom and RST token payload codecs (canonical CBOR)
//! - Coin selection and signed transaction building with Radiant sighash
//! - Commit/reveal minting, including resumable bundles with delegate refs
//! - Indexer sync with token discovery and author/container verification
//! - Header verification with aserti3-2d difficulty
//! - Transfers, melts, swaps and consolidation
//!
//! # Example
//!
//! ```rust
//! use radiant_wallet::core::FeeRate;
//! use radiant_wallet::network::MockIndexer;
//! use radiant_wallet::storage::MemoryStore;
//! use radiant_wallet::wallet::{SelectionParams, Wallet, WalletContext};
//!
//! // Create a wallet
//! let wallet = Wallet::new();
//! println!("Address: {}", wallet.address());
//!
//! // Wire it to a store and an indexer
//! let store = MemoryStore::new();
//! let indexer = MockIndexer::new();
//! let ctx = WalletContext::new(&wallet, &store, &indexer, SelectionParams::new(FeeRate::default()));
//! assert!(ctx.rxd_inputs().is_empty());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod headers;
pub mod mint;
pub mod network;
pub mod script;
pub mod storage;
pub mod sync;
pub mod token;
pub mod wallet;

// Re-export commonly used types
pub use config::{ConfigError, WalletConfig};
pub use core::{FeeRate, Transaction, Txo, Utxo};
pub use crypto::KeyPair;
pub use headers::{BlockHeader, HeaderChain};
pub use mint::{mint_token, BundleState, TokenDraft};
pub use network::{ChainIndexer, ElectrumClient, MockIndexer, NetworkWorker};
pub use script::{Script, ScriptTemplate};
pub use storage::{MemoryStore, SnapshotStorage, WalletStore};
pub use sync::{SyncContext, SyncEngine};
pub use token::{ContractType, Outpoint, SmartToken};
pub use wallet::{TransactionBuilder, Wallet, WalletContext};
