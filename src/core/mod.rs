//! Core transaction components
//!
//! This module contains the fundamental building blocks:
//! - Raw transactions (wire encoding, txid)
//! - Radiant signature hashing with output ref summaries
//! - Fee rates
//! - Wallet outputs

pub mod fee;
pub mod sighash;
pub mod transaction;
pub mod utxo;

pub use fee::{fee_within_tolerance, FeeRate, DEFAULT_DUST_THRESHOLD, DEFAULT_FEE_RATE, MAX_FEE_RATIO};
pub use sighash::{output_summary, sighash, sighash_preimage, SighashFlags};
pub use transaction::{Transaction, TransactionError, TxInput, TxOutput, SEQUENCE_FINAL, TX_VERSION};
pub use utxo::{Txo, Utxo};
