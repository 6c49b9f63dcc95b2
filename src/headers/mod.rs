//! Block header verification
//!
//! A light header chain anchored at a checkpoint:
//! - aserti3-2d expected-bits computation
//! - 80-byte header codec with SHA-512/256d proof of work
//! - Catch-up and reorg rollback against the indexer

pub mod asert;
pub mod chain;
pub mod header;

use thiserror::Error;

use crate::network::IndexerError;
use crate::storage::StoreError;

pub use asert::{bits_from_target, mainnet_pow_limit, target_from_bits, AsertAnchor, AsertParams, HALF_LIFE, TARGET_SPACING};
pub use chain::{ChainParams, Checkpoint, HeaderChain, HeaderUpdate, FETCH_BATCH, ROLLBACK_DEPTH};
pub use header::{parse_headers, BlockHeader, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Header {height} does not link to the previous header")]
    Disconnected { height: u32 },
    #[error("Header {height} has bits {actual:#010x}, expected {expected:#010x}")]
    BadBits { height: u32, expected: u32, actual: u32 },
    #[error("Header {height} does not meet its target")]
    InsufficientWork { height: u32 },
    #[error("Header chain has no checkpoint")]
    NotInitialized,
    #[error("Height {0} is at or below the checkpoint")]
    BelowCheckpoint(u32),
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}
