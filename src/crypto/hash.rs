//! Hashing utilities
//!
//! SHA-256 based hashes used for txids, payload commitments and script hashes,
//! RIPEMD-160 for addresses, and SHA-512/256 for Radiant block proof of work.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512_256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
///
/// Used for txids, payload hashes and the `OP_HASH256` opcode.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160 of SHA-256, the public key hash behind P2PKH addresses
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().into()
}

/// Double SHA-512/256, the Radiant block header proof-of-work hash
pub fn sha512_256d(data: &[u8]) -> [u8; 32] {
    let first: [u8; 32] = Sha512_256::digest(data).into();
    Sha512_256::digest(first).into()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Computes double SHA-256 hash and returns it as a hex string
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(double_sha256(data))
}

/// Double SHA-256 rendered in display (byte-reversed) order, as txids are shown
pub fn reversed_hash_hex(data: &[u8]) -> String {
    let mut hash = double_sha256(data);
    hash.reverse();
    hex::encode(hash)
}
