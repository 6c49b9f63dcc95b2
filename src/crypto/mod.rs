//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / double SHA-256 / HASH160 / SHA-512/256d hashing
//! - ECDSA key management (secp256k1) and Base58Check addresses

pub mod hash;
pub mod keys;

pub use hash::{
    double_sha256, double_sha256_hex, hash160, reversed_hash_hex, sha256, sha256_hex,
    sha512_256d,
};
pub use keys::{
    address_to_pubkey_hash, is_valid_address, public_key_from_hex, public_key_to_address,
    pubkey_hash_to_address, verify_signature, KeyError, KeyPair, ADDRESS_VERSION_MAINNET,
    ADDRESS_VERSION_TESTNET,
};
