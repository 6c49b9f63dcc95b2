//! ECDSA key management
//!
//! Key pairs, DER signing and Base58Check P2PKH addresses on secp256k1.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::{double_sha256, hash160};

/// Mainnet P2PKH version byte
pub const ADDRESS_VERSION_MAINNET: u8 = 0x00;

/// Testnet P2PKH version byte
pub const ADDRESS_VERSION_TESTNET: u8 = 0x6f;

/// WIF version byte (mainnet)
pub const WIF_VERSION: u8 = 0x80;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Create a key pair from a compressed-key WIF string
    pub fn from_wif(wif: &str) -> Result<Self, KeyError> {
        let payload = decode_base58_check(wif).ok_or(KeyError::InvalidPrivateKey)?;
        if payload.first() != Some(&WIF_VERSION) || !(payload.len() == 33 || payload.len() == 34)
        {
            return Err(KeyError::InvalidPrivateKey);
        }
        let secret_key =
            SecretKey::from_slice(&payload[1..33]).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Export the private key as compressed-key WIF
    pub fn to_wif(&self) -> String {
        let mut payload = vec![WIF_VERSION];
        payload.extend_from_slice(&self.secret_key.secret_bytes());
        payload.push(0x01);
        encode_base58_check(&payload)
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Compressed public key bytes
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Mainnet P2PKH address for this key
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte digest, returning a DER signature (low-S)
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_der().to_vec())
    }

    /// Verify a DER signature over a 32-byte digest against this key
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key, digest, signature)
    }
}

/// Convert a public key to a mainnet P2PKH address
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    pubkey_hash_to_address(&hash160(&public_key.serialize()), ADDRESS_VERSION_MAINNET)
}

/// Encode a 20-byte public key hash as a Base58Check address
pub fn pubkey_hash_to_address(pkh: &[u8; 20], version: u8) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(pkh);
    encode_base58_check(&payload)
}

/// Decode a Base58Check P2PKH address to its public key hash
///
/// Both mainnet and testnet version bytes are accepted.
pub fn address_to_pubkey_hash(address: &str) -> Result<[u8; 20], KeyError> {
    let payload = decode_base58_check(address)
        .ok_or_else(|| KeyError::InvalidAddress(address.to_string()))?;
    if payload.len() != 21
        || !(payload[0] == ADDRESS_VERSION_MAINNET || payload[0] == ADDRESS_VERSION_TESTNET)
    {
        return Err(KeyError::InvalidAddress(address.to_string()));
    }
    let mut pkh = [0u8; 20];
    pkh.copy_from_slice(&payload[1..]);
    Ok(pkh)
}

/// Check an address string without allocating an error
pub fn is_valid_address(address: &str) -> bool {
    address_to_pubkey_hash(address).is_ok()
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify a DER signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    digest: &[u8; 32],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest_slice(digest)?;
    let sig = Signature::from_der(signature).map_err(|_| KeyError::InvalidSignature)?;
    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

fn encode_base58_check(payload: &[u8]) -> String {
    let checksum = double_sha256(payload);
    let mut data = payload.to_vec();
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

fn decode_base58_check(encoded: &str) -> Option<Vec<u8>> {
    let data = bs58::decode(encoded).into_vec().ok()?;
    if data.len() < 5 {
        return None;
    }
    let (payload, checksum) = data.split_at(data.len() - 4);
    if double_sha256(payload)[..4] != *checksum {
        return None;
    }
    Some(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert_eq!(kp.public_key_hex().len(), 66);
        assert!(kp.address().starts_with('1'));
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let digest = sha256(b"Hello, Radiant!");

        let signature = kp.sign_digest(&digest).unwrap();
        assert!(kp.verify_digest(&digest, &signature).unwrap());

        let other = sha256(b"tampered");
        assert!(!kp.verify_digest(&other, &signature).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex_and_wif() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.address(), kp2.address());

        let kp3 = KeyPair::from_wif(&kp1.to_wif()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp3.public_key_hex());
    }

    #[test]
    fn test_address_round_trip() {
        let kp = KeyPair::generate();
        let pkh = address_to_pubkey_hash(&kp.address()).unwrap();
        assert_eq!(pkh, hash160(&kp.public_key_bytes()));
        assert_eq!(pubkey_hash_to_address(&pkh, ADDRESS_VERSION_MAINNET), kp.address());
    }

    #[test]
    fn test_malformed_address_rejected() {
        assert!(!is_valid_address("not-an-address"));
        let kp = KeyPair::generate();
        let mut address = kp.address();
        address.pop();
        address.push(if address.ends_with('z') { 'y' } else { 'z' });
        assert!(address_to_pubkey_hash(&address).is_err());
    }
}
