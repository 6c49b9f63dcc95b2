//! Raw 80-byte block headers

use primitive_types::U256;

use crate::crypto::sha512_256d;

use super::asert::target_from_bits;
use super::HeaderError;

/// Serialized header size
pub const HEADER_SIZE: usize = 80;

/// A block header
///
/// Hash fields keep the serialized (little-endian) byte order; the `_hex`
/// accessors return the reversed display form used by indexers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn display_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

impl BlockHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::InvalidHeader(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&bytes[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&bytes[36..68]);
        Ok(Self {
            version: read_u32(bytes, 0),
            prev_hash,
            merkle_root,
            time: read_u32(bytes, 68),
            bits: read_u32(bytes, 72),
            nonce: read_u32(bytes, 76),
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, HeaderError> {
        let bytes = hex::decode(hex_str).map_err(|e| HeaderError::InvalidHeader(e.to_string()))?;
        Self::parse(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(&self.prev_hash);
        bytes[36..68].copy_from_slice(&self.merkle_root);
        bytes[68..72].copy_from_slice(&self.time.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.bits.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Proof-of-work hash (double SHA-512/256)
    pub fn hash(&self) -> [u8; 32] {
        sha512_256d(&self.to_bytes())
    }

    pub fn hash_hex(&self) -> String {
        display_hex(&self.hash())
    }

    pub fn prev_hash_hex(&self) -> String {
        display_hex(&self.prev_hash)
    }

    pub fn meets_target(&self, target: U256) -> bool {
        U256::from_little_endian(&self.hash()) <= target
    }

    /// The hash meets the header's own `bits`
    pub fn has_valid_pow(&self) -> bool {
        let target = target_from_bits(self.bits);
        !target.is_zero() && self.meets_target(target)
    }
}

/// Split a `blockchain.block.headers` hex blob into headers
pub fn parse_headers(hex_str: &str) -> Result<Vec<BlockHeader>, HeaderError> {
    let bytes = hex::decode(hex_str).map_err(|e| HeaderError::InvalidHeader(e.to_string()))?;
    if bytes.len() % HEADER_SIZE != 0 {
        return Err(HeaderError::InvalidHeader(format!("{} bytes is not a whole number of headers", bytes.len())));
    }
    bytes.chunks(HEADER_SIZE).map(BlockHeader::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockHeader {
        BlockHeader {
            version: 0x2000_0000,
            prev_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 1_700_000_000,
            bits: 0x207f_ffff,
            nonce: 7,
        }
    }

    #[test]
    fn test_serialize_parse() {
        let header = sample();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[68..72], &1_700_000_000u32.to_le_bytes());
        assert_eq!(BlockHeader::from_hex(&header.to_hex()).unwrap(), header);
        assert!(BlockHeader::parse(&bytes[..79]).is_err());
        assert!(BlockHeader::from_hex("zz").is_err());
    }

    #[test]
    fn test_hash_is_reversed_double_sha512_256() {
        let mut header = sample();
        header.prev_hash[0] = 0xab;
        let mut hash = sha512_256d(&header.to_bytes());
        assert_eq!(header.hash(), hash);
        hash.reverse();
        assert_eq!(header.hash_hex(), hex::encode(hash));
        assert!(header.prev_hash_hex().ends_with("ab"));
    }

    #[test]
    fn test_pow_check() {
        let mut header = sample();
        assert!(header.meets_target(U256::MAX));
        assert!(!header.meets_target(U256::zero()));
        header.bits = 0x0392_3456;
        assert!(!header.has_valid_pow());
    }

    #[test]
    fn test_parse_headers_blob() {
        let a = sample();
        let mut b = sample();
        b.nonce = 8;
        let blob = format!("{}{}", a.to_hex(), b.to_hex());
        assert_eq!(parse_headers(&blob).unwrap(), vec![a, b]);
        assert!(parse_headers(&blob[..158]).is_err());
        assert!(parse_headers("").unwrap().is_empty());
    }
}
