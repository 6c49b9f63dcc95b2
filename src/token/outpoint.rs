//! Outpoints and refs
//!
//! A ref is a 36-byte outpoint (32-byte txid + 4-byte vout) that identifies a
//! token for its whole life. Records and the UI use the display orientation
//! (`txid` as shown by explorers followed by big-endian `vout`); scripts carry
//! the little-endian orientation. [`Outpoint::reverse`] converts between the
//! two by reversing the txid and vout segments independently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of an encoded outpoint
pub const OUTPOINT_LEN: usize = 36;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutpointError {
    #[error("Invalid txid: {0}")]
    InvalidTxid(String),
    #[error("Invalid outpoint string: {0}")]
    InvalidFormat(String),
}

/// String encodings of an outpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutpointFormat {
    /// 72 hex characters of the raw bytes
    Ref,
    /// `<txid>i<vout>`
    ShortRef,
    /// `<txid>:<vout>`
    ShortInput,
    /// `<txid>_<vout>`
    ShortOutput,
}

/// A 36-byte transaction outpoint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Outpoint([u8; OUTPOINT_LEN]);

impl Outpoint {
    pub fn from_bytes(bytes: [u8; OUTPOINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, `None` unless it is exactly 36 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; OUTPOINT_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Display-orientation outpoint for `txid:vout`
    pub fn from_utxo(txid: &str, vout: u32) -> Result<Self, OutpointError> {
        let txid_bytes = hex::decode(txid).map_err(|_| OutpointError::InvalidTxid(txid.into()))?;
        if txid_bytes.len() != 32 {
            return Err(OutpointError::InvalidTxid(txid.into()));
        }
        let mut bytes = [0u8; OUTPOINT_LEN];
        bytes[..32].copy_from_slice(&txid_bytes);
        bytes[32..].copy_from_slice(&vout.to_be_bytes());
        Ok(Self(bytes))
    }

    /// All-zero outpoint, used for ref-agnostic script hashing
    pub fn zero() -> Self {
        Self([0u8; OUTPOINT_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; OUTPOINT_LEN] {
        &self.0
    }

    /// Swap orientation: reverses the txid and vout segments independently
    pub fn reverse(&self) -> Self {
        let mut bytes = self.0;
        bytes[..32].reverse();
        bytes[32..].reverse();
        Self(bytes)
    }

    /// Txid hex, reading this outpoint in display orientation
    pub fn txid(&self) -> String {
        hex::encode(&self.0[..32])
    }

    /// Output index, reading this outpoint in display orientation
    pub fn vout(&self) -> u32 {
        u32::from_be_bytes([self.0[32], self.0[33], self.0[34], self.0[35]])
    }

    /// Outpoint `n` outputs further along the same transaction
    pub fn offset(&self, n: u32) -> Self {
        let mut bytes = self.0;
        bytes[32..].copy_from_slice(&self.vout().wrapping_add(n).to_be_bytes());
        Self(bytes)
    }

    /// 72 hex characters
    pub fn to_ref(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short_ref(&self) -> String {
        format!("{}i{}", self.txid(), self.vout())
    }

    pub fn short_input(&self) -> String {
        format!("{}:{}", self.txid(), self.vout())
    }

    pub fn short_output(&self) -> String {
        format!("{}_{}", self.txid(), self.vout())
    }

    pub fn to_string_as(&self, format: OutpointFormat) -> String {
        match format {
            OutpointFormat::Ref => self.to_ref(),
            OutpointFormat::ShortRef => self.short_ref(),
            OutpointFormat::ShortInput => self.short_input(),
            OutpointFormat::ShortOutput => self.short_output(),
        }
    }

    /// Parse any supported encoding
    pub fn parse(s: &str) -> Result<Self, OutpointError> {
        let invalid = || OutpointError::InvalidFormat(s.to_string());
        if s.len() == OUTPOINT_LEN * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(s).map_err(|_| invalid())?;
            return Self::from_slice(&bytes).ok_or_else(invalid);
        }
        if s.len() < 66 || !s.is_ascii() {
            return Err(invalid());
        }
        let (txid, rest) = s.split_at(64);
        let mut rest_chars = rest.chars();
        match rest_chars.next() {
            Some('i') | Some(':') | Some('_') => {}
            _ => return Err(invalid()),
        }
        let vout_str = rest_chars.as_str();
        if vout_str.is_empty() || !vout_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let vout: u32 = vout_str.parse().map_err(|_| invalid())?;
        Self::from_utxo(txid, vout).map_err(|_| invalid())
    }
}

/// Reverse a 72-hex ref string between display and script orientation
pub fn reverse_ref(ref_hex: &str) -> Result<String, OutpointError> {
    Ok(Outpoint::parse(ref_hex)?.reverse().to_ref())
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outpoint({})", self.to_ref())
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ref())
    }
}

impl FromStr for Outpoint {
    type Err = OutpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Outpoint> for String {
    fn from(outpoint: Outpoint) -> Self {
        outpoint.to_ref()
    }
}

impl TryFrom<String> for Outpoint {
    type Error = OutpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
