//! Raw transactions
//!
//! Bitcoin-style wire format as used by Radiant:
//! - version, inputs, outputs, locktime
//! - txids are displayed byte-reversed from their serialized form

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{double_sha256, KeyError};
use crate::script::{varint_size, Script};
use crate::token::Outpoint;

// =============================================================================
// Constants
// =============================================================================

/// Transaction version the wallet emits
pub const TX_VERSION: u32 = 2;

/// Sequence number that disables locktime
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Truncated transaction at byte {0}")]
    Truncated(usize),
    #[error("Invalid hex")]
    InvalidHex,
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

// =============================================================================
// Inputs and outputs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Display-orientation txid of the spent output
    pub prev_txid: String,
    pub prev_vout: u32,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(prev_txid: impl Into<String>, prev_vout: u32) -> Self {
        Self {
            prev_txid: prev_txid.into(),
            prev_vout,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
        }
    }

    /// Outpoint in display orientation
    pub fn outpoint(&self) -> Option<Outpoint> {
        Outpoint::from_utxo(&self.prev_txid, self.prev_vout).ok()
    }

    /// Serialized outpoint: txid bytes as hashed (little-endian) + vout LE
    pub fn outpoint_bytes(&self) -> Result<[u8; 36], TransactionError> {
        let mut txid = hex::decode(&self.prev_txid).map_err(|_| TransactionError::InvalidHex)?;
        if txid.len() != 32 {
            return Err(TransactionError::InvalidTransaction(format!(
                "bad txid {}",
                self.prev_txid
            )));
        }
        txid.reverse();
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&txid);
        out[32..].copy_from_slice(&self.prev_vout.to_le_bytes());
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
}

impl TxOutput {
    pub fn new(value: u64, script: Script) -> Self {
        Self { value, script }
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.value);
        write_varint(buf, self.script.len() as u64);
        buf.put_slice(self.script.as_bytes());
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32_le(self.version);
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.put_slice(&input.outpoint_bytes()?);
            write_varint(&mut buf, input.script_sig.len() as u64);
            buf.put_slice(input.script_sig.as_bytes());
            buf.put_u32_le(input.sequence);
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(&mut buf);
        }
        buf.put_u32_le(self.locktime);
        Ok(buf.to_vec())
    }

    pub fn to_hex(&self) -> Result<String, TransactionError> {
        Ok(hex::encode(self.to_bytes()?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = Reader::new(bytes);
        let version = reader.u32()?;
        let input_count = reader.varint()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let mut txid = reader.take(32)?.to_vec();
            txid.reverse();
            let prev_vout = reader.u32()?;
            let script_len = reader.varint()? as usize;
            let script_sig = Script::from_bytes(reader.take(script_len)?.to_vec());
            let sequence = reader.u32()?;
            inputs.push(TxInput {
                prev_txid: hex::encode(txid),
                prev_vout,
                script_sig,
                sequence,
            });
        }
        let output_count = reader.varint()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = reader.u64()?;
            let script_len = reader.varint()? as usize;
            let script = Script::from_bytes(reader.take(script_len)?.to_vec());
            outputs.push(TxOutput { value, script });
        }
        let locktime = reader.u32()?;
        if reader.remaining() != 0 {
            return Err(TransactionError::InvalidTransaction(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(hex_str).map_err(|_| TransactionError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    /// Display-orientation txid
    pub fn txid(&self) -> Result<String, TransactionError> {
        let mut hash = double_sha256(&self.to_bytes()?);
        hash.reverse();
        Ok(hex::encode(hash))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 40 + varint_size(i.script_sig.len()) + i.script_sig.len())
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + varint_size(o.script.len()) + o.script.len())
            .sum();
        8 + varint_size(self.inputs.len()) + inputs + varint_size(self.outputs.len()) + outputs
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Whether any input spends `outpoint` (display orientation)
    pub fn spends(&self, outpoint: &Outpoint) -> bool {
        self.inputs
            .iter()
            .any(|i| i.prev_vout == outpoint.vout() && i.prev_txid == outpoint.txid())
    }
}

// =============================================================================
// Wire helpers
// =============================================================================

pub(crate) fn write_varint(buf: &mut BytesMut, n: u64) {
    match n {
        0..=0xfc => buf.put_u8(n as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(n as u16);
        }
        0x1_0000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(n as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(n);
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, len: buf.len() }
    }

    fn position(&self) -> usize {
        self.len - self.buf.remaining()
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> Result<(), TransactionError> {
        if self.buf.remaining() < n {
            return Err(TransactionError::Truncated(self.position()));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransactionError> {
        self.ensure(n)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, TransactionError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32, TransactionError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64, TransactionError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn varint(&mut self) -> Result<u64, TransactionError> {
        match self.u8()? {
            0xfd => {
                self.ensure(2)?;
                Ok(self.buf.get_u16_le() as u64)
            }
            0xfe => Ok(self.u32()? as u64),
            0xff => self.u64(),
            n => Ok(n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut input = TxInput::new("11".repeat(32), 1);
        input.script_sig = Script::new().push(&[0xaa; 71]).push(&[0x02; 33]);
        Transaction::new(
            vec![input],
            vec![
                TxOutput::new(30_000, Script::from_bytes(vec![0x76; 25])),
                TxOutput::new(69_774, Script::from_bytes(vec![0x76; 25])),
            ],
        )
    }

    #[test]
    fn test_serialize_round_trip() {
        let tx = sample_tx();
        let bytes = tx.to_bytes().unwrap();
        assert_eq!(bytes.len(), tx.size());
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
        assert_eq!(Transaction::from_hex(&tx.to_hex().unwrap()).unwrap(), tx);
    }

    #[test]
    fn test_outpoint_is_little_endian_on_wire() {
        let mut input = TxInput::new(format!("{}{}", "00".repeat(31), "ff"), 2);
        input.sequence = 0;
        let bytes = input.outpoint_bytes().unwrap();
        assert_eq!(bytes[0], 0xff);
        assert_eq!(&bytes[32..], &[2, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_and_trailing_bytes() {
        let bytes = sample_tx().to_bytes().unwrap();
        assert!(matches!(
            Transaction::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TransactionError::Truncated(_))
        ));
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(Transaction::from_bytes(&extra).is_err());
    }

    #[test]
    fn test_txid_and_spends() {
        let tx = sample_tx();
        let txid = tx.txid().unwrap();
        assert_eq!(txid.len(), 64);
        let spent = Outpoint::from_utxo(&"11".repeat(32), 1).unwrap();
        assert!(tx.spends(&spent));
        assert!(!tx.spends(&spent.offset(1)));
    }
}
