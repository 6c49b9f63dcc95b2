//! Signature hashing
//!
//! Radiant uses the BIP143-style FORKID preimage with one extra field,
//! `hashOutputHashes`, that commits to a per-output summary including the
//! refs each output carries.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use super::transaction::{write_varint, Transaction, TransactionError};
use crate::crypto::double_sha256;
use crate::script::Script;

bitflags! {
    /// Sighash type byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SighashFlags: u8 {
        const ALL = 0x01;
        const NONE = 0x02;
        const SINGLE = 0x03;
        const FORKID = 0x40;
        const ANYONECANPAY = 0x80;
    }
}

impl Default for SighashFlags {
    fn default() -> Self {
        SighashFlags::ALL | SighashFlags::FORKID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseType {
    All,
    None,
    Single,
}

impl SighashFlags {
    /// `SINGLE|ANYONECANPAY|FORKID`, used by swap offers
    pub fn single_anyone_can_pay() -> Self {
        SighashFlags::SINGLE | SighashFlags::ANYONECANPAY | SighashFlags::FORKID
    }

    pub fn is_anyone_can_pay(&self) -> bool {
        self.contains(SighashFlags::ANYONECANPAY)
    }

    fn base_type(&self) -> BaseType {
        match self.bits() & 0x1f {
            0x02 => BaseType::None,
            0x03 => BaseType::Single,
            _ => BaseType::All,
        }
    }
}

/// Per-output summary committed to by `hashOutputHashes`
///
/// `value ‖ sha256d(script) ‖ ref count ‖ sha256d(sorted refs)`; the ref hash
/// is all zeros when the output carries no refs.
pub fn output_summary(value: u64, script: &Script) -> Vec<u8> {
    let mut refs: Vec<[u8; 36]> = script.push_refs().iter().map(|r| *r.as_bytes()).collect();
    refs.sort();
    refs.dedup();

    let mut buf = BytesMut::with_capacity(76);
    buf.put_u64_le(value);
    buf.put_slice(&double_sha256(script.as_bytes()));
    buf.put_u32_le(refs.len() as u32);
    if refs.is_empty() {
        buf.put_slice(&[0u8; 32]);
    } else {
        buf.put_slice(&double_sha256(&refs.concat()));
    }
    buf.to_vec()
}

/// Preimage for signing input `index`, which spends `prev_script` holding `prev_value`
pub fn sighash_preimage(
    tx: &Transaction,
    index: usize,
    prev_script: &Script,
    prev_value: u64,
    flags: SighashFlags,
) -> Result<Vec<u8>, TransactionError> {
    let input = tx
        .inputs
        .get(index)
        .ok_or(TransactionError::InputOutOfRange(index))?;
    let base = flags.base_type();
    let zero = [0u8; 32];

    let hash_prevouts = if flags.is_anyone_can_pay() {
        zero
    } else {
        let mut buf = BytesMut::new();
        for i in &tx.inputs {
            buf.put_slice(&i.outpoint_bytes()?);
        }
        double_sha256(&buf)
    };

    let hash_sequence = if flags.is_anyone_can_pay() || base != BaseType::All {
        zero
    } else {
        let mut buf = BytesMut::new();
        for i in &tx.inputs {
            buf.put_u32_le(i.sequence);
        }
        double_sha256(&buf)
    };

    let (hash_output_hashes, hash_outputs) = match base {
        BaseType::All => {
            let mut summaries = BytesMut::new();
            let mut serialized = BytesMut::new();
            for output in &tx.outputs {
                summaries.put_slice(&output_summary(output.value, &output.script));
                output.write(&mut serialized);
            }
            (double_sha256(&summaries), double_sha256(&serialized))
        }
        BaseType::Single if index < tx.outputs.len() => {
            let output = &tx.outputs[index];
            let mut serialized = BytesMut::new();
            output.write(&mut serialized);
            (
                double_sha256(&output_summary(output.value, &output.script)),
                double_sha256(&serialized),
            )
        }
        _ => (zero, zero),
    };

    let mut buf = BytesMut::new();
    buf.put_u32_le(tx.version);
    buf.put_slice(&hash_prevouts);
    buf.put_slice(&hash_sequence);
    buf.put_slice(&input.outpoint_bytes()?);
    write_varint(&mut buf, prev_script.len() as u64);
    buf.put_slice(prev_script.as_bytes());
    buf.put_u64_le(prev_value);
    buf.put_u32_le(input.sequence);
    buf.put_slice(&hash_output_hashes);
    buf.put_slice(&hash_outputs);
    buf.put_u32_le(tx.locktime);
    buf.put_u32_le(flags.bits() as u32);
    Ok(buf.to_vec())
}

/// Digest that gets signed
pub fn sighash(
    tx: &Transaction,
    index: usize,
    prev_script: &Script,
    prev_value: u64,
    flags: SighashFlags,
) -> Result<[u8; 32], TransactionError> {
    Ok(double_sha256(&sighash_preimage(
        tx,
        index,
        prev_script,
        prev_value,
        flags,
    )?))
}
