//! Raw script container, builder and chunk parser
//!
//! Scripts are kept as raw bytes. Building appends opcodes, minimal pushes and
//! 36-byte reference immediates; parsing walks the bytes into [`Chunk`]s and
//! never panics on malformed input.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::opcodes::*;
use crate::token::Outpoint;

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Truncated push at byte {0}")]
    TruncatedPush(usize),
    #[error("Truncated reference at byte {0}")]
    TruncatedRef(usize),
    #[error("Invalid script parameter: {0}")]
    InvalidParameter(String),
}

/// One parsed element of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// A non-push opcode
    Op(u8),
    /// Data push; `opcode` is the push opcode used (length byte or PUSHDATAn)
    Push { opcode: u8, data: &'a [u8] },
    /// Reference opcode with its 36-byte little-endian operand
    Ref { opcode: u8, reference: &'a [u8] },
}

impl<'a> Chunk<'a> {
    /// Data carried by a push, including small-integer opcodes
    pub fn data(&self) -> Option<&'a [u8]> {
        match self {
            Chunk::Push { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Opcode of this chunk
    pub fn opcode(&self) -> u8 {
        match self {
            Chunk::Op(op) => *op,
            Chunk::Push { opcode, .. } | Chunk::Ref { opcode, .. } => *opcode,
        }
    }
}

/// A locking or unlocking script
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ScriptError> {
        hex::decode(hex_str)
            .map(Self)
            .map_err(|_| ScriptError::InvalidHex(hex_str.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Append a single opcode
    pub fn op(mut self, opcode: u8) -> Self {
        self.0.push(opcode);
        self
    }

    /// Append several opcodes
    pub fn ops(mut self, opcodes: &[u8]) -> Self {
        self.0.extend_from_slice(opcodes);
        self
    }

    /// Append a data push using the smallest push opcode
    pub fn push(mut self, data: &[u8]) -> Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.0.push(len as u8);
        } else if len <= 0xff {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else if len <= 0xffff {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OP_PUSHDATA4);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Append a minimally-encoded script number
    pub fn push_int(self, n: i64) -> Self {
        match n {
            0 => self.op(OP_0),
            -1 => self.op(OP_1NEGATE),
            1..=16 => self.op(OP_1 + (n as u8) - 1),
            _ => {
                let encoded = encode_script_num(n);
                self.push(&encoded)
            }
        }
    }

    /// Append a reference opcode with its 36-byte little-endian operand
    pub fn push_ref(mut self, opcode: u8, ref_le: &Outpoint) -> Self {
        self.0.push(opcode);
        self.0.extend_from_slice(ref_le.as_bytes());
        self
    }

    /// Append the raw bytes of another script
    pub fn append(mut self, other: &Script) -> Self {
        self.0.extend_from_slice(&other.0);
        self
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    /// Parse the script into chunks
    pub fn chunks(&self) -> Result<Vec<Chunk<'_>>, ScriptError> {
        parse_chunks(&self.0)
    }

    /// References carried forward by `OP_PUSHINPUTREF`/`OP_PUSHINPUTREFSINGLETON`
    ///
    /// Returned in script (little-endian) orientation, in order of appearance.
    pub fn push_refs(&self) -> Vec<Outpoint> {
        self.refs_matching(pushes_ref)
    }

    /// References named by `OP_REQUIREINPUTREF`
    pub fn required_refs(&self) -> Vec<Outpoint> {
        self.refs_matching(|op| op == OP_REQUIREINPUTREF)
    }

    fn refs_matching(&self, filter: impl Fn(u8) -> bool) -> Vec<Outpoint> {
        self.chunks()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| match chunk {
                Chunk::Ref { opcode, reference } if filter(opcode) => {
                    Outpoint::from_slice(reference)
                }
                _ => None,
            })
            .collect()
    }

    /// Split at the first top-level `OP_STATESEPARATOR` into (state, code)
    ///
    /// The separator itself belongs to neither part. Scripts without one are
    /// all code.
    pub fn split_state(&self) -> (Script, Script) {
        let mut offset = 0;
        for chunk in self.chunks().unwrap_or_default() {
            let size = chunk_size(&chunk);
            if chunk == Chunk::Op(OP_STATESEPARATOR) {
                return (
                    Script(self.0[..offset].to_vec()),
                    Script(self.0[offset + 1..].to_vec()),
                );
            }
            offset += size;
        }
        (Script::new(), self.clone())
    }

    /// Human-readable ASM
    pub fn to_asm(&self) -> String {
        match self.chunks() {
            Ok(chunks) => chunks
                .iter()
                .map(|chunk| match chunk {
                    Chunk::Op(op) => opcode_name(*op)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("OP_UNKNOWN{op}")),
                    Chunk::Push { data, .. } if data.is_empty() => "OP_0".to_string(),
                    Chunk::Push { data, .. } => hex::encode(data),
                    Chunk::Ref { opcode, reference } => format!(
                        "{} {}",
                        opcode_name(*opcode).unwrap_or("OP_REF"),
                        hex::encode(reference)
                    ),
                })
                .collect::<Vec<_>>()
                .join(" "),
            Err(e) => format!("[invalid script: {e}]"),
        }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Script> for String {
    fn from(script: Script) -> Self {
        script.to_hex()
    }
}

impl TryFrom<String> for Script {
    type Error = ScriptError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Script::from_hex(&value)
    }
}

fn chunk_size(chunk: &Chunk<'_>) -> usize {
    match chunk {
        Chunk::Op(_) => 1,
        Chunk::Ref { .. } => 37,
        Chunk::Push { opcode, data } => {
            let header = match *opcode {
                OP_PUSHDATA1 => 2,
                OP_PUSHDATA2 => 3,
                OP_PUSHDATA4 => 5,
                _ => 1,
            };
            header + data.len()
        }
    }
}

/// Walk raw script bytes into chunks
pub fn parse_chunks(bytes: &[u8]) -> Result<Vec<Chunk<'_>>, ScriptError> {
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let opcode = bytes[i];
        let start = i;
        i += 1;

        let len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => {
                let b = *bytes.get(i).ok_or(ScriptError::TruncatedPush(start))?;
                i += 1;
                Some(b as usize)
            }
            OP_PUSHDATA2 => {
                let b = bytes.get(i..i + 2).ok_or(ScriptError::TruncatedPush(start))?;
                i += 2;
                Some(u16::from_le_bytes([b[0], b[1]]) as usize)
            }
            OP_PUSHDATA4 => {
                let b = bytes.get(i..i + 4).ok_or(ScriptError::TruncatedPush(start))?;
                i += 4;
                Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            }
            _ => None,
        };

        if let Some(len) = len {
            let end = i.checked_add(len).ok_or(ScriptError::TruncatedPush(start))?;
            let data = bytes.get(i..end).ok_or(ScriptError::TruncatedPush(start))?;
            chunks.push(Chunk::Push { opcode, data });
            i = end;
        } else if opcode == OP_0 {
            chunks.push(Chunk::Push { opcode, data: &[] });
        } else if takes_ref_operand(opcode) {
            let reference = bytes.get(i..i + 36).ok_or(ScriptError::TruncatedRef(start))?;
            chunks.push(Chunk::Ref { opcode, reference });
            i += 36;
        } else {
            chunks.push(Chunk::Op(opcode));
        }
    }
    Ok(chunks)
}

/// Minimal CScriptNum encoding
pub fn encode_script_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().map_or(false, |b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = out.last_mut() {
            *last |= 0x80;
        }
    }
    out
}

/// Decode a CScriptNum of at most 8 bytes
pub fn decode_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -(value & mask);
    }
    Some(value)
}

/// Decode a small-integer opcode or a numeric push
pub fn chunk_to_int(chunk: &Chunk<'_>) -> Option<i64> {
    match chunk {
        Chunk::Op(op) if (OP_1..=OP_16).contains(op) => Some((op - OP_1 + 1) as i64),
        Chunk::Op(OP_1NEGATE) => Some(-1),
        Chunk::Push { data, .. } => decode_script_num(data),
        _ => None,
    }
}
