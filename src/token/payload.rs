//! Token payload codec
//!
//! A payload is a CBOR map carried in a reveal unlocking script as three
//! pushes: `<magic> <operation> <cbor>`. Two marker schemes share that shape:
//! Atom (`0x73737373`) and RST (`rc02`), the latter adding the `mod`/`sl`
//! operations for mutable tokens.
//!
//! Encoding is canonical (map keys ordered by their encoded bytes) so the
//! payload hash does not depend on insertion order.

use ciborium::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::outpoint::Outpoint;
use super::record::FileDescriptor;
use crate::crypto::double_sha256;
use crate::script::{Chunk, Script};

pub const ATOM_MAGIC: [u8; 4] = [0x73, 0x73, 0x73, 0x73];
pub const RST_MAGIC: [u8; 4] = *b"rc02";

/// Argument keys accepted from user input
const ALLOWED_ARGS: [&str; 1] = ["ticker"];

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("CBOR encode failed: {0}")]
    Encode(String),
    #[error("CBOR decode failed: {0}")]
    Decode(String),
    #[error("Payload is not a map")]
    NotAMap,
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// Marker scheme of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Atom,
    Rst,
}

impl PayloadFormat {
    pub fn magic(&self) -> &'static [u8] {
        match self {
            PayloadFormat::Atom => &ATOM_MAGIC,
            PayloadFormat::Rst => &RST_MAGIC,
        }
    }

    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes == ATOM_MAGIC {
            Some(PayloadFormat::Atom)
        } else if bytes == RST_MAGIC {
            Some(PayloadFormat::Rst)
        } else {
            None
        }
    }
}

/// Operation carried next to the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Nft,
    Ft,
    Dat,
    /// Mutable token state update
    Mod,
    /// Mutable token seal
    Sl,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Nft => "nft",
            Operation::Ft => "ft",
            Operation::Dat => "dat",
            Operation::Mod => "mod",
            Operation::Sl => "sl",
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"nft" => Some(Operation::Nft),
            b"ft" => Some(Operation::Ft),
            b"dat" => Some(Operation::Dat),
            b"mod" => Some(Operation::Mod),
            b"sl" => Some(Operation::Sl),
            _ => None,
        }
    }
}

/// Decoded token payload
///
/// `in_refs` (containers) and `by_refs` (authors) are claims only. They are
/// trusted after checking them against the commit transaction's required refs
/// or a delegate burn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPayload {
    pub args: BTreeMap<String, Value>,
    pub meta: BTreeMap<String, Value>,
    pub ctx: BTreeMap<String, Value>,
    pub in_refs: Vec<Outpoint>,
    pub by_refs: Vec<Outpoint>,
    pub files: BTreeMap<String, FileDescriptor>,
}

impl TokenPayload {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_text)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_text)
    }

    /// Build the CBOR value, keys in canonical order
    pub fn to_value(&self) -> Value {
        let mut entries: Vec<(Value, Value)> = Vec::new();
        for (key, map) in [("args", &self.args), ("meta", &self.meta), ("ctx", &self.ctx)] {
            if !map.is_empty() {
                entries.push((Value::Text(key.into()), string_map_to_value(map)));
            }
        }
        if !self.in_refs.is_empty() {
            entries.push((Value::Text("in".into()), refs_to_value(&self.in_refs)));
        }
        if !self.by_refs.is_empty() {
            entries.push((Value::Text("by".into()), refs_to_value(&self.by_refs)));
        }
        for (name, file) in &self.files {
            entries.push((Value::Text(name.clone()), file.to_value()));
        }
        canonicalize(Value::Map(entries))
    }

    /// Interpret a decoded CBOR value; unknown shapes in known keys are ignored
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(PayloadError::NotAMap),
        };
        let mut payload = TokenPayload::default();
        for (key, value) in entries {
            let key = match key {
                Value::Text(key) => key,
                _ => continue,
            };
            match key.as_str() {
                "args" => payload.args = value_to_string_map(value),
                "meta" => payload.meta = value_to_string_map(value),
                "ctx" => payload.ctx = value_to_string_map(value),
                "in" => payload.in_refs = value_to_refs(&value),
                "by" => payload.by_refs = value_to_refs(&value),
                _ => {
                    if let Some(file) = FileDescriptor::from_value(&value) {
                        payload.files.insert(key, file);
                    }
                }
            }
        }
        Ok(payload)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, PayloadError> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.to_value(), &mut buf)
            .map_err(|e| PayloadError::Encode(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| PayloadError::Decode(e.to_string()))?;
        Self::from_value(value)
    }

    /// `sha256d` of the canonical encoding
    pub fn hash(&self) -> Result<[u8; 32], PayloadError> {
        Ok(double_sha256(&self.to_cbor()?))
    }
}

fn string_map_to_value(map: &BTreeMap<String, Value>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
            .collect(),
    )
}

fn value_to_string_map(value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Map(entries) => entries
            .into_iter()
            .filter_map(|(k, v)| match k {
                Value::Text(k) => Some((k, v)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn refs_to_value(refs: &[Outpoint]) -> Value {
    Value::Array(refs.iter().map(|r| Value::Bytes(r.as_bytes().to_vec())).collect())
}

fn value_to_refs(value: &Value) -> Vec<Outpoint> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_bytes().and_then(|b| Outpoint::from_slice(b)))
            .collect(),
        _ => Vec::new(),
    }
}

fn encoded_key(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writing into a Vec only fails for unencodable values, which sort last
    if ciborium::into_writer(value, &mut buf).is_err() {
        buf = vec![0xff];
    }
    buf
}

/// Recursively order map entries by the bytes of their encoded keys
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Map(entries) => {
            let mut entries: Vec<(Vec<u8>, Value, Value)> = entries
                .into_iter()
                .map(|(k, v)| (encoded_key(&k), canonicalize(k), canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Map(entries.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner))),
        other => other,
    }
}

/// A payload found in a script
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub format: PayloadFormat,
    pub operation: Operation,
    pub payload: TokenPayload,
    /// The pushed CBOR exactly as found; commit hashes are taken over these bytes
    pub cbor: Vec<u8>,
}

impl DecodedPayload {
    /// `sha256d` of the pushed bytes
    pub fn payload_hash(&self) -> [u8; 32] {
        double_sha256(&self.cbor)
    }
}

/// Result of encoding a payload into its reveal pushes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// `<magic> <operation> <cbor>`
    pub script: Script,
    pub payload_hash: [u8; 32],
    pub cbor: Vec<u8>,
}

/// Result of encoding a mutable-contract transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMutation {
    /// `<magic> <op> <cbor> <contractOutputIndex> <refHashIndex> <refIndex> <tokenOutputIndex>`
    pub script: Script,
    pub payload_hash: [u8; 32],
    /// `sha256d` of `script`, binding the unlock to this exact transition
    pub script_sig_hash: [u8; 32],
}

/// Scan a script for a `<magic> <operation> <cbor>` triple
///
/// Returns `None` when no marker is present or the payload does not decode.
pub fn decode_atom(script: &Script) -> Option<DecodedPayload> {
    let chunks = script.chunks().ok()?;
    for window in chunks.windows(3) {
        let (magic, op, data) = match window {
            [Chunk::Push { data: m, .. }, Chunk::Push { data: o, .. }, Chunk::Push { data: d, .. }] => {
                (*m, *o, *d)
            }
            _ => continue,
        };
        let Some(format) = PayloadFormat::from_magic(magic) else {
            continue;
        };
        let Some(operation) = Operation::parse(op) else {
            continue;
        };
        return match TokenPayload::from_cbor(data) {
            Ok(payload) => Some(DecodedPayload {
                format,
                operation,
                payload,
                cbor: data.to_vec(),
            }),
            Err(e) => {
                log::warn!("Undecodable {} payload: {}", operation.as_str(), e);
                None
            }
        };
    }
    None
}

fn encode_with(
    format: PayloadFormat,
    operation: Operation,
    payload: &TokenPayload,
) -> Result<EncodedPayload, PayloadError> {
    if format == PayloadFormat::Atom && matches!(operation, Operation::Mod | Operation::Sl) {
        return Err(PayloadError::UnknownOperation(operation.as_str().into()));
    }
    let cbor = payload.to_cbor()?;
    let payload_hash = double_sha256(&cbor);
    let script = Script::new()
        .push(format.magic())
        .push(operation.as_str().as_bytes())
        .push(&cbor);
    Ok(EncodedPayload {
        script,
        payload_hash,
        cbor,
    })
}

/// Encode with the legacy Atom marker
pub fn encode_atom(operation: Operation, payload: &TokenPayload) -> Result<EncodedPayload, PayloadError> {
    encode_with(PayloadFormat::Atom, operation, payload)
}

/// Encode with the RST marker
pub fn encode_rst(operation: Operation, payload: &TokenPayload) -> Result<EncodedPayload, PayloadError> {
    encode_with(PayloadFormat::Rst, operation, payload)
}

/// Encode the unlocking data of a mutable contract transition
pub fn encode_rst_mutable(
    operation: Operation,
    payload: &TokenPayload,
    contract_output_index: i64,
    ref_hash_index: i64,
    ref_index: i64,
    token_output_index: i64,
) -> Result<EncodedMutation, PayloadError> {
    if !matches!(operation, Operation::Mod | Operation::Sl) {
        return Err(PayloadError::UnknownOperation(operation.as_str().into()));
    }
    let encoded = encode_rst(operation, payload)?;
    let script = encoded
        .script
        .push_int(contract_output_index)
        .push_int(ref_hash_index)
        .push_int(ref_index)
        .push_int(token_output_index);
    let script_sig_hash = double_sha256(script.as_bytes());
    Ok(EncodedMutation {
        script,
        payload_hash: encoded.payload_hash,
        script_sig_hash,
    })
}

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Keep only string, number and boolean leaves of an attribute map
pub fn filter_attrs(value: &Value) -> BTreeMap<String, AttrValue> {
    let entries = match value {
        Value::Map(entries) => entries,
        _ => return BTreeMap::new(),
    };
    entries
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_text()?.to_string();
            let attr = match v {
                Value::Text(s) => AttrValue::Text(s.clone()),
                Value::Bool(b) => AttrValue::Bool(*b),
                Value::Integer(i) => AttrValue::Integer(i64::try_from(*i).ok()?),
                Value::Float(f) => AttrValue::Float(*f),
                _ => return None,
            };
            Some((key, attr))
        })
        .collect()
}

/// Allow-list user supplied args
pub fn filter_args(args: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    args.iter()
        .filter(|(k, _)| ALLOWED_ARGS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Tokens are immutable unless `args.i` is explicitly `false`
pub fn is_immutable_token(payload: &TokenPayload) -> bool {
    !matches!(payload.args.get("i"), Some(Value::Bool(false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> TokenPayload {
        let mut payload = TokenPayload::default();
        payload.meta.insert("name".into(), Value::Text("Glyph".into()));
        payload.meta.insert("type".into(), Value::Text("object".into()));
        payload.args.insert("ticker".into(), Value::Text("GLY".into()));
        payload.by_refs.push(Outpoint::from_bytes([1u8; 36]));
        payload.files.insert(
            "main".into(),
            FileDescriptor::Embedded {
                mime: "text/plain".into(),
                data: b"hello".to_vec(),
            },
        );
        payload
    }

    #[test]
    fn test_payload_hash_is_stable_and_order_independent() {
        let a = sample_payload();
        let first = encode_atom(Operation::Nft, &a).unwrap();
        let second = encode_atom(Operation::Nft, &a).unwrap();
        assert_eq!(first.payload_hash, second.payload_hash);
        assert_eq!(first.payload_hash, double_sha256(&first.cbor));

        // Same entries handed to the encoder in a different order
        let reordered = Value::Map(vec![
            (Value::Text("meta".into()), Value::Map(vec![
                (Value::Text("type".into()), Value::Text("object".into())),
                (Value::Text("name".into()), Value::Text("Glyph".into())),
            ])),
            (Value::Text("args".into()), Value::Map(vec![
                (Value::Text("ticker".into()), Value::Text("GLY".into())),
            ])),
        ]);
        let mut direct = Vec::new();
        ciborium::into_writer(&canonicalize(reordered), &mut direct).unwrap();
        let mut expected = TokenPayload::default();
        expected.meta = a.meta.clone();
        expected.args = a.args.clone();
        assert_eq!(direct, expected.to_cbor().unwrap());
    }

    #[test]
    fn test_payload_hash_changes_with_content() {
        let a = sample_payload();
        let mut b = sample_payload();
        b.meta.insert("name".into(), Value::Text("Other".into()));
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_decode_round_trip() {
        let payload = sample_payload();
        let encoded = encode_rst(Operation::Nft, &payload).unwrap();
        // Decoding works inside a larger unlock script
        let script = Script::new()
            .push(&[0x30; 71])
            .push(&[0x02; 33])
            .append(&encoded.script);
        let decoded = decode_atom(&script).unwrap();
        assert_eq!(decoded.format, PayloadFormat::Rst);
        assert_eq!(decoded.operation, Operation::Nft);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_decode_rejects_missing_magic_or_bad_cbor() {
        let plain = Script::new().push(b"abcd").push(b"nft").push(&[0xa1]);
        assert!(decode_atom(&plain).is_none());

        let bad = Script::new().push(&ATOM_MAGIC).push(b"nft").push(&[0xff, 0x00]);
        assert!(decode_atom(&bad).is_none());
        assert!(decode_atom(&Script::new()).is_none());
    }

    #[test]
    fn test_immutability_default() {
        let mut payload = TokenPayload::default();
        assert!(is_immutable_token(&payload));
        payload.args.insert("i".into(), Value::Bool(false));
        assert!(!is_immutable_token(&payload));
        payload.args.insert("i".into(), Value::Bool(true));
        assert!(is_immutable_token(&payload));
        payload.args.insert("i".into(), Value::Integer(0.into()));
        assert!(is_immutable_token(&payload));
    }

    #[test]
    fn test_filter_attrs_and_args() {
        let attrs = Value::Map(vec![
            (Value::Text("color".into()), Value::Text("red".into())),
            (Value::Text("level".into()), Value::Integer(3.into())),
            (Value::Text("rare".into()), Value::Bool(true)),
            (Value::Text("nested".into()), Value::Map(vec![])),
            (Value::Text("list".into()), Value::Array(vec![])),
        ]);
        let filtered = filter_attrs(&attrs);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered["level"], AttrValue::Integer(3));

        let mut args = BTreeMap::new();
        args.insert("ticker".to_string(), Value::Text("X".into()));
        args.insert("evil".to_string(), Value::Bool(true));
        let allowed = filter_args(&args);
        assert_eq!(allowed.len(), 1);
        assert!(allowed.contains_key("ticker"));
    }

    #[test]
    fn test_mutable_encoding() {
        let payload = sample_payload();
        let encoded = encode_rst_mutable(Operation::Mod, &payload, 1, 0, 0, 0).unwrap();
        assert_eq!(encoded.payload_hash, payload.hash().unwrap());
        assert_eq!(encoded.script_sig_hash, double_sha256(encoded.script.as_bytes()));
        assert!(encode_rst_mutable(Operation::Nft, &payload, 1, 0, 0, 0).is_err());
        assert!(encode_atom(Operation::Mod, &payload).is_err());

        let decoded = decode_atom(&encoded.script).unwrap();
        assert_eq!(decoded.operation, Operation::Mod);
    }
}
