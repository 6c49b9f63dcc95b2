//! Smart token records

use ciborium::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::outpoint::Outpoint;
use super::payload::{filter_attrs, is_immutable_token, AttrValue, Operation, TokenPayload};

/// Kind of output tracked by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    /// Plain coins
    Rxd,
    /// Delegate and other bare refs
    Ref,
    Nft,
    Ft,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Rxd => "RXD",
            ContractType::Ref => "REF",
            ContractType::Nft => "NFT",
            ContractType::Ft => "FT",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Ft,
    Nft,
}

/// Role of a token in the author/container graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    User,
    Container,
    #[default]
    Object,
}

impl TokenKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => TokenKind::User,
            "container" => TokenKind::Container,
            _ => TokenKind::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::User => "user",
            TokenKind::Container => "container",
            TokenKind::Object => "object",
        }
    }
}

/// File attached to a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileDescriptor {
    /// `{t: mime, b: bytes}`
    Embedded { mime: String, data: Vec<u8> },
    /// `{t: mime, u: url, h?: hash}`
    Remote {
        mime: String,
        url: String,
        hash: Option<Vec<u8>>,
    },
}

impl FileDescriptor {
    pub fn mime(&self) -> &str {
        match self {
            FileDescriptor::Embedded { mime, .. } | FileDescriptor::Remote { mime, .. } => mime,
        }
    }

    pub fn to_value(&self) -> Value {
        let text = |s: &str| Value::Text(s.to_string());
        let entries = match self {
            FileDescriptor::Embedded { mime, data } => vec![
                (text("t"), text(mime)),
                (text("b"), Value::Bytes(data.clone())),
            ],
            FileDescriptor::Remote { mime, url, hash } => {
                let mut entries = vec![(text("t"), text(mime)), (text("u"), text(url))];
                if let Some(hash) = hash {
                    entries.push((text("h"), Value::Bytes(hash.clone())));
                }
                entries
            }
        };
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let entries = value.as_map()?;
        let get = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v)
        };
        let mime = get("t")?.as_text()?.to_string();
        if let Some(data) = get("b").and_then(Value::as_bytes) {
            return Some(FileDescriptor::Embedded {
                mime,
                data: data.clone(),
            });
        }
        let url = get("u")?.as_text()?.to_string();
        let hash = get("h").and_then(Value::as_bytes).cloned();
        Some(FileDescriptor::Remote { mime, url, hash })
    }
}

/// Decoded token metadata, keyed by its ref
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartToken {
    /// Display orientation
    pub reference: Outpoint,
    pub name: String,
    pub description: String,
    pub ticker: Option<String>,
    pub kind: TokenKind,
    pub token_type: TokenType,
    pub immutable: bool,
    /// Validated author ref, display orientation
    pub author: Option<Outpoint>,
    /// Validated container ref, display orientation
    pub container: Option<Outpoint>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub file: Option<FileDescriptor>,
    /// Owning txo; `None` for related tokens fetched only for display
    pub last_txo_id: Option<u64>,
    pub spent: bool,
    /// Minted by this wallet
    pub fresh: bool,
    pub height: Option<u32>,
    /// Mutable contract ref, display orientation
    pub location: Option<Outpoint>,
    pub swap_pending: bool,
    /// Id in the store, assigned on insert
    #[serde(default)]
    pub id: Option<u64>,
}

impl SmartToken {
    /// Build a record from a reveal payload
    ///
    /// `author`/`container` must already be validated; claims that failed
    /// validation are passed as `None`.
    pub fn from_payload(
        reference: Outpoint,
        operation: Operation,
        payload: &TokenPayload,
        author: Option<Outpoint>,
        container: Option<Outpoint>,
    ) -> Self {
        let token_type = match operation {
            Operation::Ft => TokenType::Ft,
            _ => TokenType::Nft,
        };
        let attrs = payload
            .meta
            .get("attrs")
            .map(filter_attrs)
            .unwrap_or_default();
        Self {
            reference,
            name: payload.meta_str("name").unwrap_or_default().to_string(),
            description: payload.meta_str("desc").unwrap_or_default().to_string(),
            ticker: payload.arg_str("ticker").map(str::to_string),
            kind: payload.meta_str("type").map(TokenKind::parse).unwrap_or_default(),
            token_type,
            immutable: is_immutable_token(payload),
            author,
            container,
            attrs,
            file: payload
                .files
                .get("main")
                .or_else(|| payload.files.values().next())
                .cloned(),
            last_txo_id: None,
            spent: false,
            fresh: false,
            height: None,
            location: None,
            swap_pending: false,
            id: None,
        }
    }
}
