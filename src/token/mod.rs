//! Smart tokens
//!
//! Provides the pieces shared by minting and sync:
//! - Outpoints/refs and their string encodings
//! - The Atom/RST CBOR payload codec
//! - Decoded token records
//!
//! # Example
//!
//! ```ignore
//! use radiant_wallet::token::{encode_rst, Operation, TokenPayload};
//!
//! let mut payload = TokenPayload::default();
//! payload.meta.insert("name".into(), ciborium::Value::Text("My NFT".into()));
//! let encoded = encode_rst(Operation::Nft, &payload)?;
//! println!("payload hash {}", hex::encode(encoded.payload_hash));
//! ```

pub mod outpoint;
pub mod payload;
pub mod record;

pub use outpoint::{reverse_ref, Outpoint, OutpointError, OutpointFormat, OUTPOINT_LEN};
pub use payload::{
    canonicalize, decode_atom, encode_atom, encode_rst, encode_rst_mutable, filter_args,
    filter_attrs, is_immutable_token, AttrValue, DecodedPayload, EncodedMutation, EncodedPayload,
    Operation, PayloadError, PayloadFormat, TokenPayload, ATOM_MAGIC, RST_MAGIC,
};
pub use record::{ContractType, FileDescriptor, SmartToken, TokenKind, TokenType};
