//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! Every text and byte field carries its own length header, so field
//! boundaries are unambiguous whatever bytes a field contains.
//!
//! The rule set is selected by [`SchemaVersion`], never by inspecting the
//! fields. Old versions are kept so that historical receipts stay verifiable.

use ciborium::value::Value;

use crate::crypto::Digest;
use crate::error::CoreError;
use crate::signer::SigningAlgorithm;
use crate::types::{KeyId, ReceiptId};

/// Domain tag prefixed to the v2 signing message.
pub const RECEIPT_SIG_DOMAIN_V2: &[u8] = b"notary/receipt-sig/v2";

/// Closed set of canonical encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// Ten signed fields, no domain prefix.
    V1,
    /// Domain-prefixed; also signs the schema version and metadata hash.
    V2,
}

impl SchemaVersion {
    /// The version used for newly issued receipts.
    pub const CURRENT: Self = Self::V2;

    /// Resolve a wire tag.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// The wire tag.
    pub fn tag(self) -> u16 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const RECEIPT_ID: u64 = 0;
    pub const TIMESTAMP: u64 = 1;
    pub const ACTOR_ID: u64 = 2;
    pub const ACTION_TYPE: u64 = 3;
    pub const PAYLOAD_HASH: u64 = 4;
    pub const PREVIOUS_RECEIPT_HASH: u64 = 5;
    pub const CHAIN_SEQUENCE: u64 = 6;
    pub const SIGNER_ID: u64 = 7;
    pub const KEY_ID: u64 = 8;
    pub const ALGORITHM: u64 = 9;
    // v2
    pub const SCHEMA_VERSION: u64 = 10;
    pub const METADATA_HASH: u64 = 11;
}

/// The signed subset of a receipt.
#[derive(Debug, Clone, Copy)]
pub struct SignableFields<'a> {
    pub receipt_id: &'a ReceiptId,
    pub timestamp: &'a str,
    pub actor_id: &'a str,
    pub action_type: &'a str,
    pub payload_hash: &'a Digest,
    pub previous_receipt_hash: &'a Digest,
    pub chain_sequence: u64,
    pub signer_id: &'a str,
    pub key_id: &'a KeyId,
    pub algorithm: SigningAlgorithm,
    pub metadata_hash: Option<&'a Digest>,
}

/// Encode the signable fields under the given version.
///
/// Fails with [`CoreError::MissingField`] if a required field is empty.
pub fn encode(fields: &SignableFields<'_>, version: SchemaVersion) -> Result<Vec<u8>, CoreError> {
    check_required(fields)?;
    match version {
        SchemaVersion::V1 => encode_v1(fields),
        SchemaVersion::V2 => encode_v2(fields),
    }
}

fn check_required(fields: &SignableFields<'_>) -> Result<(), CoreError> {
    if fields.receipt_id.is_nil() {
        return Err(CoreError::MissingField("receipt_id"));
    }
    let text = [
        ("timestamp", fields.timestamp),
        ("actor_id", fields.actor_id),
        ("action_type", fields.action_type),
        ("signer_id", fields.signer_id),
        ("key_id", fields.key_id.as_str()),
    ];
    for (name, value) in text {
        if value.is_empty() {
            return Err(CoreError::MissingField(name));
        }
    }
    if fields.chain_sequence == 0 {
        return Err(CoreError::MissingField("chain_sequence"));
    }
    Ok(())
}

fn v1_entries(fields: &SignableFields<'_>) -> Vec<(Value, Value)> {
    vec![
        (
            Value::Integer(keys::RECEIPT_ID.into()),
            Value::Bytes(fields.receipt_id.0.as_bytes().to_vec()),
        ),
        (
            Value::Integer(keys::TIMESTAMP.into()),
            Value::Text(fields.timestamp.to_string()),
        ),
        (
            Value::Integer(keys::ACTOR_ID.into()),
            Value::Text(fields.actor_id.to_string()),
        ),
        (
            Value::Integer(keys::ACTION_TYPE.into()),
            Value::Text(fields.action_type.to_string()),
        ),
        (
            Value::Integer(keys::PAYLOAD_HASH.into()),
            Value::Bytes(fields.payload_hash.0.to_vec()),
        ),
        (
            Value::Integer(keys::PREVIOUS_RECEIPT_HASH.into()),
            Value::Bytes(fields.previous_receipt_hash.0.to_vec()),
        ),
        (
            Value::Integer(keys::CHAIN_SEQUENCE.into()),
            Value::Integer(fields.chain_sequence.into()),
        ),
        (
            Value::Integer(keys::SIGNER_ID.into()),
            Value::Text(fields.signer_id.to_string()),
        ),
        (
            Value::Integer(keys::KEY_ID.into()),
            Value::Text(fields.key_id.as_str().to_string()),
        ),
        (
            Value::Integer(keys::ALGORITHM.into()),
            Value::Text(fields.algorithm.as_str().to_string()),
        ),
    ]
}

fn encode_v1(fields: &SignableFields<'_>) -> Result<Vec<u8>, CoreError> {
    encode_value(&Value::Map(v1_entries(fields)))
}

fn encode_v2(fields: &SignableFields<'_>) -> Result<Vec<u8>, CoreError> {
    let mut entries = v1_entries(fields);
    entries.push((
        Value::Integer(keys::SCHEMA_VERSION.into()),
        Value::Integer(SchemaVersion::V2.tag().into()),
    ));
    let metadata = match fields.metadata_hash {
        Some(hash) => Value::Bytes(hash.0.to_vec()),
        None => Value::Null,
    };
    entries.push((Value::Integer(keys::METADATA_HASH.into()), metadata));

    let mut buf = RECEIPT_SIG_DOMAIN_V2.to_vec();
    encode_value_to(&mut buf, &Value::Map(entries))?;
    Ok(buf)
}

/// Encode a CBOR Value to canonical bytes.
///
/// This function ensures:
/// - Map keys are sorted by encoded byte comparison
/// - Integers use smallest encoding
/// - Definite lengths only
pub fn encode_value(value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Encode a definite-length array of text strings.
pub fn encode_text_array(items: &[&str]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_uint(&mut buf, 4, items.len() as u64);
    for item in items {
        encode_text(&mut buf, item);
    }
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr)?,
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::EncodingError(
                "floats not supported in canonical encoding".into(),
            ))
        }
        _ => {
            return Err(CoreError::EncodingError(
                "unsupported CBOR value type".into(),
            ))
        }
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<(), CoreError> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut key_value_pairs = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        key_value_pairs.push((key_buf, v));
    }

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if key_value_pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(CoreError::EncodingError("duplicate map key".into()));
    }

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}
