//! Error types for the Notary Kernel Core.

use thiserror::Error;

use crate::types::KeyId;

/// Core errors that can occur while encoding, signing, or managing keys.
///
/// Verification outcomes are not errors; they are reported through
/// [`crate::verify::VerificationResult`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u16),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    #[error("key {0} has no signing material (retired or verify-only)")]
    KeyNotSigning(KeyId),

    #[error("key {0} is already registered; rotation cannot reuse a key")]
    KeyAlreadyRegistered(KeyId),

    #[error("key {0} is already active; rotate instead")]
    ActiveKeyPresent(KeyId),

    #[error("no active signing key")]
    NoActiveKey,
}
