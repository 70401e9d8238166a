//! # Notary Kernel Core
//!
//! Pure primitives for the Notary Kernel: receipts, canonical encoding,
//! signing, per-actor chain linkage, verification and commit-reveal binding.
//!
//! This crate contains no I/O, no storage, no clock access. Callers pass the
//! current time in where it matters.
//!
//! ## Key Types
//!
//! - [`Receipt`] - A signed attestation of an action or deliberate non-action
//! - [`KeyRegistry`] - The signer's active and retired keys
//! - [`Verifier`] - Itemized, non-failing receipt verification
//! - [`ChainLink`] / [`ChainHead`] - Per-actor hash-chain positions
//! - [`CounterfactualCommitment`] - The committed half of commit-reveal
//!
//! ## Canonicalization
//!
//! Signable fields are encoded as deterministic CBOR under a versioned rule
//! set. See the [`canonical`] module.

pub mod canonical;
pub mod chain;
pub mod commitment;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod receipt;
pub mod signer;
pub mod types;
pub mod verify;

pub use canonical::{SchemaVersion, SignableFields};
pub use chain::{check_link, ChainBreak, ChainHead, ChainLink, ChainReport};
pub use commitment::{
    CommitmentState, CounterfactualCommitment, CounterfactualReveal, RevealRejection,
    COUNTERFACTUAL_ACTION,
};
pub use crypto::{Digest, Ed25519PublicKey, HmacSecret, Keypair, SignatureBytes};
pub use error::CoreError;
pub use keys::{KeyEntry, KeyRegistry, KeyRotation, KeyStatus, PublishedKey};
pub use receipt::{format_timestamp, parse_timestamp, Receipt, ReceiptBuilder, GENESIS};
pub use signer::{SigningAlgorithm, SigningKey, VerifyingKey};
pub use types::{CommitmentId, KeyId, ReceiptId};
pub use verify::{
    CheckStatus, FailureKind, VerificationFailure, VerificationResult, Verifier, VerifyPolicy,
};
