//! # Notary Kernel
//!
//! Tamper-evident receipts for agent actions: each receipt is signed, and
//! each actor's receipts form an append-only hash chain, so edits, deletions
//! and reordering are detectable.
//!
//! ## Overview
//!
//! - **Issue**: sign a receipt and append it to the actor's chain
//! - **Verify**: itemized structure, signature, timestamp and chain checks
//! - **Commit-reveal**: fix a decision's digest before the outcome is known,
//!   then reveal it as a counterfactual receipt
//! - **Keys**: rotate signing keys while old receipts stay verifiable
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notary_kernel::{Notary, NotaryConfig, IssueRequest};
//! use notary_kernel::core::{Digest, SigningAlgorithm, SigningKey};
//! use notary_kernel::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("notary.db").unwrap();
//!     let key = SigningKey::generate(SigningAlgorithm::Ed25519);
//!     let notary = Notary::open("notary-1", key, store, NotaryConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let issued = notary
//!         .issue(IssueRequest {
//!             action_type: "tool_call".into(),
//!             actor_id: "agent-7".into(),
//!             payload_hash: Digest::hash(b"{\"tool\":\"search\"}"),
//!             metadata: None,
//!         })
//!         .await
//!         .unwrap();
//!
//!     let result = notary.verify(&issued.receipt, None).await.unwrap();
//!     assert!(result.valid);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `notary_kernel::core` - Core primitives (Receipt, Verifier, KeyRegistry, ...)
//! - `notary_kernel::store` - Storage abstraction and SQLite

pub mod clock;
pub mod config;
pub mod error;
pub mod linker;
pub mod notary;
pub mod wire;

#[cfg(test)]
mod testing;

pub use notary_kernel_core as core;
pub use notary_kernel_store as store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NotaryConfig;
pub use error::{NotaryError, Result};
pub use linker::ChainLinker;
pub use notary::{Notary, KEY_ROTATION_ACTION};
pub use wire::{
    CommitRequest, CommitResponse, CommitmentStatusResponse, IssueRequest, IssueResponse,
    KeySetResponse, RevealRequest, VerifyRequest,
};

pub use notary_kernel_core::{
    ChainReport, CheckStatus, CommitmentId, CommitmentState, CounterfactualReveal, Digest,
    FailureKind, KeyId, Receipt, ReceiptId, SigningAlgorithm, SigningKey, VerificationResult,
    VerifyPolicy,
};
