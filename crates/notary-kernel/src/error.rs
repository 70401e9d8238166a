//! Error types for the Notary.

use notary_kernel_core::{CommitmentId, CoreError, KeyId};
use notary_kernel_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Notary operations.
///
/// An invalid receipt is not an error: verification outcomes are returned
/// as a `VerificationResult`.
#[derive(Debug, Error)]
pub enum NotaryError {
    /// Core encoding or key registry error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// No usable signing key.
    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    /// Lost the race for an actor's chain head on every attempt.
    #[error("chain head for {actor_id} kept moving after {attempts} attempts")]
    ConcurrentChainConflict { actor_id: String, attempts: u32 },

    /// The revealed fields do not hash to the commitment.
    #[error("revealed fields do not match commitment {0}")]
    RevealMismatch(CommitmentId),

    /// Reveal after the deadline, or after the commitment was settled.
    #[error("commitment {0} is expired or already revealed")]
    CommitmentExpired(CommitmentId),

    #[error("commitment not found: {0}")]
    CommitmentNotFound(CommitmentId),

    #[error("receipt not found: {0}")]
    ReceiptNotFound(String),

    /// Request rejected before any state changed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl NotaryError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentChainConflict { .. })
    }
}

/// Result type for Notary operations.
pub type Result<T> = std::result::Result<T, NotaryError>;
