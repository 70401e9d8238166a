//! # Notary Kernel Store
//!
//! Storage abstraction for the Notary Kernel. Provides a trait-based interface
//! for receipts, chain heads and commitments, with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AppendResult`] - Outcome of a conditional append
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notary_kernel_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("notary.db").unwrap();
//!     let head = store.get_chain_head("agent-7").await.unwrap();
//!     println!("{:?}", head);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Conditional append**: the receipt row and the head update commit
//!   together, and only if the head is still the one the caller linked to
//! - **Append-only**: receipts are never updated or deleted
//! - **Commitments** move between states by compare-and-swap

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, Store};

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, SubsecRound, Utc};
    use notary_kernel_core::{
        ChainHead, ChainLink, CommitmentId, CommitmentState, CounterfactualCommitment, Digest,
        KeyId, KeyStatus, Keypair, PublishedKey, Receipt, ReceiptBuilder, SigningAlgorithm,
        SigningKey,
    };

    /// A well-linked chain of `len` receipts for one actor, with lookup hashes.
    pub fn signed_chain(actor: &str, len: u64) -> Vec<(Receipt, Digest)> {
        let key = SigningKey::Ed25519(Keypair::from_seed(&[7; 32]));
        let mut head: Option<ChainHead> = None;
        let mut out = Vec::new();
        for i in 0..len {
            let receipt = ReceiptBuilder::new(actor, "tool_call", Digest::hash(&i.to_le_bytes()))
                .link(ChainLink::next(head.clone()))
                .sign("notary-test", &key)
                .unwrap();
            let hash = receipt.receipt_hash().unwrap();
            head = Some(match head {
                None => ChainHead {
                    actor_id: actor.to_string(),
                    head_sequence: 1,
                    head_hash: hash,
                },
                Some(h) => h.advance(hash),
            });
            out.push((receipt, hash));
        }
        out
    }

    /// A fresh commitment whose deadline is `ttl` from now.
    pub fn commitment(ttl: Duration) -> CounterfactualCommitment {
        let now = Utc::now().trunc_subsecs(3);
        CounterfactualCommitment {
            commitment_id: CommitmentId::generate(),
            actor_id: "agent-1".into(),
            commitment_hash: Digest::hash(b"sealed"),
            created_at: now,
            reveal_deadline: now + ttl,
            state: CommitmentState::Committed,
            revealed_receipt_hash: None,
        }
    }

    /// Two key records an hour apart, as a registry would publish them.
    pub fn published_keys() -> Vec<PublishedKey> {
        let now = Utc::now().trunc_subsecs(3);
        let ed = SigningKey::Ed25519(Keypair::from_seed(&[7; 32]));
        vec![
            PublishedKey {
                key_id: ed.key_id(),
                algorithm: SigningAlgorithm::Ed25519,
                public_key: ed.verifying_key().public_material(),
                created_at: now,
                retired_at: None,
                status: KeyStatus::Active,
            },
            PublishedKey {
                key_id: KeyId::new("hmac:0000000000000001"),
                algorithm: SigningAlgorithm::HmacSha256,
                public_key: None,
                created_at: now + Duration::hours(1),
                retired_at: None,
                status: KeyStatus::Active,
            },
        ]
    }
}
