//! Chain linker: hands out chain positions and appends signed receipts.
//!
//! Issuance for one actor is serialized twice over. Inside a process, each
//! actor has its own async lock, so unrelated actors never wait on each
//! other. Across processes sharing a store, the append is conditional on the
//! head the receipt was linked against; a lost race is retried from a fresh
//! head read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use notary_kernel_core::{ChainLink, Digest, Receipt};
use notary_kernel_store::{AppendResult, Store};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{NotaryError, Result};

/// Per-actor lock arena plus the conditional append loop.
pub struct ChainLinker {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_attempts: u32,
}

impl ChainLinker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Take the issuance lock for one actor.
    pub async fn lock_actor(&self, actor_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| NotaryError::LockPoisoned(e.to_string()))?;
            // Drop locks nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(actor_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// The position the next receipt for `actor_id` would take.
    pub async fn next_link<S: Store>(&self, store: &S, actor_id: &str) -> Result<ChainLink> {
        let head = store.get_chain_head(actor_id).await?;
        let link = ChainLink::next(head);
        debug!(actor = actor_id, seq = link.chain_sequence, "next chain link");
        Ok(link)
    }

    /// Link, sign and append a receipt for `actor_id`.
    ///
    /// `build` signs a receipt at the given link. It also gets the head
    /// receipt's timestamp, which the new receipt must not precede. It may
    /// run more than once if another writer advances the head in between;
    /// the head only moves when an append succeeds.
    pub async fn append_with<S, F>(
        &self,
        store: &S,
        actor_id: &str,
        mut build: F,
    ) -> Result<(Receipt, Digest)>
    where
        S: Store,
        F: FnMut(ChainLink, Option<DateTime<Utc>>) -> Result<Receipt>,
    {
        let _guard = self.lock_actor(actor_id).await?;

        for attempt in 1..=self.max_attempts {
            let link = self.next_link(store, actor_id).await?;
            let expected_head = link.expected_head.clone();
            let not_before = match &expected_head {
                Some(head) => store
                    .get_receipt(&head.head_hash)
                    .await?
                    .and_then(|prior| prior.issued_at()),
                None => None,
            };

            let receipt = build(link, not_before)?;
            let receipt_hash = receipt.receipt_hash()?;

            match store
                .append_receipt(&receipt, &receipt_hash, expected_head.as_ref())
                .await?
            {
                AppendResult::Appended => return Ok((receipt, receipt_hash)),
                AppendResult::HeadMoved { current } => {
                    warn!(
                        actor = actor_id,
                        attempt,
                        head = current.as_ref().map(|h| h.head_sequence),
                        "chain head moved during issuance"
                    );
                }
            }
        }

        Err(NotaryError::ConcurrentChainConflict {
            actor_id: actor_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StallingStore;
    use chrono::{Duration, TimeZone};
    use notary_kernel_core::{Keypair, ReceiptBuilder, SigningKey};
    use notary_kernel_store::MemoryStore;
    use std::sync::atomic::Ordering;

    fn key() -> SigningKey {
        SigningKey::Ed25519(Keypair::from_seed(&[3; 32]))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
    }

    fn builder(link: ChainLink, _: Option<DateTime<Utc>>) -> Result<Receipt> {
        Ok(ReceiptBuilder::new("agent-1", "tool_call", Digest::hash(b"payload"))
            .link(link)
            .sign("notary", &key())?)
    }

    #[tokio::test]
    async fn test_first_link_is_genesis() {
        let linker = ChainLinker::new(3);
        let store = MemoryStore::new();
        let link = linker.next_link(&store, "agent-1").await.unwrap();
        assert_eq!(link, ChainLink::genesis());
    }

    #[tokio::test]
    async fn test_append_advances_sequence() {
        let linker = ChainLinker::new(3);
        let store = MemoryStore::new();

        let (first, first_hash) = linker.append_with(&store, "agent-1", builder).await.unwrap();
        let (second, _) = linker.append_with(&store, "agent-1", builder).await.unwrap();

        assert_eq!(first.chain_sequence, 1);
        assert!(first.is_genesis());
        assert_eq!(second.chain_sequence, 2);
        assert_eq!(second.previous_receipt_hash, first_hash);
    }

    #[tokio::test]
    async fn test_builder_sees_head_timestamp() {
        let linker = ChainLinker::new(3);
        let store = MemoryStore::new();

        let mut seen = Vec::new();
        for n in 0..2 {
            linker
                .append_with(&store, "agent-1", |link, not_before| {
                    seen.push(not_before);
                    Ok(ReceiptBuilder::new("agent-1", "tool_call", Digest::hash(b"p"))
                        .link(link)
                        .timestamp(t0() + Duration::seconds(n))
                        .sign("notary", &key())?)
                })
                .await
                .unwrap();
        }

        assert_eq!(seen, vec![None, Some(t0())]);
    }

    #[tokio::test]
    async fn test_signing_failure_leaves_head() {
        let linker = ChainLinker::new(3);
        let store = MemoryStore::new();
        linker.append_with(&store, "agent-1", builder).await.unwrap();

        let err = linker
            .append_with(&store, "agent-1", |_, _| {
                Err(NotaryError::InvalidRequest("signer offline".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NotaryError::InvalidRequest(_)));

        let head = store.get_chain_head("agent-1").await.unwrap().unwrap();
        assert_eq!(head.head_sequence, 1);
    }

    #[tokio::test]
    async fn test_bounded_retries() {
        let linker = ChainLinker::new(4);
        let store = StallingStore::new();
        store.stall_appends(true);

        let err = linker.append_with(&store, "agent-1", builder).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            NotaryError::ConcurrentChainConflict { attempts: 4, .. }
        ));
        assert_eq!(store.append_attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_lock_arena_is_pruned() {
        let linker = ChainLinker::new(1);
        {
            let _a = linker.lock_actor("a").await.unwrap();
            let _b = linker.lock_actor("b").await.unwrap();
        }
        let _c = linker.lock_actor("c").await.unwrap();
        assert_eq!(linker.locks.lock().unwrap().len(), 1);
    }
}
