//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the Notary Kernel. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use notary_kernel_core::{
    ChainHead, CommitmentId, CommitmentState, CounterfactualCommitment, Digest, KeyId, KeyStatus,
    PublishedKey, Receipt, ReceiptId, SigningAlgorithm,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{check_extends, AppendResult, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await?
    }
}

fn digest_from_blob(bytes: Vec<u8>, column: &str) -> Result<Digest> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{column} is not 32 bytes")))?;
    Ok(Digest::from_bytes(bytes))
}

fn seq_from_sql(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative sequence {value}")))
}

fn seq_to_sql(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidData(format!("sequence {value} out of range")))
}

fn time_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp {ms} out of range")))
}

fn read_head(conn: &Connection, actor_id: &str) -> Result<Option<ChainHead>> {
    let row = conn
        .query_row(
            "SELECT head_sequence, head_hash FROM chains WHERE actor_id = ?1",
            params![actor_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )
        .optional()?;

    row.map(|(seq, hash)| {
        Ok(ChainHead {
            actor_id: actor_id.to_string(),
            head_sequence: seq_from_sql(seq)?,
            head_hash: digest_from_blob(hash, "head_hash")?,
        })
    })
    .transpose()
}

fn parse_body(body: Option<String>) -> Result<Option<Receipt>> {
    body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
        .transpose()
}

type CommitmentRow = (String, String, Vec<u8>, i64, i64, String, Option<Vec<u8>>);

fn row_to_commitment(row: CommitmentRow) -> Result<CounterfactualCommitment> {
    let (id, actor_id, hash, created_at, deadline, state, revealed) = row;
    Ok(CounterfactualCommitment {
        commitment_id: CommitmentId::parse(&id)
            .map_err(|e| StoreError::InvalidData(format!("commitment_id: {e}")))?,
        actor_id,
        commitment_hash: digest_from_blob(hash, "commitment_hash")?,
        created_at: time_from_millis(created_at)?,
        reveal_deadline: time_from_millis(deadline)?,
        state: CommitmentState::parse(&state)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown commitment state {state}")))?,
        revealed_receipt_hash: revealed
            .map(|b| digest_from_blob(b, "revealed_receipt_hash"))
            .transpose()?,
    })
}

type KeyRow = (String, String, Option<String>, i64, Option<i64>, String);

fn row_to_key(row: KeyRow) -> Result<PublishedKey> {
    let (key_id, algorithm, public_key, created_at, retired_at, status) = row;
    Ok(PublishedKey {
        key_id: KeyId::new(key_id),
        algorithm: SigningAlgorithm::parse(&algorithm)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown key algorithm {algorithm}")))?,
        public_key,
        created_at: time_from_millis(created_at)?,
        retired_at: retired_at.map(time_from_millis).transpose()?,
        status: KeyStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown key status {status}")))?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn append_receipt(
        &self,
        receipt: &Receipt,
        receipt_hash: &Digest,
        expected_head: Option<&ChainHead>,
    ) -> Result<AppendResult> {
        let receipt = receipt.clone();
        let receipt_hash = *receipt_hash;
        let expected_head = expected_head.cloned();

        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current = read_head(&tx, &receipt.actor_id)?;
            if current != expected_head {
                debug!(actor = %receipt.actor_id, "append rejected: head moved");
                return Ok(AppendResult::HeadMoved { current });
            }
            check_extends(&receipt, expected_head.as_ref()).map_err(StoreError::InvalidData)?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM receipts WHERE receipt_hash = ?1 OR receipt_id = ?2)",
                params![receipt_hash.as_bytes().as_slice(), receipt.receipt_id.to_string()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::Duplicate(format!("receipt {}", receipt.receipt_id)));
            }

            let seq = seq_to_sql(receipt.chain_sequence)?;
            let body = serde_json::to_string(&receipt)?;
            tx.execute(
                "INSERT INTO receipts (
                    receipt_hash, receipt_id, actor_id, chain_sequence, body, stored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    receipt_hash.as_bytes().as_slice(),
                    receipt.receipt_id.to_string(),
                    receipt.actor_id,
                    seq,
                    body,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            tx.execute(
                "INSERT INTO chains (actor_id, head_sequence, head_hash) VALUES (?1, ?2, ?3)
                 ON CONFLICT(actor_id) DO UPDATE SET
                    head_sequence = excluded.head_sequence,
                    head_hash = excluded.head_hash",
                params![receipt.actor_id, seq, receipt_hash.as_bytes().as_slice()],
            )?;

            tx.commit()?;
            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>> {
        let hash = *receipt_hash;
        self.run_blocking(move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM receipts WHERE receipt_hash = ?1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            parse_body(body)
        })
        .await
    }

    async fn get_receipt_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM receipts WHERE receipt_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            parse_body(body)
        })
        .await
    }

    async fn get_receipt_by_position(&self, actor_id: &str, seq: u64) -> Result<Option<Receipt>> {
        let actor_id = actor_id.to_string();
        let seq = seq_to_sql(seq)?;
        self.run_blocking(move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM receipts WHERE actor_id = ?1 AND chain_sequence = ?2",
                    params![actor_id, seq],
                    |row| row.get(0),
                )
                .optional()?;
            parse_body(body)
        })
        .await
    }

    async fn get_receipts_range(&self, actor_id: &str, start: u64, end: u64) -> Result<Vec<Receipt>> {
        let actor_id = actor_id.to_string();
        let start = seq_to_sql(start)?;
        let end = seq_to_sql(end.min(i64::MAX as u64))?;
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM receipts
                 WHERE actor_id = ?1 AND chain_sequence >= ?2 AND chain_sequence <= ?3
                 ORDER BY chain_sequence",
            )?;
            let bodies = stmt
                .query_map(params![actor_id, start, end], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            bodies
                .iter()
                .map(|b| serde_json::from_str(b).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    async fn get_chain_head(&self, actor_id: &str) -> Result<Option<ChainHead>> {
        let actor_id = actor_id.to_string();
        self.run_blocking(move |conn| read_head(conn, &actor_id)).await
    }

    async fn list_actors(&self) -> Result<Vec<String>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare("SELECT actor_id FROM chains ORDER BY actor_id")?;
            let actors = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(actors)
        })
        .await
    }

    async fn insert_commitment(&self, commitment: &CounterfactualCommitment) -> Result<()> {
        let c = commitment.clone();
        self.run_blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO commitments (
                    commitment_id, actor_id, commitment_hash, created_at,
                    reveal_deadline, state, revealed_receipt_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    c.commitment_id.to_string(),
                    c.actor_id,
                    c.commitment_hash.as_bytes().as_slice(),
                    c.created_at.timestamp_millis(),
                    c.reveal_deadline.timestamp_millis(),
                    c.state.as_str(),
                    c.revealed_receipt_hash.as_ref().map(|h| h.as_bytes().to_vec()),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Duplicate(format!("commitment {}", c.commitment_id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_commitment(&self, id: &CommitmentId) -> Result<Option<CounterfactualCommitment>> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let row: Option<CommitmentRow> = conn
                .query_row(
                    "SELECT commitment_id, actor_id, commitment_hash, created_at,
                            reveal_deadline, state, revealed_receipt_hash
                     FROM commitments WHERE commitment_id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()?;
            row.map(row_to_commitment).transpose()
        })
        .await
    }

    async fn transition_commitment(
        &self,
        id: &CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
        revealed_receipt_hash: Option<Digest>,
    ) -> Result<bool> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE commitments SET state = ?1, revealed_receipt_hash = ?2
                 WHERE commitment_id = ?3 AND state = ?4",
                params![
                    to.as_str(),
                    revealed_receipt_hash.as_ref().map(|h| h.as_bytes().to_vec()),
                    id,
                    from.as_str(),
                ],
            )?;
            if changed == 1 {
                return Ok(true);
            }

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM commitments WHERE commitment_id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if exists {
                Ok(false)
            } else {
                Err(StoreError::NotFound(format!("commitment {id}")))
            }
        })
        .await
    }

    async fn expire_commitments(&self, now: DateTime<Utc>) -> Result<Vec<CommitmentId>> {
        let now_ms = now.timestamp_millis();
        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT commitment_id FROM commitments
                     WHERE state = ?1 AND reveal_deadline < ?2
                     ORDER BY commitment_id",
                )?;
                let ids = stmt
                    .query_map(
                        params![CommitmentState::Committed.as_str(), now_ms],
                        |row| row.get::<_, String>(0),
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            tx.execute(
                "UPDATE commitments SET state = ?1 WHERE state = ?2 AND reveal_deadline < ?3",
                params![
                    CommitmentState::Expired.as_str(),
                    CommitmentState::Committed.as_str(),
                    now_ms,
                ],
            )?;
            tx.commit()?;

            let mut expired = ids
                .iter()
                .map(|id| {
                    CommitmentId::parse(id)
                        .map_err(|e| StoreError::InvalidData(format!("commitment_id: {e}")))
                })
                .collect::<Result<Vec<_>>>()?;
            expired.sort();
            Ok(expired)
        })
        .await
    }

    async fn save_keys(&self, signer_id: &str, keys: &[PublishedKey]) -> Result<()> {
        let signer_id = signer_id.to_string();
        let keys = keys.to_vec();
        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO signer_keys
                        (signer_id, key_id, algorithm, public_key, created_at, retired_at, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(signer_id, key_id) DO UPDATE SET
                        retired_at = excluded.retired_at,
                        status = excluded.status",
                )?;
                for key in &keys {
                    stmt.execute(params![
                        signer_id,
                        key.key_id.as_str(),
                        key.algorithm.as_str(),
                        key.public_key,
                        key.created_at.timestamp_millis(),
                        key.retired_at.map(|t| t.timestamp_millis()),
                        key.status.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
            debug!(signer = %signer_id, count = keys.len(), "key records saved");
            Ok(())
        })
        .await
    }

    async fn load_keys(&self, signer_id: &str) -> Result<Vec<PublishedKey>> {
        let signer_id = signer_id.to_string();
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key_id, algorithm, public_key, created_at, retired_at, status
                 FROM signer_keys WHERE signer_id = ?1
                 ORDER BY created_at, key_id",
            )?;
            let rows = stmt
                .query_map(params![signer_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<KeyRow>>>()?;
            rows.into_iter().map(row_to_key).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{commitment, published_keys, signed_chain};
    use chrono::Duration;

    async fn append_all(store: &SqliteStore, chain: &[(Receipt, Digest)]) {
        let mut head = None;
        for (receipt, hash) in chain {
            let result = store.append_receipt(receipt, hash, head.as_ref()).await.unwrap();
            assert_eq!(result, AppendResult::Appended);
            head = store.get_chain_head(&receipt.actor_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_append_and_get_receipt() {
        let store = SqliteStore::open_memory().unwrap();
        let chain = signed_chain("agent-1", 3);
        append_all(&store, &chain).await;

        let (r3, h3) = &chain[2];
        assert_eq!(store.get_receipt(h3).await.unwrap().as_ref(), Some(r3));
        assert_eq!(store.get_receipt_by_id(&r3.receipt_id).await.unwrap().as_ref(), Some(r3));
        assert_eq!(store.get_receipt_by_position("agent-1", 3).await.unwrap().as_ref(), Some(r3));
        assert!(store.get_receipt(&Digest::hash(b"nope")).await.unwrap().is_none());

        let head = store.get_chain_head("agent-1").await.unwrap().unwrap();
        assert_eq!(head.head_sequence, 3);
        assert_eq!(head.head_hash, *h3);
    }

    #[tokio::test]
    async fn test_head_moved() {
        let store = SqliteStore::open_memory().unwrap();
        let chain = signed_chain("agent-1", 2);
        append_all(&store, &chain).await;

        // Linking against a stale head
        let stale = ChainHead {
            actor_id: "agent-1".into(),
            head_sequence: 1,
            head_hash: chain[0].1,
        };
        let result = store
            .append_receipt(&chain[1].0, &chain[1].1, Some(&stale))
            .await
            .unwrap();
        match result {
            AppendResult::HeadMoved { current } => {
                assert_eq!(current.unwrap().head_sequence, 2);
            }
            other => panic!("expected HeadMoved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_range_and_actors() {
        let store = SqliteStore::open_memory().unwrap();
        append_all(&store, &signed_chain("agent-b", 4)).await;
        append_all(&store, &signed_chain("agent-a", 1)).await;

        let range = store.get_receipts_range("agent-b", 2, 3).await.unwrap();
        let seqs: Vec<u64> = range.iter().map(|r| r.chain_sequence).collect();
        assert_eq!(seqs, vec![2, 3]);

        let all = store.get_receipts_range("agent-b", 1, u64::MAX).await.unwrap();
        assert_eq!(all.len(), 4);

        assert_eq!(
            store.list_actors().await.unwrap(),
            vec!["agent-a".to_string(), "agent-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_commitment_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let c = commitment(Duration::minutes(5));
        store.insert_commitment(&c).await.unwrap();
        assert!(matches!(
            store.insert_commitment(&c).await,
            Err(StoreError::Duplicate(_))
        ));

        let fetched = store.get_commitment(&c.commitment_id).await.unwrap().unwrap();
        assert_eq!(fetched, c);

        let hash = Digest::hash(b"reveal receipt");
        assert!(store
            .transition_commitment(&c.commitment_id, CommitmentState::Committed, CommitmentState::Revealed, Some(hash))
            .await
            .unwrap());
        assert!(!store
            .transition_commitment(&c.commitment_id, CommitmentState::Committed, CommitmentState::Revealed, Some(hash))
            .await
            .unwrap());

        let missing = CommitmentId::generate();
        assert!(matches!(
            store
                .transition_commitment(&missing, CommitmentState::Committed, CommitmentState::Expired, None)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expire_commitments() {
        let store = SqliteStore::open_memory().unwrap();
        let late = commitment(Duration::seconds(-30));
        let fresh = commitment(Duration::minutes(30));
        store.insert_commitment(&late).await.unwrap();
        store.insert_commitment(&fresh).await.unwrap();

        let expired = store.expire_commitments(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![late.commitment_id]);

        let late = store.get_commitment(&late.commitment_id).await.unwrap().unwrap();
        assert_eq!(late.state, CommitmentState::Expired);
    }

    #[tokio::test]
    async fn test_key_records_upsert() {
        let store = SqliteStore::open_memory().unwrap();
        let mut keys = published_keys();
        store.save_keys("notary", &keys[..1]).await.unwrap();
        assert_eq!(store.load_keys("notary").await.unwrap(), keys[..1]);

        // Retiring the first key updates its row in place.
        keys[0].status = KeyStatus::Retired;
        keys[0].retired_at = Some(keys[1].created_at);
        store.save_keys("notary", &keys).await.unwrap();
        assert_eq!(store.load_keys("notary").await.unwrap(), keys);
        assert!(store.load_keys("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notary.db");
        let chain = signed_chain("agent-1", 2);

        {
            let store = SqliteStore::open(&path).unwrap();
            append_all(&store, &chain).await;
        }

        let store = SqliteStore::open(&path).unwrap();
        let head = store.get_chain_head("agent-1").await.unwrap().unwrap();
        assert_eq!(head.head_sequence, 2);
        assert_eq!(
            store.get_receipt(&chain[1].1).await.unwrap().as_ref(),
            Some(&chain[1].0)
        );
    }
}
