//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT MAX(version) FROM schema_migrations",
            [],
            |row| row.get::<_, Option<u32>>(0),
        )
        .optional()?
        .flatten()
        .unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {current}, newer than supported {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, Utc::now().timestamp_millis()],
            )?;
        }

        tx.commit()?;
        tracing::info!(from = current, to = CURRENT_VERSION, "store schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Receipts, keyed by lookup hash. The body is the JSON wire form.
        CREATE TABLE receipts (
            receipt_hash BLOB PRIMARY KEY,    -- 32 bytes
            receipt_id TEXT NOT NULL UNIQUE,
            actor_id TEXT NOT NULL,
            chain_sequence INTEGER NOT NULL,
            body TEXT NOT NULL,
            stored_at INTEGER NOT NULL,       -- local time (Unix ms)

            UNIQUE(actor_id, chain_sequence)
        );

        -- One row per actor: the current head
        CREATE TABLE chains (
            actor_id TEXT PRIMARY KEY,
            head_sequence INTEGER NOT NULL,
            head_hash BLOB NOT NULL
        );

        CREATE TABLE commitments (
            commitment_id TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            commitment_hash BLOB NOT NULL,
            created_at INTEGER NOT NULL,      -- Unix ms
            reveal_deadline INTEGER NOT NULL, -- Unix ms
            state TEXT NOT NULL,              -- committed | revealed | expired
            revealed_receipt_hash BLOB
        );

        CREATE INDEX idx_commitments_state_deadline ON commitments(state, reveal_deadline);
        "#,
    )?;

    Ok(())
}

/// Migration v2: the signer's key records, so a restart keeps key history.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Published key records only; secrets never reach the database.
        CREATE TABLE signer_keys (
            signer_id TEXT NOT NULL,
            key_id TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            public_key TEXT,                  -- hex, NULL for shared secrets
            created_at INTEGER NOT NULL,      -- Unix ms
            retired_at INTEGER,               -- Unix ms
            status TEXT NOT NULL,             -- active | retired

            PRIMARY KEY(signer_id, key_id)
        );
        "#,
    )?;

    Ok(())
}
