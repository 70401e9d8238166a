//! The notary on the SQLite backend.

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;

use notary_kernel::store::SqliteStore;
use notary_kernel::{
    CommitRequest, CommitmentState, Digest, IssueRequest, ManualClock, Notary, NotaryConfig,
    NotaryError, RevealRequest, SigningAlgorithm, SigningKey,
};
use notary_kernel::core::{CoreError, KeyStatus};
use notary_kernel_testkit::{epoch, init_tracing, kyc_decline, signing_key, SIGNER_ID};

async fn open_with_key(
    path: &Path,
    clock: Arc<ManualClock>,
    key: SigningKey,
) -> anyhow::Result<Notary<SqliteStore>> {
    let store = SqliteStore::open(path)?;
    let notary = Notary::open_with_clock(SIGNER_ID, key, store, NotaryConfig::default(), clock).await?;
    Ok(notary)
}

async fn open(path: &Path, clock: Arc<ManualClock>) -> anyhow::Result<Notary<SqliteStore>> {
    open_with_key(path, clock, signing_key(SigningAlgorithm::Ed25519, 0x42)).await
}

fn request(n: u8) -> IssueRequest {
    IssueRequest {
        action_type: "tool_call".into(),
        actor_id: "agent-7".into(),
        payload_hash: Digest::hash(&[n]),
        metadata: Some(serde_json::json!({ "n": n })),
    }
}

#[tokio::test]
async fn test_chain_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let path = dir.path().join("notary.db");
    let clock = Arc::new(ManualClock::new(epoch()));

    let last = {
        let notary = open(&path, clock.clone()).await?;
        let mut last = None;
        for n in 0..3 {
            last = Some(notary.issue(request(n)).await?);
            clock.advance(Duration::seconds(1));
        }
        last
    };
    let last = last.expect("three receipts issued");

    // Down for longer than the key clock skew.
    clock.advance(Duration::hours(1));
    let notary = open(&path, clock.clone()).await?;
    let restored = notary.verify_by_hash(&last.receipt_hash.to_hex()).await?;
    assert!(restored.valid, "{:?}", restored.reason);
    assert!(restored.timestamp_valid);
    let next = notary.issue(request(3)).await?;
    assert_eq!(next.receipt.chain_sequence, 4);
    assert_eq!(next.receipt.previous_receipt_hash, last.receipt_hash);

    let stored = notary.get_receipt(&last.receipt_hash).await?;
    assert_eq!(stored.as_ref(), Some(&last.receipt));

    let report = notary.verify_chain("agent-7").await?;
    assert_eq!(report.verified, 4);
    assert!(report.first_broken.is_none());

    let result = notary.verify_by_hash(&next.receipt_hash.to_hex()).await?;
    assert!(result.valid, "{:?}", result.reason);
    Ok(())
}

#[tokio::test]
async fn test_commit_reveal_on_sqlite() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("notary.db");
    let clock = Arc::new(ManualClock::new(epoch()));
    let notary = open(&path, clock.clone()).await?;

    let deadline = notary.now() + Duration::minutes(10);
    let open_one = notary
        .commit(CommitRequest {
            actor_id: "agent-kyc".into(),
            fields: kyc_decline(),
            deadline,
        })
        .await?;
    let lapsing = notary
        .commit(CommitRequest {
            actor_id: "agent-kyc".into(),
            fields: kyc_decline(),
            deadline: notary.now() + Duration::minutes(1),
        })
        .await?;

    clock.advance(Duration::minutes(5));
    assert_eq!(notary.sweep_expired_commitments().await?, vec![lapsing.commitment_id]);

    let revealed = notary
        .reveal(RevealRequest {
            commitment_id: open_one.commitment_id,
            fields: kyc_decline(),
        })
        .await?;
    assert_eq!(revealed.receipt.chain_sequence, 1);

    let late = notary
        .reveal(RevealRequest {
            commitment_id: lapsing.commitment_id,
            fields: kyc_decline(),
        })
        .await;
    assert!(matches!(late, Err(NotaryError::CommitmentExpired(_))));

    // State survives a reopen.
    drop(notary);
    let notary = open(&path, clock).await?;
    let status = notary.commitment_status(&open_one.commitment_id).await?;
    assert_eq!(status.state, CommitmentState::Revealed);
    assert_eq!(status.revealed_receipt_hash, Some(revealed.receipt_hash));
    assert_eq!(status.reveal_deadline, deadline);
    Ok(())
}

#[tokio::test]
async fn test_rotation_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let path = dir.path().join("notary.db");
    let clock = Arc::new(ManualClock::new(epoch()));
    let next_key = signing_key(SigningAlgorithm::Ed25519, 0x43);

    let (before, rotation) = {
        let notary = open(&path, clock.clone()).await?;
        let before = notary.issue(request(0)).await?;
        clock.advance(Duration::days(1));
        let rotation = notary.rotate_key(next_key.clone()).await?;
        (before, rotation)
    };

    clock.advance(Duration::days(1));
    let notary = open_with_key(&path, clock.clone(), next_key.clone()).await?;
    let keys = notary.published_keys()?;
    assert_eq!(keys.keys.len(), 2);
    assert_eq!(keys.active_key_id, Some(next_key.key_id()));
    assert_eq!(keys.keys[0].status, KeyStatus::Retired);

    // Receipts signed by the retired key still verify.
    for hash in [before.receipt_hash, rotation.receipt_hash] {
        let result = notary.verify_by_hash(&hash.to_hex()).await?;
        assert!(result.valid, "{:?}", result.reason);
    }
    let after = notary.issue(request(1)).await?;
    assert_eq!(after.receipt.key_id, next_key.key_id());
    assert_eq!(after.receipt.chain_sequence, 2);
    Ok(())
}

#[tokio::test]
async fn test_reopen_with_retired_key_refused() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("notary.db");
    let clock = Arc::new(ManualClock::new(epoch()));

    {
        let notary = open(&path, clock.clone()).await?;
        notary
            .rotate_key(signing_key(SigningAlgorithm::Ed25519, 0x43))
            .await?;
    }

    let err = match open(&path, clock.clone()).await {
        Ok(_) => panic!("reopened with a retired key"),
        Err(e) => e,
    };
    assert!(
        matches!(
            err.downcast_ref::<NotaryError>(),
            Some(NotaryError::Core(CoreError::KeyAlreadyRegistered(_)))
        ),
        "{err}"
    );

    // A key the signer never rotated to cannot take over either.
    let stranger = signing_key(SigningAlgorithm::Ed25519, 0x50);
    let err = match open_with_key(&path, clock, stranger).await {
        Ok(_) => panic!("reopened with an unrecorded key"),
        Err(e) => e,
    };
    assert!(
        matches!(
            err.downcast_ref::<NotaryError>(),
            Some(NotaryError::Core(CoreError::ActiveKeyPresent(_)))
        ),
        "{err}"
    );
    Ok(())
}
