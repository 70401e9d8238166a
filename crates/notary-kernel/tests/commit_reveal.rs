//! Commit-reveal for counterfactual receipts.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use notary_kernel::core::COUNTERFACTUAL_ACTION;
use notary_kernel::store::Store;
use notary_kernel::{
    CommitRequest, CommitmentId, CommitmentState, CounterfactualReveal, Digest, IssueRequest,
    NotaryError, RevealRequest,
};
use notary_kernel_testkit::{init_tracing, kyc_decline, TestFixture};

const ACTOR: &str = "agent-kyc";

fn commit_request(fixture: &TestFixture, fields: CounterfactualReveal, ttl: Duration) -> CommitRequest {
    CommitRequest {
        actor_id: ACTOR.into(),
        fields,
        deadline: fixture.notary.now() + ttl,
    }
}

fn reveal_request(commitment_id: CommitmentId, fields: CounterfactualReveal) -> RevealRequest {
    RevealRequest {
        commitment_id,
        fields,
    }
}

async fn issue_prior(fixture: &TestFixture) -> Digest {
    fixture
        .notary
        .issue(IssueRequest {
            action_type: "kyc_check".into(),
            actor_id: ACTOR.into(),
            payload_hash: Digest::hash(b"applicant-118"),
            metadata: None,
        })
        .await
        .unwrap()
        .receipt_hash
}

#[tokio::test]
async fn test_kyc_decline_reveal() {
    init_tracing();
    let fixture = TestFixture::new();
    let prior_hash = issue_prior(&fixture).await;

    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();
    assert_eq!(committed.commitment_hash, kyc_decline().commitment_hash());

    fixture.advance(Duration::minutes(4));
    let revealed = fixture
        .notary
        .reveal(reveal_request(committed.commitment_id, kyc_decline()))
        .await
        .unwrap();

    let receipt = &revealed.receipt;
    assert_eq!(receipt.action_type, COUNTERFACTUAL_ACTION);
    assert_eq!(receipt.actor_id, ACTOR);
    assert_eq!(receipt.chain_sequence, 2);
    assert_eq!(receipt.previous_receipt_hash, prior_hash);
    assert_eq!(receipt.payload_hash, committed.commitment_hash);

    let metadata = receipt.metadata.as_ref().unwrap();
    assert_eq!(metadata["commitment_id"], json!(committed.commitment_id.to_string()));
    assert_eq!(metadata["decision"], json!("decline"));
    assert_eq!(metadata["reason"], json!("KYC failed"));
    assert_eq!(metadata["decision_proof"], json!("policy:AML-2024-07"));

    let result = fixture.notary.verify(receipt, None).await.unwrap();
    assert!(result.valid, "{:?}", result.reason);

    let status = fixture
        .notary
        .commitment_status(&committed.commitment_id)
        .await
        .unwrap();
    assert_eq!(status.state, CommitmentState::Revealed);
    assert_eq!(status.revealed_receipt_hash, Some(revealed.receipt_hash));
}

#[tokio::test]
async fn test_trailing_period_is_mismatch() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();

    let altered = CounterfactualReveal {
        reason: "KYC failed.".into(),
        ..kyc_decline()
    };
    let err = fixture
        .notary
        .reveal(reveal_request(committed.commitment_id, altered))
        .await
        .unwrap_err();
    assert!(matches!(err, NotaryError::RevealMismatch(id) if id == committed.commitment_id));

    // A rejected reveal leaves the commitment open and the chain untouched.
    let status = fixture
        .notary
        .commitment_status(&committed.commitment_id)
        .await
        .unwrap();
    assert_eq!(status.state, CommitmentState::Committed);
    assert!(fixture.notary.store().get_chain_head(ACTOR).await.unwrap().is_none());

    fixture
        .notary
        .reveal(reveal_request(committed.commitment_id, kyc_decline()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_any_field_change_is_mismatch() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();

    let mutations: [fn(&mut CounterfactualReveal); 5] = [
        |f| f.decision.push('s'),
        |f| f.reason.insert(0, ' '),
        |f| f.capability_proof = f.capability_proof.replace('5', "6"),
        |f| f.opportunity_proof.truncate(8),
        |f| f.decision_proof = f.decision_proof.to_lowercase(),
    ];
    for mutate in mutations {
        let mut fields = kyc_decline();
        mutate(&mut fields);
        assert_ne!(fields, kyc_decline());

        let result = fixture
            .notary
            .reveal(reveal_request(committed.commitment_id, fields))
            .await;
        assert!(matches!(result, Err(NotaryError::RevealMismatch(_))));
    }
}

#[tokio::test]
async fn test_field_boundaries_are_bound() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();

    // Same concatenated text, split differently across fields.
    let shifted = CounterfactualReveal {
        decision: "declineK".into(),
        reason: "YC failed".into(),
        ..kyc_decline()
    };
    let result = fixture
        .notary
        .reveal(reveal_request(committed.commitment_id, shifted))
        .await;
    assert!(matches!(result, Err(NotaryError::RevealMismatch(_))));
}

#[tokio::test]
async fn test_late_reveal_is_expired() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();

    fixture.advance(Duration::minutes(11));
    let err = fixture
        .notary
        .reveal(reveal_request(committed.commitment_id, kyc_decline()))
        .await
        .unwrap_err();
    assert!(matches!(err, NotaryError::CommitmentExpired(_)));
    assert!(fixture.notary.store().get_chain_head(ACTOR).await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_reveal_is_expired() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();
    let request = reveal_request(committed.commitment_id, kyc_decline());

    fixture.notary.reveal(request.clone()).await.unwrap();
    let err = fixture.notary.reveal(request).await.unwrap_err();
    assert!(matches!(err, NotaryError::CommitmentExpired(_)));

    let head = fixture.notary.store().get_chain_head(ACTOR).await.unwrap().unwrap();
    assert_eq!(head.head_sequence, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reveals_issue_once() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();
    let notary = Arc::new(fixture.notary);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let notary = notary.clone();
            let request = reveal_request(committed.commitment_id, kyc_decline());
            tokio::spawn(async move { notary.reveal(request).await })
        })
        .collect();

    let mut issued = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => issued += 1,
            Err(e) => assert!(matches!(e, NotaryError::CommitmentExpired(_)), "{e}"),
        }
    }
    assert_eq!(issued, 1);
    assert_eq!(
        fixture.store.get_chain_head(ACTOR).await.unwrap().unwrap().head_sequence,
        1
    );
}

#[tokio::test]
async fn test_unknown_commitment() {
    let fixture = TestFixture::new();
    let id = CommitmentId::generate();

    let reveal = fixture
        .notary
        .reveal(reveal_request(id, kyc_decline()))
        .await;
    let status = fixture.notary.commitment_status(&id).await;

    assert!(matches!(reveal, Err(NotaryError::CommitmentNotFound(_))));
    assert!(matches!(status, Err(NotaryError::CommitmentNotFound(_))));
}

#[tokio::test]
async fn test_commit_never_echoes_plaintext() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();
    let status = fixture
        .notary
        .commitment_status(&committed.commitment_id)
        .await
        .unwrap();

    for body in [
        serde_json::to_string(&committed).unwrap(),
        serde_json::to_string(&status).unwrap(),
    ] {
        assert!(!body.contains("KYC failed"), "{body}");
        assert!(!body.contains("decline"), "{body}");
    }
}

#[tokio::test]
async fn test_sweep_marks_expired() {
    init_tracing();
    let fixture = TestFixture::new();
    let short = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(1)))
        .await
        .unwrap();
    let long = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::hours(1)))
        .await
        .unwrap();

    fixture.advance(Duration::minutes(2));
    let swept = fixture.notary.sweep_expired_commitments().await.unwrap();
    assert_eq!(swept, vec![short.commitment_id]);

    let status = fixture.notary.commitment_status(&short.commitment_id).await.unwrap();
    assert_eq!(status.state, CommitmentState::Expired);
    let status = fixture.notary.commitment_status(&long.commitment_id).await.unwrap();
    assert_eq!(status.state, CommitmentState::Committed);

    assert!(fixture.notary.sweep_expired_commitments().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper() {
    let fixture = TestFixture::new();
    let committed = fixture
        .notary
        .commit(commit_request(&fixture, kyc_decline(), Duration::minutes(10)))
        .await
        .unwrap();
    let interval = fixture.notary.config().sweep_interval;
    let notary = Arc::new(fixture.notary);
    let sweeper = notary.spawn_expiry_sweeper();

    fixture.clock.advance(Duration::minutes(11));
    tokio::time::sleep(interval + std::time::Duration::from_secs(1)).await;

    let status = notary.commitment_status(&committed.commitment_id).await.unwrap();
    assert_eq!(status.state, CommitmentState::Expired);

    // The sweeper stops once the notary is gone.
    drop(notary);
    tokio::time::timeout(interval * 3, sweeper)
        .await
        .expect("sweeper exits after the notary is dropped")
        .unwrap();
}
