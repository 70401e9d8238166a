//! Receipt verification.
//!
//! Four checks run independently and every failure is reported. An invalid
//! receipt is a normal outcome, so nothing here returns an error or panics
//! on malformed input.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::SchemaVersion;
use crate::chain::check_link;
use crate::keys::KeyRegistry;
use crate::receipt::{metadata_digest, Receipt};
use crate::types::KeyId;

/// Bounds applied by the timestamp check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// How far past `now` a timestamp may lie.
    pub max_future_skew: Duration,
    /// How far before the key's creation a timestamp may lie.
    pub key_clock_skew: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_future_skew: Duration::minutes(5),
            key_clock_skew: Duration::minutes(5),
        }
    }
}

/// Tri-state outcome of the chain check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// No prior receipt was available (standalone or genesis).
    Skipped,
}

/// Category of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    StructureInvalid,
    SignatureInvalid,
    ChainBroken,
    TimestampOutOfRange,
    KeyNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Itemized verification outcome. Computed per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub structure_valid: bool,
    pub signature_valid: bool,
    pub timestamp_valid: bool,
    pub chain: CheckStatus,
    pub key_id: Option<KeyId>,
    pub failures: Vec<VerificationFailure>,
    /// All failure reasons joined for display. `None` when valid.
    pub reason: Option<String>,
}

impl VerificationResult {
    /// Pass or skipped.
    pub fn chain_valid(&self) -> bool {
        self.chain != CheckStatus::Fail
    }

    /// Whether any failure of the given kind was recorded.
    pub fn has_failure(&self, kind: FailureKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }

    fn from_checks(key_id: Option<KeyId>, chain: CheckStatus, failures: Vec<VerificationFailure>) -> Self {
        let failed = |kinds: &[FailureKind]| failures.iter().any(|f| kinds.contains(&f.kind));
        let structure_valid = !failed(&[FailureKind::StructureInvalid]);
        let signature_valid = !failed(&[FailureKind::SignatureInvalid, FailureKind::KeyNotFound]);
        let timestamp_valid = !failed(&[FailureKind::TimestampOutOfRange]);
        let valid = structure_valid && signature_valid && timestamp_valid && chain != CheckStatus::Fail;
        let reason = if failures.is_empty() {
            None
        } else {
            Some(
                failures
                    .iter()
                    .map(|f| f.reason.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        Self {
            valid,
            structure_valid,
            signature_valid,
            timestamp_valid,
            chain,
            key_id,
            failures,
            reason,
        }
    }
}

/// Verifies receipts against a key registry.
#[derive(Debug, Clone, Copy)]
pub struct Verifier<'a> {
    registry: &'a KeyRegistry,
    policy: VerifyPolicy,
}

impl<'a> Verifier<'a> {
    pub fn new(registry: &'a KeyRegistry, policy: VerifyPolicy) -> Self {
        Self { registry, policy }
    }

    /// Verify a receipt, optionally against its chain predecessor.
    pub fn verify(
        &self,
        receipt: &Receipt,
        prior: Option<&Receipt>,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let mut failures = Vec::new();
        check_structure(receipt, &mut failures);
        self.check_signature(receipt, &mut failures);
        self.check_timestamp(receipt, now, &mut failures);

        let chain = match prior {
            None => CheckStatus::Skipped,
            Some(prior) => {
                let breaks = check_link(receipt, prior);
                if breaks.is_empty() {
                    CheckStatus::Pass
                } else {
                    failures.extend(breaks.into_iter().map(|b| VerificationFailure {
                        kind: FailureKind::ChainBroken,
                        reason: b.to_string(),
                    }));
                    CheckStatus::Fail
                }
            }
        };

        let key_id = (!receipt.key_id.is_empty()).then(|| receipt.key_id.clone());
        VerificationResult::from_checks(key_id, chain, failures)
    }

    /// Verify untrusted JSON. Input that is not a receipt fails structure.
    pub fn verify_json(
        &self,
        value: &serde_json::Value,
        prior: Option<&Receipt>,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        match serde_json::from_value::<Receipt>(value.clone()) {
            Ok(receipt) => self.verify(&receipt, prior, now),
            Err(e) => {
                let key_id = value
                    .get("key_id")
                    .and_then(serde_json::Value::as_str)
                    .map(KeyId::new);
                let failure = VerificationFailure {
                    kind: FailureKind::StructureInvalid,
                    reason: format!("malformed receipt: {e}"),
                };
                let mut result = VerificationResult::from_checks(key_id, CheckStatus::Skipped, vec![failure]);
                // Nothing could be checked beyond shape.
                result.signature_valid = false;
                result.valid = false;
                result
            }
        }
    }

    fn check_signature(&self, receipt: &Receipt, failures: &mut Vec<VerificationFailure>) {
        let mut fail = |kind, reason: String| failures.push(VerificationFailure { kind, reason });

        if receipt.signer_id != self.registry.signer_id() {
            fail(
                FailureKind::KeyNotFound,
                format!("unknown signer {:?}", receipt.signer_id),
            );
            return;
        }
        let Some(entry) = self.registry.get(&receipt.key_id) else {
            fail(
                FailureKind::KeyNotFound,
                format!("key {} is not in the registry", receipt.key_id),
            );
            return;
        };
        if entry.verifying().is_none() {
            fail(
                FailureKind::KeyNotFound,
                format!("no verifying material for key {}", receipt.key_id),
            );
            return;
        }
        if entry.algorithm != receipt.algorithm {
            fail(
                FailureKind::SignatureInvalid,
                format!(
                    "algorithm {} does not match key {} ({})",
                    receipt.algorithm, receipt.key_id, entry.algorithm
                ),
            );
            return;
        }
        let message = match receipt.canonical_bytes() {
            Ok(message) => message,
            Err(e) => {
                fail(
                    FailureKind::SignatureInvalid,
                    format!("cannot recompute canonical bytes: {e}"),
                );
                return;
            }
        };
        if !entry.verify(&message, &receipt.signature) {
            fail(
                FailureKind::SignatureInvalid,
                "signature does not match the receipt contents".into(),
            );
        }
    }

    fn check_timestamp(
        &self,
        receipt: &Receipt,
        now: DateTime<Utc>,
        failures: &mut Vec<VerificationFailure>,
    ) {
        // Unparseable timestamps are a structure failure only.
        let Some(at) = receipt.issued_at() else {
            return;
        };
        if at > now + self.policy.max_future_skew {
            failures.push(VerificationFailure {
                kind: FailureKind::TimestampOutOfRange,
                reason: format!("timestamp {} is in the future", receipt.timestamp),
            });
        }
        if let Some(entry) = self.registry.get(&receipt.key_id) {
            if at < entry.created_at - self.policy.key_clock_skew {
                failures.push(VerificationFailure {
                    kind: FailureKind::TimestampOutOfRange,
                    reason: format!(
                        "timestamp {} predates key {} creation",
                        receipt.timestamp, receipt.key_id
                    ),
                });
            }
        }
    }
}

fn check_structure(receipt: &Receipt, failures: &mut Vec<VerificationFailure>) {
    let mut fail = |reason: String| {
        failures.push(VerificationFailure {
            kind: FailureKind::StructureInvalid,
            reason,
        })
    };

    let schema = receipt.schema();
    if schema.is_none() {
        fail(format!("unknown schema_version {}", receipt.schema_version));
    }
    if receipt.receipt_id.is_nil() {
        fail("receipt_id is missing".into());
    }
    for (name, value) in [
        ("actor_id", receipt.actor_id.as_str()),
        ("action_type", receipt.action_type.as_str()),
        ("signer_id", receipt.signer_id.as_str()),
        ("key_id", receipt.key_id.as_str()),
    ] {
        if value.is_empty() {
            fail(format!("{name} is missing"));
        }
    }
    if receipt.issued_at().is_none() {
        fail(format!("timestamp {:?} is not an RFC 3339 instant", receipt.timestamp));
    }
    if receipt.chain_sequence == 0 {
        fail("chain_sequence must start at 1".into());
    } else if (receipt.chain_sequence == 1) != receipt.previous_receipt_hash.is_zero() {
        fail("only chain_sequence 1 may carry the GENESIS previous hash".into());
    }
    let expected_len = receipt.algorithm.signature_len();
    if receipt.signature.len() != expected_len {
        fail(format!(
            "signature is {} bytes, {} requires {}",
            receipt.signature.len(),
            receipt.algorithm,
            expected_len
        ));
    }
    if receipt.metadata_hash.is_some() && schema == Some(SchemaVersion::V1) {
        fail("metadata_hash requires schema_version 2".into());
    }
    if let Some(metadata) = &receipt.metadata {
        match (receipt.metadata_hash, metadata_digest(metadata)) {
            (Some(expected), Ok(actual)) if expected == actual => {}
            (None, _) => fail("metadata present without metadata_hash".into()),
            _ => fail("metadata does not match metadata_hash".into()),
        }
    }
}
