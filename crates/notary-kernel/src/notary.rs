//! The Notary: issues, verifies and audits receipts, and runs commit-reveal
//! for counterfactual receipts.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use notary_kernel_core::canonical::encode_text_array;
use notary_kernel_core::{
    ChainReport, CommitmentId, CommitmentState, CoreError, CounterfactualCommitment,
    CounterfactualReveal, Digest, KeyRegistry, Receipt, ReceiptBuilder, RevealRejection,
    SigningKey, VerificationResult, Verifier, COUNTERFACTUAL_ACTION,
};
use notary_kernel_store::Store;

use crate::clock::{Clock, SystemClock};
use crate::config::NotaryConfig;
use crate::error::{NotaryError, Result};
use crate::linker::ChainLinker;
use crate::wire::{
    CommitRequest, CommitResponse, CommitmentStatusResponse, IssueRequest, IssueResponse,
    KeySetResponse, RevealRequest, VerifyRequest,
};

/// Action type of the receipt recorded on the signer's own chain at rotation.
pub const KEY_ROTATION_ACTION: &str = "key_rotation";

/// Action types only the notary itself may issue.
const RESERVED_ACTIONS: &[&str] = &[COUNTERFACTUAL_ACTION, KEY_ROTATION_ACTION];

/// The main Notary struct.
///
/// Provides a unified API for:
/// - Issuing chained receipts
/// - Verifying receipts, inline or by lookup hash
/// - Committing to and revealing counterfactual decisions
/// - Rotating and publishing signing keys
pub struct Notary<S: Store> {
    signer_id: String,
    store: S,
    registry: RwLock<KeyRegistry>,
    linker: ChainLinker,
    /// Held for the whole of a key rotation.
    rotation: AsyncMutex<()>,
    clock: Arc<dyn Clock>,
    config: NotaryConfig,
}

impl<S: Store> Notary<S> {
    /// Open a notary signing with `key`.
    ///
    /// The signer's key history is loaded from the store, so receipts from
    /// earlier runs and retired keys stay verifiable. A key used before
    /// keeps its original creation time.
    pub async fn open(
        signer_id: impl Into<String>,
        key: SigningKey,
        store: S,
        config: NotaryConfig,
    ) -> Result<Self> {
        Self::open_with_clock(signer_id, key, store, config, Arc::new(SystemClock)).await
    }

    /// [`open`](Self::open) with an explicit time source.
    pub async fn open_with_clock(
        signer_id: impl Into<String>,
        key: SigningKey,
        store: S,
        config: NotaryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let signer_id = signer_id.into();
        let key_id = key.key_id();
        let records = store.load_keys(&signer_id).await?;
        let registry = KeyRegistry::restore(&signer_id, &records, key, clock.now())?;
        store.save_keys(&signer_id, &registry.published_keys()).await?;

        info!(signer = %signer_id, key = %key_id, known_keys = records.len(), "notary opened");
        Ok(Self::from_registry(registry, store, config, clock))
    }

    /// Create a notary around an existing key registry.
    ///
    /// Nothing is read from or written to the store's key records.
    pub fn from_registry(
        registry: KeyRegistry,
        store: S,
        config: NotaryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer_id: registry.signer_id().to_string(),
            store,
            registry: RwLock::new(registry),
            linker: ChainLinker::new(config.max_issue_attempts),
            rotation: AsyncMutex::new(()),
            clock,
            config,
        }
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &NotaryConfig {
        &self.config
    }

    fn registry(&self) -> Result<RwLockReadGuard<'_, KeyRegistry>> {
        self.registry
            .read()
            .map_err(|e| NotaryError::LockPoisoned(e.to_string()))
    }

    /// A snapshot of the key registry, e.g. for offline verifiers.
    pub fn key_registry(&self) -> Result<KeyRegistry> {
        Ok(self.registry()?.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issuance
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a receipt on the actor's chain.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueResponse> {
        if request.actor_id.is_empty() {
            return Err(NotaryError::InvalidRequest("actor_id is required".into()));
        }
        if request.action_type.is_empty() {
            return Err(NotaryError::InvalidRequest("action_type is required".into()));
        }
        if RESERVED_ACTIONS.contains(&request.action_type.as_str()) {
            return Err(NotaryError::InvalidRequest(format!(
                "action_type {} is reserved",
                request.action_type
            )));
        }

        self.issue_receipt(
            &request.actor_id,
            &request.action_type,
            request.payload_hash,
            request.metadata,
        )
        .await
    }

    async fn issue_receipt(
        &self,
        actor_id: &str,
        action_type: &str,
        payload_hash: Digest,
        metadata: Option<serde_json::Value>,
    ) -> Result<IssueResponse> {
        self.issue_signed(actor_id, action_type, payload_hash, metadata, None)
            .await
    }

    /// Issue with `staged` keys instead of the live registry, if given.
    async fn issue_signed(
        &self,
        actor_id: &str,
        action_type: &str,
        payload_hash: Digest,
        metadata: Option<serde_json::Value>,
        staged: Option<&KeyRegistry>,
    ) -> Result<IssueResponse> {
        let (receipt, receipt_hash) = self
            .linker
            .append_with(&self.store, actor_id, |link, not_before| {
                let now = self.clock.now();
                // Timestamps never go backwards along a chain.
                let at = match not_before {
                    Some(prior) if prior > now => {
                        warn!(
                            actor = actor_id,
                            clock = %now,
                            prior = %prior,
                            "clock behind chain head, reusing head timestamp"
                        );
                        prior
                    }
                    _ => now,
                };

                let mut builder = ReceiptBuilder::new(actor_id, action_type, payload_hash)
                    .link(link)
                    .timestamp(at);
                if let Some(metadata) = &metadata {
                    builder = builder.metadata(metadata.clone());
                }

                match staged {
                    Some(registry) => sign_with(registry, &self.signer_id, builder),
                    None => sign_with(&*self.registry()?, &self.signer_id, builder),
                }
            })
            .await?;

        info!(
            actor = actor_id,
            action = action_type,
            seq = receipt.chain_sequence,
            hash = %receipt_hash,
            "receipt issued"
        );

        Ok(IssueResponse {
            verification_url: self.config.verification_url(&receipt_hash.to_hex()),
            receipt,
            receipt_hash,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify a receipt.
    ///
    /// Without an explicit prior, the predecessor is looked up in the store
    /// by actor and sequence. If none is found the chain check is skipped.
    pub async fn verify(&self, receipt: &Receipt, prior: Option<&Receipt>) -> Result<VerificationResult> {
        let resolved = match prior {
            Some(_) => None,
            None => self.resolve_prior(receipt).await?,
        };
        let prior = prior.or(resolved.as_ref());

        let registry = self.registry()?;
        Ok(Verifier::new(&registry, self.config.verify).verify(receipt, prior, self.clock.now()))
    }

    /// Verify untrusted receipt JSON.
    pub async fn verify_json(&self, value: &serde_json::Value) -> Result<VerificationResult> {
        let prior = match serde_json::from_value::<Receipt>(value.clone()) {
            Ok(receipt) => self.resolve_prior(&receipt).await?,
            Err(_) => None,
        };

        let registry = self.registry()?;
        Ok(Verifier::new(&registry, self.config.verify).verify_json(
            value,
            prior.as_ref(),
            self.clock.now(),
        ))
    }

    /// Verify a stored receipt by its hex lookup hash.
    pub async fn verify_by_hash(&self, receipt_hash: &str) -> Result<VerificationResult> {
        let hash = Digest::from_hex(receipt_hash)
            .map_err(|e| NotaryError::InvalidRequest(format!("receipt_hash: {e}")))?;
        let receipt = self
            .store
            .get_receipt(&hash)
            .await?
            .ok_or_else(|| NotaryError::ReceiptNotFound(receipt_hash.to_string()))?;
        self.verify(&receipt, None).await
    }

    /// Dispatch a verify request.
    pub async fn handle_verify(&self, request: VerifyRequest) -> Result<VerificationResult> {
        match request {
            VerifyRequest::Receipt { receipt } => self.verify_json(&receipt).await,
            VerifyRequest::Hash { receipt_hash } => self.verify_by_hash(&receipt_hash).await,
        }
    }

    /// Fetch a stored receipt by lookup hash.
    pub async fn get_receipt(&self, receipt_hash: &Digest) -> Result<Option<Receipt>> {
        Ok(self.store.get_receipt(receipt_hash).await?)
    }

    async fn resolve_prior(&self, receipt: &Receipt) -> Result<Option<Receipt>> {
        if receipt.chain_sequence <= 1 || receipt.actor_id.is_empty() {
            return Ok(None);
        }
        let prior = self
            .store
            .get_receipt_by_position(&receipt.actor_id, receipt.chain_sequence - 1)
            .await?;
        debug!(
            actor = %receipt.actor_id,
            seq = receipt.chain_sequence,
            found = prior.is_some(),
            "resolved prior receipt"
        );
        Ok(prior)
    }

    /// Walk an actor's stored chain from genesis to head.
    pub async fn verify_chain(&self, actor_id: &str) -> Result<ChainReport> {
        let head_sequence = match self.store.get_chain_head(actor_id).await? {
            Some(head) => head.head_sequence,
            None => 0,
        };
        let receipts = self
            .store
            .get_receipts_range(actor_id, 1, head_sequence)
            .await?;

        let mut report = ChainReport {
            actor_id: actor_id.to_string(),
            head_sequence,
            verified: 0,
            first_broken: None,
            failures: Vec::new(),
        };

        let registry = self.registry()?;
        let verifier = Verifier::new(&registry, self.config.verify);
        let now = self.clock.now();
        let mut stored = receipts.iter().peekable();
        let mut prior: Option<&Receipt> = None;

        for seq in 1..=head_sequence {
            let receipt = match stored.next_if(|r| r.chain_sequence == seq) {
                Some(receipt) => receipt,
                None => {
                    report.first_broken = Some(seq);
                    report.failures.push(format!("receipt {seq} is missing"));
                    break;
                }
            };

            let result = verifier.verify(receipt, prior, now);
            if !result.valid {
                report.first_broken = Some(seq);
                report.failures.push(format!(
                    "receipt {seq}: {}",
                    result.reason.unwrap_or_default()
                ));
                break;
            }
            report.verified += 1;
            prior = Some(receipt);
        }

        if report.first_broken.is_some() {
            warn!(actor = actor_id, broken = report.first_broken, "chain audit failed");
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit-Reveal
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit to a counterfactual decision. Only its digest is stored.
    pub async fn commit(&self, request: CommitRequest) -> Result<CommitResponse> {
        if request.actor_id.is_empty() {
            return Err(NotaryError::InvalidRequest("actor_id is required".into()));
        }

        // Commitments are stored at millisecond precision.
        let now = self.clock.now().trunc_subsecs(3);
        let deadline = request.deadline.trunc_subsecs(3);
        if deadline <= now {
            return Err(NotaryError::InvalidRequest(
                "deadline must be in the future".into(),
            ));
        }
        if deadline - now > self.config.max_reveal_window {
            return Err(NotaryError::InvalidRequest(format!(
                "deadline is more than {} minutes away",
                self.config.max_reveal_window.num_minutes()
            )));
        }

        let commitment = CounterfactualCommitment {
            commitment_id: CommitmentId::generate(),
            actor_id: request.actor_id,
            commitment_hash: request.fields.commitment_hash(),
            created_at: now,
            reveal_deadline: deadline,
            state: CommitmentState::Committed,
            revealed_receipt_hash: None,
        };
        self.store.insert_commitment(&commitment).await?;

        info!(
            commitment = %commitment.commitment_id,
            actor = %commitment.actor_id,
            deadline = %commitment.reveal_deadline,
            "commitment recorded"
        );
        Ok(CommitResponse::from(&commitment))
    }

    /// Reveal a commitment and issue its counterfactual receipt.
    pub async fn reveal(&self, request: RevealRequest) -> Result<IssueResponse> {
        let id = request.commitment_id;
        let commitment = self
            .store
            .get_commitment(&id)
            .await?
            .ok_or(NotaryError::CommitmentNotFound(id))?;

        if let Err(rejection) = commitment.check_reveal(&request.fields, self.clock.now()) {
            warn!(commitment = %id, ?rejection, "reveal rejected");
            return Err(match rejection {
                RevealRejection::Expired => NotaryError::CommitmentExpired(id),
                RevealRejection::Mismatch => NotaryError::RevealMismatch(id),
            });
        }

        // Claim the commitment first so two reveals cannot both issue.
        let claimed = self
            .store
            .transition_commitment(&id, CommitmentState::Committed, CommitmentState::Revealed, None)
            .await?;
        if !claimed {
            return Err(NotaryError::CommitmentExpired(id));
        }

        let issued = self
            .issue_receipt(
                &commitment.actor_id,
                COUNTERFACTUAL_ACTION,
                commitment.commitment_hash,
                Some(reveal_metadata(&id, &request.fields)),
            )
            .await;

        let response = match issued {
            Ok(response) => response,
            Err(e) => {
                error!(commitment = %id, error = %e, "counterfactual issuance failed, releasing commitment");
                let released = self
                    .store
                    .transition_commitment(&id, CommitmentState::Revealed, CommitmentState::Committed, None)
                    .await;
                match released {
                    Ok(true) => {}
                    Ok(false) => warn!(commitment = %id, "commitment changed state before release"),
                    Err(release) => {
                        error!(commitment = %id, error = %release, "commitment release failed, it stays claimed");
                    }
                }
                return Err(e);
            }
        };

        // The receipt is on the chain: the caller gets it even if the
        // commitment row cannot record its hash.
        if let Err(e) = self
            .store
            .transition_commitment(
                &id,
                CommitmentState::Revealed,
                CommitmentState::Revealed,
                Some(response.receipt_hash),
            )
            .await
        {
            error!(
                commitment = %id,
                hash = %response.receipt_hash,
                error = %e,
                "revealed receipt hash not recorded on commitment"
            );
        }

        info!(commitment = %id, hash = %response.receipt_hash, "commitment revealed");
        Ok(response)
    }

    /// Current state of a commitment.
    pub async fn commitment_status(&self, id: &CommitmentId) -> Result<CommitmentStatusResponse> {
        let commitment = self
            .store
            .get_commitment(id)
            .await?
            .ok_or(NotaryError::CommitmentNotFound(*id))?;
        Ok(commitment.into())
    }

    /// Mark every commitment past its deadline as expired.
    pub async fn sweep_expired_commitments(&self) -> Result<Vec<CommitmentId>> {
        let expired = self.store.expire_commitments(self.clock.now()).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired commitments swept");
        }
        Ok(expired)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Retire the active key in favour of `new_key`.
    ///
    /// The rotation is recorded as a receipt on the signer's own chain,
    /// signed by the new key. The new key only goes live once that receipt
    /// is appended; if issuing it fails the old key stays active and the
    /// call can be retried.
    pub async fn rotate_key(&self, new_key: SigningKey) -> Result<IssueResponse> {
        let _rotating = self.rotation.lock().await;
        let mut staged = self.key_registry()?;
        let rotation = staged.rotate(new_key, self.clock.now())?;

        let public_key = rotation.public_key.clone().unwrap_or_default();
        let payload_hash = Digest::hash(&encode_text_array(&[
            rotation.old_key_id.as_str(),
            rotation.new_key_id.as_str(),
            rotation.algorithm.as_str(),
            public_key.as_str(),
        ]));
        let metadata = json!({
            "old_key_id": rotation.old_key_id.as_str(),
            "new_key_id": rotation.new_key_id.as_str(),
            "algorithm": rotation.algorithm.as_str(),
            "public_key": rotation.public_key,
        });

        let response = self
            .issue_signed(
                &self.signer_id,
                KEY_ROTATION_ACTION,
                payload_hash,
                Some(metadata),
                Some(&staged),
            )
            .await?;

        let published = staged.published_keys();
        *self
            .registry
            .write()
            .map_err(|e| NotaryError::LockPoisoned(e.to_string()))? = staged;
        info!(old = %rotation.old_key_id, new = %rotation.new_key_id, "signing key rotated");

        if let Err(e) = self.store.save_keys(&self.signer_id, &published).await {
            error!(signer = %self.signer_id, error = %e, "rotated key records not persisted");
        }
        Ok(response)
    }

    /// Current and historical keys, for offline verification.
    pub fn published_keys(&self) -> Result<KeySetResponse> {
        let registry = self.registry()?;
        Ok(KeySetResponse {
            signer_id: registry.signer_id().to_string(),
            active_key_id: registry.active_key_id().cloned(),
            keys: registry.published_keys(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl<S: Store + 'static> Notary<S> {
    /// Run the expiry sweep every `sweep_interval` until the notary is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let notary = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(notary) = notary.upgrade() else {
                    break;
                };
                if let Err(e) = notary.sweep_expired_commitments().await {
                    warn!(error = %e, "expiry sweep failed");
                }
            }
        })
    }
}

fn sign_with(registry: &KeyRegistry, signer_id: &str, builder: ReceiptBuilder) -> Result<Receipt> {
    let (_, key) = registry.signing_key().map_err(signing_error)?;
    Ok(builder.sign(signer_id, key)?)
}

fn signing_error(e: CoreError) -> NotaryError {
    match e {
        CoreError::KeyNotFound(id) | CoreError::KeyNotSigning(id) => NotaryError::KeyNotFound(id),
        other => other.into(),
    }
}

fn reveal_metadata(id: &CommitmentId, fields: &CounterfactualReveal) -> serde_json::Value {
    json!({
        "commitment_id": id.to_string(),
        "decision": fields.decision,
        "reason": fields.reason,
        "capability_proof": fields.capability_proof,
        "opportunity_proof": fields.opportunity_proof,
        "decision_proof": fields.decision_proof,
    })
}
