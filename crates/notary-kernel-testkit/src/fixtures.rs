//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use notary_kernel::{Clock, ManualClock, Notary, NotaryConfig};
use notary_kernel_core::{
    ChainHead, ChainLink, CounterfactualReveal, Digest, HmacSecret, KeyRegistry, Keypair, Receipt,
    ReceiptBuilder, SigningAlgorithm, SigningKey,
};
use notary_kernel_store::MemoryStore;

/// Signer id used by every fixture.
pub const SIGNER_ID: &str = "notary-test";

/// Fixed starting instant for fixture clocks.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0)
        .single()
        .expect("valid fixture instant")
}

/// Deterministic signing key for an algorithm and seed.
pub fn signing_key(algorithm: SigningAlgorithm, seed: u8) -> SigningKey {
    match algorithm {
        SigningAlgorithm::Ed25519 => SigningKey::Ed25519(Keypair::from_seed(&[seed; 32])),
        SigningAlgorithm::HmacSha256 => SigningKey::Hmac(HmacSecret::from_bytes([seed; 32])),
    }
}

/// A notary over a shared memory store, driven by a manual clock.
pub struct TestFixture {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub notary: Notary<Arc<MemoryStore>>,
}

impl TestFixture {
    /// Ed25519 notary with a fixed key.
    pub fn new() -> Self {
        Self::with_key(signing_key(SigningAlgorithm::Ed25519, 0x42))
    }

    pub fn with_key(key: SigningKey) -> Self {
        Self::with_config(key, NotaryConfig::default())
    }

    pub fn with_config(key: SigningKey, config: NotaryConfig) -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = Arc::new(MemoryStore::new());
        let notary = Self::notary_on(store.clone(), clock.clone(), key, config);
        Self {
            clock,
            store,
            notary,
        }
    }

    /// A second notary writing to the same store, as another process would.
    pub fn sibling(&self, key: SigningKey) -> Notary<Arc<MemoryStore>> {
        Self::notary_on(self.store.clone(), self.clock.clone(), key, NotaryConfig::default())
    }

    fn notary_on(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        key: SigningKey,
        config: NotaryConfig,
    ) -> Notary<Arc<MemoryStore>> {
        let registry =
            KeyRegistry::with_key(SIGNER_ID, key, clock.now()).expect("fixture key registry");
        Notary::from_registry(registry, store, config, clock)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// The concrete KYC decision used across commit-reveal tests.
pub fn kyc_decline() -> CounterfactualReveal {
    CounterfactualReveal {
        decision: "decline".into(),
        reason: "KYC failed".into(),
        capability_proof: "limit:$50000".into(),
        opportunity_proof: "request:$12500".into(),
        decision_proof: "policy:AML-2024-07".into(),
    }
}

/// A correctly linked chain for one actor, signed offline, one second apart.
///
/// Returns the receipts and a registry able to verify them.
pub fn signed_chain(key: &SigningKey, actor_id: &str, len: u64) -> (Vec<Receipt>, KeyRegistry) {
    let registry =
        KeyRegistry::with_key(SIGNER_ID, key.clone(), epoch()).expect("fixture key registry");

    let mut head: Option<ChainHead> = None;
    let mut receipts = Vec::new();
    for i in 0..len {
        let receipt = ReceiptBuilder::new(actor_id, "tool_call", Digest::hash(&i.to_be_bytes()))
            .link(ChainLink::next(head.clone()))
            .timestamp(epoch() + Duration::seconds(i as i64))
            .sign(SIGNER_ID, key)
            .expect("fixture signing");
        let hash = receipt.receipt_hash().expect("fixture receipt hash");
        head = Some(match head {
            None => ChainHead {
                actor_id: actor_id.to_string(),
                head_sequence: 1,
                head_hash: hash,
            },
            Some(h) => h.advance(hash),
        });
        receipts.push(receipt);
    }
    (receipts, registry)
}
