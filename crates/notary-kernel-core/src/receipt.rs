//! Receipt: a signed attestation that an actor performed, or deliberately
//! did not perform, a discrete action.
//!
//! A receipt is immutable once signed. It never contains the action's
//! payload, only its digest.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{self, SchemaVersion, SignableFields};
use crate::chain::ChainLink;
use crate::crypto::{Digest, SignatureBytes};
use crate::error::CoreError;
use crate::signer::{SigningAlgorithm, SigningKey};
use crate::types::{KeyId, ReceiptId};

/// Domain tag for the receipt lookup hash.
pub const RECEIPT_HASH_DOMAIN: &[u8] = b"notary/receipt-hash/v1";

/// Domain tag for the issue-time metadata digest.
pub const METADATA_HASH_DOMAIN: &[u8] = b"notary/metadata/v1";

/// Wire rendering of the genesis sentinel.
pub const GENESIS: &str = "GENESIS";

/// Serde adapter rendering the all-zero digest as `"GENESIS"`.
pub mod genesis_hash {
    use super::GENESIS;
    use crate::crypto::Digest;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
        if digest.is_zero() {
            serializer.serialize_str(GENESIS)
        } else {
            serializer.serialize_str(&digest.to_hex())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Digest, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == GENESIS {
            Ok(Digest::ZERO)
        } else {
            Digest::from_hex(&s).map_err(serde::de::Error::custom)
        }
    }
}

/// Format an instant the way receipts carry it: RFC 3339, UTC, milliseconds.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a receipt timestamp. `None` if it is not a real RFC 3339 instant.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Digest binding issue-time metadata into the signature.
pub fn metadata_digest(metadata: &serde_json::Value) -> Result<Digest, CoreError> {
    let bytes =
        serde_json::to_vec(metadata).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(Digest::hash_domain(METADATA_HASH_DOMAIN, &[bytes.as_slice()]))
}

/// A signed receipt, in its wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,

    /// RFC 3339 instant of issuance. Kept verbatim so malformed values survive
    /// deserialization and can be reported.
    pub timestamp: String,

    pub actor_id: String,
    pub action_type: String,

    /// Digest of the action payload. The payload itself is never carried.
    pub payload_hash: Digest,

    /// Lookup hash of the preceding receipt, or the genesis sentinel.
    #[serde(with = "genesis_hash")]
    pub previous_receipt_hash: Digest,

    /// 1-based position in the actor's chain.
    pub chain_sequence: u64,

    pub signature: SignatureBytes,
    pub signer_id: String,
    pub key_id: KeyId,
    pub algorithm: SigningAlgorithm,

    /// Raw version tag. Unknown tags fail the structure check.
    pub schema_version: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<Digest>,

    /// Issue-time metadata. Bound to the signature through `metadata_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Receipt {
    /// The signed subset of this receipt.
    pub fn signable(&self) -> SignableFields<'_> {
        SignableFields {
            receipt_id: &self.receipt_id,
            timestamp: &self.timestamp,
            actor_id: &self.actor_id,
            action_type: &self.action_type,
            payload_hash: &self.payload_hash,
            previous_receipt_hash: &self.previous_receipt_hash,
            chain_sequence: self.chain_sequence,
            signer_id: &self.signer_id,
            key_id: &self.key_id,
            algorithm: self.algorithm,
            metadata_hash: self.metadata_hash.as_ref(),
        }
    }

    /// The declared schema version, if known.
    pub fn schema(&self) -> Option<SchemaVersion> {
        SchemaVersion::from_tag(self.schema_version)
    }

    /// Canonical bytes under the receipt's own declared version.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let version = self
            .schema()
            .ok_or(CoreError::UnsupportedVersion(self.schema_version))?;
        canonical::encode(&self.signable(), version)
    }

    /// The derived lookup hash: Blake3 over the canonical bytes and signature.
    ///
    /// The next receipt in the chain carries this as `previous_receipt_hash`.
    pub fn receipt_hash(&self) -> Result<Digest, CoreError> {
        let bytes = self.canonical_bytes()?;
        Ok(Digest::hash_domain(
            RECEIPT_HASH_DOMAIN,
            &[bytes.as_slice(), self.signature.as_bytes()],
        ))
    }

    /// Whether this receipt opens its actor's chain.
    pub fn is_genesis(&self) -> bool {
        self.chain_sequence == 1 && self.previous_receipt_hash.is_zero()
    }

    /// The parsed issuance instant.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Builder for creating receipts.
pub struct ReceiptBuilder {
    receipt_id: ReceiptId,
    actor_id: String,
    action_type: String,
    payload_hash: Digest,
    link: ChainLink,
    timestamp: DateTime<Utc>,
    metadata: Option<serde_json::Value>,
    version: SchemaVersion,
}

impl ReceiptBuilder {
    /// Start building a receipt. Defaults to a genesis link and the current schema.
    pub fn new(
        actor_id: impl Into<String>,
        action_type: impl Into<String>,
        payload_hash: Digest,
    ) -> Self {
        Self {
            receipt_id: ReceiptId::generate(),
            actor_id: actor_id.into(),
            action_type: action_type.into(),
            payload_hash,
            link: ChainLink::genesis(),
            timestamp: Utc::now(),
            metadata: None,
            version: SchemaVersion::CURRENT,
        }
    }

    /// Set the chain position.
    pub fn link(mut self, link: ChainLink) -> Self {
        self.link = link;
        self
    }

    /// Set the issuance instant.
    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at;
        self
    }

    /// Attach metadata.
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Override the receipt id.
    pub fn receipt_id(mut self, id: ReceiptId) -> Self {
        self.receipt_id = id;
        self
    }

    /// Encode under an older schema version.
    pub fn schema(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    /// Build and sign the receipt.
    pub fn sign(self, signer_id: impl Into<String>, key: &SigningKey) -> Result<Receipt, CoreError> {
        // v1 cannot bind metadata, so it is not carried there
        let metadata = match self.version {
            SchemaVersion::V1 => None,
            SchemaVersion::V2 => self.metadata,
        };
        let metadata_hash = metadata.as_ref().map(metadata_digest).transpose()?;

        let mut receipt = Receipt {
            receipt_id: self.receipt_id,
            timestamp: format_timestamp(self.timestamp),
            actor_id: self.actor_id,
            action_type: self.action_type,
            payload_hash: self.payload_hash,
            previous_receipt_hash: self.link.previous_receipt_hash,
            chain_sequence: self.link.chain_sequence,
            signature: SignatureBytes::default(),
            signer_id: signer_id.into(),
            key_id: key.key_id(),
            algorithm: key.algorithm(),
            schema_version: self.version.tag(),
            metadata_hash,
            metadata,
        };

        let message = canonical::encode(&receipt.signable(), self.version)?;
        receipt.signature = key.sign(&message)?;
        Ok(receipt)
    }
}
