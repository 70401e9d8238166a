//! Key registry: the signer's current key plus every retired one.
//!
//! Rotation only changes which key signs new receipts. Retired keys keep
//! their verifying material so earlier receipts stay verifiable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{Ed25519PublicKey, SignatureBytes};
use crate::error::CoreError;
use crate::signer::{SigningAlgorithm, SigningKey, VerifyingKey};
use crate::types::KeyId;

/// Lifecycle of a registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Retired,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// A key known to the registry.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key_id: KeyId,
    pub algorithm: SigningAlgorithm,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    signing: Option<SigningKey>,
    verifying: Option<VerifyingKey>,
}

impl KeyEntry {
    pub fn status(&self) -> KeyStatus {
        if self.retired_at.is_some() {
            KeyStatus::Retired
        } else {
            KeyStatus::Active
        }
    }

    /// Verifying material. `None` for shared-secret keys known only by id.
    pub fn verifying(&self) -> Option<&VerifyingKey> {
        self.verifying.as_ref()
    }

    /// Check a signature made by this key.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        self.verifying
            .as_ref()
            .map(|key| key.verify(message, signature))
            .unwrap_or(false)
    }

    fn publish(&self) -> PublishedKey {
        PublishedKey {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm,
            public_key: self.verifying.as_ref().and_then(VerifyingKey::public_material),
            created_at: self.created_at,
            retired_at: self.retired_at,
            status: self.status(),
        }
    }
}

/// Discovery record for one key. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKey {
    pub key_id: KeyId,
    pub algorithm: SigningAlgorithm,
    /// Hex public key. Absent for shared-secret keys.
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub status: KeyStatus,
}

/// Record of a completed rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotation {
    pub old_key_id: KeyId,
    pub new_key_id: KeyId,
    pub algorithm: SigningAlgorithm,
    pub public_key: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// All keys of one signer, current and retired.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    signer_id: String,
    active: Option<KeyId>,
    keys: BTreeMap<KeyId, KeyEntry>,
}

impl KeyRegistry {
    /// An empty registry.
    pub fn new(signer_id: impl Into<String>) -> Self {
        Self {
            signer_id: signer_id.into(),
            active: None,
            keys: BTreeMap::new(),
        }
    }

    /// A registry with one active key.
    pub fn with_key(
        signer_id: impl Into<String>,
        key: SigningKey,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::new(signer_id);
        registry.register_active(key, created_at)?;
        Ok(registry)
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn active_key_id(&self) -> Option<&KeyId> {
        self.active.as_ref()
    }

    /// Install the first signing key. Use [`rotate`](Self::rotate) afterwards.
    pub fn register_active(
        &mut self,
        key: SigningKey,
        created_at: DateTime<Utc>,
    ) -> Result<KeyId, CoreError> {
        if let Some(active) = &self.active {
            return Err(CoreError::ActiveKeyPresent(active.clone()));
        }
        self.insert_active(key, created_at)
    }

    fn insert_active(
        &mut self,
        key: SigningKey,
        created_at: DateTime<Utc>,
    ) -> Result<KeyId, CoreError> {
        let key_id = key.key_id();
        if self.keys.contains_key(&key_id) {
            return Err(CoreError::KeyAlreadyRegistered(key_id));
        }
        let entry = KeyEntry {
            key_id: key_id.clone(),
            algorithm: key.algorithm(),
            created_at,
            retired_at: None,
            verifying: Some(key.verifying_key()),
            signing: Some(key),
        };
        self.keys.insert(key_id.clone(), entry);
        self.active = Some(key_id.clone());
        Ok(key_id)
    }

    /// Retire the active key and activate `new_key`.
    ///
    /// Irreversible: a key id that was ever registered cannot be reused.
    /// Ed25519 secrets are dropped on retirement; HMAC secrets are kept
    /// because they are the only way to check old tags.
    pub fn rotate(&mut self, new_key: SigningKey, at: DateTime<Utc>) -> Result<KeyRotation, CoreError> {
        let old_key_id = self.active.clone().ok_or(CoreError::NoActiveKey)?;
        let new_key_id = new_key.key_id();
        if self.keys.contains_key(&new_key_id) {
            return Err(CoreError::KeyAlreadyRegistered(new_key_id));
        }

        let algorithm = new_key.algorithm();
        let public_key = new_key.verifying_key().public_material();

        if let Some(old) = self.keys.get_mut(&old_key_id) {
            old.retired_at = Some(at);
            old.signing = None;
        }
        self.active = None;
        self.insert_active(new_key, at)?;

        Ok(KeyRotation {
            old_key_id,
            new_key_id,
            algorithm,
            public_key,
            rotated_at: at,
        })
    }

    /// The active key and its id.
    pub fn signing_key(&self) -> Result<(&KeyId, &SigningKey), CoreError> {
        let key_id = self.active.as_ref().ok_or(CoreError::NoActiveKey)?;
        let entry = self
            .keys
            .get(key_id)
            .ok_or_else(|| CoreError::KeyNotFound(key_id.clone()))?;
        let key = entry
            .signing
            .as_ref()
            .ok_or_else(|| CoreError::KeyNotSigning(key_id.clone()))?;
        Ok((key_id, key))
    }

    /// Look up any key, active or retired.
    pub fn get(&self, key_id: &KeyId) -> Option<&KeyEntry> {
        self.keys.get(key_id)
    }

    /// Verifying material for any key, active or retired.
    pub fn verifying_key(&self, key_id: &KeyId) -> Option<&VerifyingKey> {
        self.keys.get(key_id).and_then(KeyEntry::verifying)
    }

    /// Discovery view, oldest key first.
    pub fn published_keys(&self) -> Vec<PublishedKey> {
        let mut keys: Vec<PublishedKey> = self.keys.values().map(KeyEntry::publish).collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key_id.cmp(&b.key_id)));
        keys
    }

    /// Build a verify-only registry from published records.
    ///
    /// Shared-secret keys arrive without material and can only be listed.
    pub fn from_published(
        signer_id: impl Into<String>,
        published: &[PublishedKey],
    ) -> Result<Self, CoreError> {
        let mut registry = Self::new(signer_id);
        for record in published {
            let verifying = match (record.algorithm, &record.public_key) {
                (SigningAlgorithm::Ed25519, Some(hex)) => {
                    let public =
                        Ed25519PublicKey::from_hex(hex).map_err(|_| CoreError::InvalidPublicKey)?;
                    let key = VerifyingKey::Ed25519(public);
                    if key.key_id() != record.key_id {
                        return Err(CoreError::InvalidKey(format!(
                            "public key does not match key id {}",
                            record.key_id
                        )));
                    }
                    Some(key)
                }
                (SigningAlgorithm::Ed25519, None) => return Err(CoreError::InvalidPublicKey),
                (SigningAlgorithm::HmacSha256, _) => None,
            };
            if record.status == KeyStatus::Active {
                registry.active = Some(record.key_id.clone());
            }
            registry.keys.insert(
                record.key_id.clone(),
                KeyEntry {
                    key_id: record.key_id.clone(),
                    algorithm: record.algorithm,
                    created_at: record.created_at,
                    retired_at: record.retired_at,
                    signing: None,
                    verifying,
                },
            );
        }
        Ok(registry)
    }

    /// Rebuild a signing registry from stored records plus the live key.
    ///
    /// A key seen before keeps its recorded creation time. A retired key
    /// never signs again, and a new key is refused while another recorded
    /// key is still active: changing keys goes through [`rotate`](Self::rotate).
    pub fn restore(
        signer_id: impl Into<String>,
        records: &[PublishedKey],
        key: SigningKey,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::from_published(signer_id, records)?;
        let key_id = key.key_id();

        if let Some(entry) = registry.keys.get_mut(&key_id) {
            if entry.retired_at.is_some() {
                return Err(CoreError::KeyAlreadyRegistered(key_id));
            }
            entry.verifying = Some(key.verifying_key());
            entry.signing = Some(key);
            registry.active = Some(key_id);
            return Ok(registry);
        }

        registry.register_active(key, now)?;
        Ok(registry)
    }

    /// Add shared-secret material for a key the caller was given out of band.
    pub fn trust_shared_secret(&mut self, key: VerifyingKey) -> Result<(), CoreError> {
        let key_id = key.key_id();
        let entry = self
            .keys
            .get_mut(&key_id)
            .ok_or_else(|| CoreError::KeyNotFound(key_id.clone()))?;
        entry.verifying = Some(key);
        Ok(())
    }
}
