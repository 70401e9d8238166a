//! Signing capabilities.
//!
//! Both algorithms are exposed through the same pair of tagged variants,
//! so callers never branch on the algorithm themselves: a [`SigningKey`]
//! signs, a [`VerifyingKey`] verifies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Digest, Ed25519PublicKey, HmacSecret, Keypair, SignatureBytes};
use crate::error::CoreError;
use crate::types::KeyId;

/// Domain tag for key fingerprints.
const KEY_ID_DOMAIN: &[u8] = b"notary/key-id/v1";

/// Signature algorithm carried on every receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// Keyed MAC. Verification needs the shared secret.
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
    /// Public-key signature. Verifiable offline by anyone holding the public key.
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl SigningAlgorithm {
    /// The wire name, also used in the canonical encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac-sha256",
            Self::Ed25519 => "ed25519",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hmac-sha256" => Some(Self::HmacSha256),
            "ed25519" => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Expected signature length in bytes.
    pub fn signature_len(self) -> usize {
        match self {
            Self::HmacSha256 => 32,
            Self::Ed25519 => 64,
        }
    }

    fn key_id_prefix(self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn fingerprint(algorithm: SigningAlgorithm, material: &[u8]) -> KeyId {
    let digest = Digest::hash_domain(KEY_ID_DOMAIN, &[algorithm.as_str().as_bytes(), material]);
    KeyId(format!(
        "{}:{}",
        algorithm.key_id_prefix(),
        hex::encode(&digest.as_bytes()[..8])
    ))
}

/// Key material able to produce signatures.
#[derive(Clone)]
pub enum SigningKey {
    Hmac(HmacSecret),
    Ed25519(Keypair),
}

impl SigningKey {
    /// Generate a fresh key for the given algorithm.
    pub fn generate(algorithm: SigningAlgorithm) -> Self {
        match algorithm {
            SigningAlgorithm::HmacSha256 => Self::Hmac(HmacSecret::generate()),
            SigningAlgorithm::Ed25519 => Self::Ed25519(Keypair::generate()),
        }
    }

    /// The algorithm this key signs with.
    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Hmac(_) => SigningAlgorithm::HmacSha256,
            Self::Ed25519(_) => SigningAlgorithm::Ed25519,
        }
    }

    /// Fingerprint-derived key id.
    pub fn key_id(&self) -> KeyId {
        self.verifying_key().key_id()
    }

    /// Sign canonical bytes.
    pub fn sign(&self, message: &[u8]) -> Result<SignatureBytes, CoreError> {
        match self {
            Self::Hmac(secret) => secret.mac(message),
            Self::Ed25519(keypair) => Ok(keypair.sign(message)),
        }
    }

    /// The material needed to check this key's signatures.
    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            Self::Hmac(secret) => VerifyingKey::Hmac(secret.clone()),
            Self::Ed25519(keypair) => VerifyingKey::Ed25519(keypair.public_key()),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({})", self.key_id())
    }
}

/// Key material able to check signatures.
#[derive(Clone, PartialEq, Eq)]
pub enum VerifyingKey {
    Hmac(HmacSecret),
    Ed25519(Ed25519PublicKey),
}

impl VerifyingKey {
    /// The algorithm this key verifies.
    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Hmac(_) => SigningAlgorithm::HmacSha256,
            Self::Ed25519(_) => SigningAlgorithm::Ed25519,
        }
    }

    /// Fingerprint-derived key id.
    pub fn key_id(&self) -> KeyId {
        match self {
            Self::Hmac(secret) => fingerprint(self.algorithm(), secret.as_bytes()),
            Self::Ed25519(public) => fingerprint(self.algorithm(), public.as_bytes()),
        }
    }

    /// Check a signature. Malformed signatures are simply invalid.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        match self {
            Self::Hmac(secret) => secret.verify(message, signature.as_bytes()).is_ok(),
            Self::Ed25519(public) => public.verify(message, signature.as_bytes()).is_ok(),
        }
    }

    /// Hex public material for key discovery. `None` for shared secrets.
    pub fn public_material(&self) -> Option<String> {
        match self {
            Self::Hmac(_) => None,
            Self::Ed25519(public) => Some(public.to_hex()),
        }
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.key_id())
    }
}
