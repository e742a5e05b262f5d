//! Identity key management for Hushwire
//!
//! A session owns one long-term signing key. It is never rotated while the
//! session lives and may be reused across reconnections. Signatures always
//! cover a SHA-256 digest of the message, never the raw bytes.

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::entropy::{random_array, EntropySource};
use crate::error::{CryptoError, Result};

/// Size of an encoded identity public key in bytes
pub const IDENTITY_PUBLIC_KEY_SIZE: usize = 32;

/// Signing algorithm for identity keys
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum SigningAlgorithm {
    /// Ed25519 (RFC 8032)
    #[default]
    Ed25519,
}

impl SigningAlgorithm {
    /// Approximate classical security level in bits
    pub fn security_bits(&self) -> u32 {
        match self {
            SigningAlgorithm::Ed25519 => 128,
        }
    }

    /// Algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            SigningAlgorithm::Ed25519 => "ed25519",
        }
    }
}

/// Identity key configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Algorithm used for new identity keys
    pub algorithm: SigningAlgorithm,
    /// Weakest acceptable algorithm, in bits of security
    pub min_security_bits: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::Ed25519,
            min_security_bits: 128,
        }
    }
}

impl IdentityConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.algorithm.security_bits() < self.min_security_bits {
            return Err(format!(
                "{} provides {} bits, below min_security_bits {}",
                self.algorithm.name(),
                self.algorithm.security_bits(),
                self.min_security_bits
            ));
        }
        Ok(())
    }
}

/// Long-term identity signing key pair
pub struct IdentityKeyPair {
    algorithm: SigningAlgorithm,
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Get the public identity key
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Algorithm of this key pair
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public identity key, transmitted as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Parse from raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; IDENTITY_PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: IDENTITY_PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey("Invalid Ed25519 public key".to_string()))
    }

    /// Parse from the portable hex encoding
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("Bad hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Raw key bytes
    pub fn to_bytes(&self) -> [u8; IDENTITY_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Portable hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// SHA-256 fingerprint of the key bytes
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }

    /// Fingerprint as hex string
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_hex())
    }
}

impl TryFrom<String> for IdentityPublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<IdentityPublicKey> for String {
    fn from(key: IdentityPublicKey) -> Self {
        key.to_hex()
    }
}

/// Detached identity signature
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySignature(#[serde(with = "hex::serde")] pub [u8; SIGNATURE_LENGTH]);

impl IdentitySignature {
    /// Signature bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentitySignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// Generates identity keys and signs/verifies message digests
pub struct IdentityKeyService {
    entropy: Arc<dyn EntropySource>,
    config: IdentityConfig,
}

impl IdentityKeyService {
    /// Create a service drawing key material from `entropy`
    pub fn new(entropy: Arc<dyn EntropySource>, config: IdentityConfig) -> Self {
        Self { entropy, config }
    }

    /// Generate a key pair with the configured algorithm
    pub fn generate(&self) -> Result<IdentityKeyPair> {
        self.generate_with(self.config.algorithm)
    }

    /// Generate a key pair with an explicit algorithm.
    ///
    /// Fails if the entropy pool is unseeded or the algorithm falls below
    /// `min_security_bits`.
    pub fn generate_with(&self, algorithm: SigningAlgorithm) -> Result<IdentityKeyPair> {
        if algorithm.security_bits() < self.config.min_security_bits {
            return Err(CryptoError::WeakKey {
                algorithm: algorithm.name(),
                offered: algorithm.security_bits(),
                required: self.config.min_security_bits,
            });
        }
        if !self.entropy.is_seeded() {
            return Err(CryptoError::EntropyNotSeeded);
        }

        let seed = Zeroizing::new(random_array::<32>(self.entropy.as_ref())?);
        let signing_key = match algorithm {
            SigningAlgorithm::Ed25519 => SigningKey::from_bytes(&seed),
        };
        let pair = IdentityKeyPair {
            algorithm,
            signing_key,
        };

        info!(
            algorithm = algorithm.name(),
            fingerprint = %pair.public_key().fingerprint_hex(),
            "Generated identity key"
        );
        Ok(pair)
    }

    /// Sign the SHA-256 digest of `message`
    pub fn sign(key: &IdentityKeyPair, message: &[u8]) -> IdentitySignature {
        let digest = Sha256::digest(message);
        IdentitySignature(key.signing_key.sign(&digest).to_bytes())
    }

    /// Verify a signature over the SHA-256 digest of `message`.
    ///
    /// Malformed signatures yield `false`.
    pub fn verify(public_key: &IdentityPublicKey, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            debug!("Rejecting malformed signature of {} bytes", signature.len());
            return false;
        };
        let digest = Sha256::digest(message);
        public_key.0.verify_strict(&digest, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyConfig, EntropyPool};

    fn service() -> IdentityKeyService {
        let pool = EntropyPool::seeded(EntropyConfig::default()).unwrap();
        IdentityKeyService::new(Arc::new(pool), IdentityConfig::default())
    }

    #[test]
    fn test_generate_requires_seeded_entropy() {
        let pool = EntropyPool::new(EntropyConfig::default());
        let service = IdentityKeyService::new(Arc::new(pool), IdentityConfig::default());

        let err = service.generate().unwrap_err();
        assert!(matches!(err, CryptoError::EntropyNotSeeded));
        assert!(err.is_key_generation());
    }

    #[test]
    fn test_generate_rejects_weak_algorithm() {
        let pool = EntropyPool::seeded(EntropyConfig::default()).unwrap();
        let config = IdentityConfig {
            min_security_bits: 192,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let service = IdentityKeyService::new(Arc::new(pool), config);
        assert!(matches!(
            service.generate(),
            Err(CryptoError::WeakKey { offered: 128, required: 192, .. })
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let service = service();
        let pair = service.generate().unwrap();
        let message = b"ephemeral public key bytes";

        let signature = IdentityKeyService::sign(&pair, message);
        assert!(IdentityKeyService::verify(&pair.public_key(), message, signature.as_bytes()));

        // Different message
        assert!(!IdentityKeyService::verify(&pair.public_key(), b"other", signature.as_bytes()));

        // Different key
        let other = service.generate().unwrap();
        assert!(!IdentityKeyService::verify(&other.public_key(), message, signature.as_bytes()));
    }

    #[test]
    fn test_verify_malformed_signature_is_false() {
        let pair = service().generate().unwrap();
        assert!(!IdentityKeyService::verify(&pair.public_key(), b"m", &[]));
        assert!(!IdentityKeyService::verify(&pair.public_key(), b"m", &[0u8; 63]));
        assert!(!IdentityKeyService::verify(&pair.public_key(), b"m", &[0xFF; 64]));
    }

    #[test]
    fn test_public_key_portable_encoding() {
        let pair = service().generate().unwrap();
        let public = pair.public_key();

        let restored = IdentityPublicKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(public, restored);
        assert_eq!(public.fingerprint(), restored.fingerprint());

        assert!(IdentityPublicKey::from_hex("zz").is_err());
        assert!(matches!(
            IdentityPublicKey::from_bytes(&[1u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_distinct_identities() {
        let service = service();
        let a = service.generate().unwrap();
        let b = service.generate().unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }
}
