//! Ephemeral key types for the per-message ratchet
//!
//! - Ephemeral X25519 key pairs, replaced on every send
//! - Fixed-width public key and IV wrappers used on the wire
//! - Shared secrets from Diffie-Hellman, zeroized on drop

use std::fmt;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::entropy::{random_array, EntropySource};
use crate::error::{CryptoError, Result};

/// Size of X25519 public keys in bytes
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of the per-message IV in bytes
pub const IV_SIZE: usize = 32;

/// A X25519 key pair for Diffie-Hellman key exchange
pub struct EphemeralKeyPair {
    /// The secret key (zeroized on drop by x25519-dalek)
    secret: X25519StaticSecret,
    /// The public key
    public: EphemeralPublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new key pair from the entropy pool
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self> {
        let bytes = Zeroizing::new(random_array::<32>(entropy)?);
        let secret = X25519StaticSecret::from(*bytes);
        let public = EphemeralPublicKey::from(X25519PublicKey::from(&secret));
        Ok(Self { secret, public })
    }

    /// Get the public key
    pub fn public_key(&self) -> &EphemeralPublicKey {
        &self.public
    }

    /// Perform X25519 Diffie-Hellman with the peer's public key.
    ///
    /// Rejects peer keys that force an all-zero (non-contributory) result.
    pub fn diffie_hellman(&self, their_public: &EphemeralPublicKey) -> Result<SharedSecret> {
        let shared = self.secret.diffie_hellman(&their_public.to_x25519());
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey(
                "Low-order X25519 public key".to_string(),
            ));
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// A shared secret derived from Diffie-Hellman key exchange
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Ephemeral X25519 public key as carried on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EphemeralPublicKey(#[serde(with = "hex::serde")] pub [u8; X25519_PUBLIC_KEY_SIZE]);

impl EphemeralPublicKey {
    /// Convert to X25519 public key
    pub fn to_x25519(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; X25519_PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl From<X25519PublicKey> for EphemeralPublicKey {
    fn from(key: X25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

impl From<[u8; X25519_PUBLIC_KEY_SIZE]> for EphemeralPublicKey {
    fn from(bytes: [u8; X25519_PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for EphemeralPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphemeralPublicKey({})", hex::encode(self.0))
    }
}

/// Random per-message initialisation vector
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iv(#[serde(with = "hex::serde")] pub [u8; IV_SIZE]);

impl Iv {
    /// Draw a fresh IV from the entropy pool
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self> {
        Ok(Self(random_array(entropy)?))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    /// Leading 16 bytes, used as the initial counter block
    pub fn counter_block(&self) -> [u8; 16] {
        let mut block = [0u8; 16];
        block.copy_from_slice(&self.0[..16]);
        block
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", hex::encode(self.0))
    }
}
