//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The entropy pool was read before it was seeded
    #[error("Entropy pool has not been seeded")]
    EntropyNotSeeded,

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Requested signing algorithm is below the configured security floor
    #[error("Signing algorithm {algorithm} offers {offered} bits of security, minimum is {required}")]
    WeakKey {
        /// Algorithm name
        algorithm: &'static str,
        /// Security bits the algorithm provides
        offered: u32,
        /// Configured floor
        required: u32,
    },

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Envelope MAC did not verify
    #[error("Envelope failed integrity check")]
    IntegrityCheckFailed,

    /// Ratchet used before both directions were seeded
    #[error("Ratchet not ready: {0}")]
    RatchetNotReady(&'static str),

    /// A pending local advance does not belong to the current state
    #[error("Stale ratchet advance")]
    StaleAdvance,

    /// Message too large
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Plaintext size in bytes
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for CryptoError {
    fn from(err: bincode::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

impl CryptoError {
    /// Whether this error stems from key or entropy generation
    pub fn is_key_generation(&self) -> bool {
        matches!(
            self,
            CryptoError::EntropyNotSeeded
                | CryptoError::KeyGeneration(_)
                | CryptoError::WeakKey { .. }
        )
    }
}
