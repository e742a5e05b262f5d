//! # Hushwire Cryptographic Library
//!
//! Primitives for a two-party channel that re-keys on every message.
//!
//! ## Security Properties
//!
//! - **Per-message keys**: every send replaces the sender's ephemeral X25519
//!   key pair and IV, so consecutive sends derive independent secrets
//! - **Authenticated announcements**: the next-use key and IV travel inside
//!   the MAC, and the receiver only advances after the MAC verifies
//! - **Integrity before decryption**: a failed tag never reaches the cipher
//!
//! ## Core Components
//!
//! - [`entropy`]: seeded, periodically reseeded randomness source
//! - [`identity`]: long-term signing keys, signatures over SHA-256 digests
//! - [`keys`]: ephemeral key pairs, public keys and IVs
//! - [`kdf`]: cipher/auth key derivation and envelope MACs
//! - [`cipher`]: AES-256-CTR stream cipher
//! - [`ratchet`]: local and remote ratchet pointers
//! - [`envelope`]: envelope sealing and opening

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod cipher;
pub mod entropy;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod ratchet;

pub use error::{CryptoError, Result};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message size in bytes (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entropy::{EntropyConfig, EntropyPool, EntropySource};
    pub use crate::envelope::{Envelope, EnvelopeCodec, SealedEnvelope};
    pub use crate::error::{CryptoError, Result};
    pub use crate::identity::{
        IdentityConfig, IdentityKeyPair, IdentityKeyService, IdentityPublicKey, IdentitySignature,
        SigningAlgorithm,
    };
    pub use crate::keys::{EphemeralKeyPair, EphemeralPublicKey, Iv};
    pub use crate::ratchet::{LocalAdvance, RatchetState};
}
