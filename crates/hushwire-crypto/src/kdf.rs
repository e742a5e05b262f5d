//! Per-message key derivation and authentication
//!
//! `cipher_key = SHA-256(shared_secret)` and `auth_key = SHA-256(cipher_key)`.
//! Envelope tags are HMAC-SHA-256 under `auth_key` over the announced
//! ephemeral key, the ciphertext and the announced IV, in that order.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{EphemeralPublicKey, Iv, SharedSecret};

/// HMAC-SHA256 for message authentication
pub type HmacSha256 = Hmac<Sha256>;

/// Size of an envelope authentication tag
pub const MAC_SIZE: usize = 32;

/// A derived key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey<const N: usize>([u8; N]);

impl<const N: usize> DerivedKey<N> {
    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> AsRef<[u8]> for DerivedKey<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Symmetric keys for one message
pub struct MessageKeys {
    /// Stream cipher key
    pub cipher_key: DerivedKey<32>,
    /// MAC key
    pub auth_key: DerivedKey<32>,
}

/// Derive the cipher and MAC keys from a DH shared secret
pub fn derive_message_keys(shared: &SharedSecret) -> MessageKeys {
    let cipher_key = DerivedKey(Sha256::digest(shared.as_bytes()).into());
    let auth_key = DerivedKey(Sha256::digest(cipher_key.as_bytes()).into());
    MessageKeys {
        cipher_key,
        auth_key,
    }
}

fn keyed_mac(
    auth_key: &DerivedKey<32>,
    next_key: &EphemeralPublicKey,
    ciphertext: &[u8],
    next_iv: &Iv,
) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(auth_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(next_key.as_bytes());
    mac.update(ciphertext);
    mac.update(next_iv.as_bytes());
    mac
}

/// Compute the envelope tag
pub fn compute_envelope_mac(
    auth_key: &DerivedKey<32>,
    next_key: &EphemeralPublicKey,
    ciphertext: &[u8],
    next_iv: &Iv,
) -> [u8; MAC_SIZE] {
    keyed_mac(auth_key, next_key, ciphertext, next_iv)
        .finalize()
        .into_bytes()
        .into()
}

/// Verify an envelope tag in constant time
pub fn verify_envelope_mac(
    auth_key: &DerivedKey<32>,
    next_key: &EphemeralPublicKey,
    ciphertext: &[u8],
    next_iv: &Iv,
    tag: &[u8],
) -> bool {
    keyed_mac(auth_key, next_key, ciphertext, next_iv)
        .verify_slice(tag)
        .is_ok()
}
