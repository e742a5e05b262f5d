//! Envelope encryption and verification
//!
//! # Sending
//!
//! 1. `shared = X25519(local.secret, remote.ephemeral)`
//! 2. `cipher_key = H(shared)`, `auth_key = H(cipher_key)`
//! 3. generate the next local key pair and IV
//! 4. encrypt under `cipher_key` with the *current* local IV
//! 5. `mac = HMAC(auth_key, next.public || ciphertext || next.iv)`
//! 6. commit the next local material once the envelope is out
//!
//! # Receiving
//!
//! The same shared secret is recomputed from our still-current local
//! secret and the peer's remembered public key. The MAC is checked first;
//! only a verified envelope is decrypted (with the remembered remote IV)
//! and only then does the remote pointer move to the announced key/IV.
//!
//! # Replays
//!
//! There is no sequence number or replay window. Acceptance depends only on
//! the MAC verifying against the current pointers. A replay of an envelope
//! that was already accepted fails that check because the remote pointer
//! has moved on, and is reported like any other damaged envelope.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cipher;
use crate::entropy::EntropySource;
use crate::error::{CryptoError, Result};
use crate::kdf::{compute_envelope_mac, derive_message_keys, verify_envelope_mac, MAC_SIZE};
use crate::keys::{EphemeralPublicKey, Iv};
use crate::ratchet::{LocalAdvance, RatchetState, VerifiedAnnouncement};
use crate::MAX_MESSAGE_SIZE;

/// Transmitted unit: ciphertext plus the next-use key/IV announcement
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender's next ephemeral public key
    pub ephemeral_key: EphemeralPublicKey,
    /// Stream-cipher output, same length as the plaintext
    #[serde(with = "base64_serde")]
    pub ciphertext: Vec<u8>,
    /// Sender's next IV
    pub iv: Iv,
    /// HMAC-SHA-256 tag
    #[serde(with = "hex::serde")]
    pub mac: [u8; MAC_SIZE],
}

impl Envelope {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("ephemeral_key", &self.ephemeral_key)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &self.iv)
            .finish_non_exhaustive()
    }
}

/// An envelope built but not yet committed to the ratchet
#[must_use = "commit the advance after the envelope is sent"]
pub struct SealedEnvelope {
    /// Envelope to transmit
    pub envelope: Envelope,
    /// Local advance to commit after transmission
    pub advance: LocalAdvance,
}

/// Builds outbound envelopes and opens inbound ones
#[derive(Clone)]
pub struct EnvelopeCodec {
    entropy: Arc<dyn EntropySource>,
    max_message_size: usize,
}

impl EnvelopeCodec {
    /// Create a codec with the default message size limit
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self::with_max_message_size(entropy, MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom message size limit
    pub fn with_max_message_size(entropy: Arc<dyn EntropySource>, max_message_size: usize) -> Self {
        Self {
            entropy,
            max_message_size,
        }
    }

    /// Build an envelope without touching the ratchet.
    ///
    /// The caller sends `envelope` and then commits `advance` with
    /// [`RatchetState::commit_local`]. Dropping the result leaves the
    /// state as it was.
    pub fn seal(&self, plaintext: &[u8], state: &RatchetState) -> Result<SealedEnvelope> {
        if plaintext.len() > self.max_message_size {
            return Err(CryptoError::MessageTooLarge {
                size: plaintext.len(),
                max: self.max_message_size,
            });
        }

        let remote = state.require_remote()?;
        let shared = state.local().diffie_hellman(remote.ephemeral())?;
        let keys = derive_message_keys(&shared);

        let advance = state.advance_local(self.entropy.as_ref())?;
        let ciphertext = cipher::encrypt(&keys.cipher_key, advance.previous_iv(), plaintext);

        let next = advance.next();
        let mac = compute_envelope_mac(&keys.auth_key, next.public_key(), &ciphertext, next.iv());

        let envelope = Envelope {
            ephemeral_key: *next.public_key(),
            ciphertext,
            iv: *next.iv(),
            mac,
        };
        debug!(len = plaintext.len(), "Sealed envelope");
        Ok(SealedEnvelope { envelope, advance })
    }

    /// Build an envelope and commit the local advance immediately
    pub fn encrypt(&self, plaintext: &[u8], state: &mut RatchetState) -> Result<Envelope> {
        let SealedEnvelope { envelope, advance } = self.seal(plaintext, state)?;
        state.commit_local(advance)?;
        Ok(envelope)
    }

    /// Verify and decrypt an inbound envelope.
    ///
    /// On [`CryptoError::IntegrityCheckFailed`] nothing is decrypted and the
    /// ratchet is left unchanged.
    ///
    /// An authenticated envelope announcing a low-order key fails with
    /// [`CryptoError::InvalidPublicKey`] and also leaves the ratchet as it was.
    pub fn decrypt(&self, envelope: &Envelope, state: &mut RatchetState) -> Result<Vec<u8>> {
        let remote = state.require_remote()?;
        let shared = state.local().diffie_hellman(remote.ephemeral())?;
        let keys = derive_message_keys(&shared);

        if !verify_envelope_mac(
            &keys.auth_key,
            &envelope.ephemeral_key,
            &envelope.ciphertext,
            &envelope.iv,
            &envelope.mac,
        ) {
            warn!("Envelope MAC mismatch, ratchet left unchanged");
            return Err(CryptoError::IntegrityCheckFailed);
        }

        let plaintext = cipher::decrypt(&keys.cipher_key, remote.iv(), &envelope.ciphertext);

        state.accept_remote(VerifiedAnnouncement {
            ephemeral: envelope.ephemeral_key,
            iv: envelope.iv,
        })?;
        debug!(len = plaintext.len(), "Opened envelope");
        Ok(plaintext)
    }
}

// Serde helper for base64
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyConfig, EntropyPool};
    use crate::identity::{IdentityConfig, IdentityKeyService};
    use proptest::prelude::*;

    struct Peer {
        state: RatchetState,
    }

    /// Two ratchets seeded with each other's initial material, as after a handshake
    fn linked_pair(pool: &Arc<EntropyPool>) -> (Peer, Peer) {
        let ids = IdentityKeyService::new(pool.clone(), IdentityConfig::default());
        let id_a = ids.generate().unwrap().public_key();
        let id_b = ids.generate().unwrap().public_key();

        let mut a = RatchetState::new(pool.as_ref()).unwrap();
        let mut b = RatchetState::new(pool.as_ref()).unwrap();

        let (a_pub, a_iv) = (*a.local().public_key(), *a.local().iv());
        let (b_pub, b_iv) = (*b.local().public_key(), *b.local().iv());
        a.seed_remote(id_b, b_pub, b_iv).unwrap();
        b.seed_remote(id_a, a_pub, a_iv).unwrap();

        (Peer { state: a }, Peer { state: b })
    }

    fn setup() -> (EnvelopeCodec, Peer, Peer) {
        let pool = Arc::new(EntropyPool::seeded(EntropyConfig::default()).unwrap());
        let (a, b) = linked_pair(&pool);
        (EnvelopeCodec::new(pool), a, b)
    }

    #[test]
    fn test_basic_message_exchange() {
        let (codec, mut alice, mut bob) = setup();

        let envelope = codec.encrypt(b"hello", &mut alice.state).unwrap();
        assert_eq!(envelope.ciphertext.len(), 5);
        assert_eq!(codec.decrypt(&envelope, &mut bob.state).unwrap(), b"hello");

        let reply = codec.encrypt(b"hi", &mut bob.state).unwrap();
        assert_eq!(codec.decrypt(&reply, &mut alice.state).unwrap(), b"hi");

        let again = codec.encrypt(b"hello", &mut alice.state).unwrap();
        assert_ne!(again, envelope);
        assert_eq!(codec.decrypt(&again, &mut bob.state).unwrap(), b"hello");
    }

    #[test]
    fn test_multiple_messages_same_direction() {
        let (codec, mut alice, mut bob) = setup();

        for i in 0..10 {
            let plaintext = format!("Message {}", i);
            let envelope = codec.encrypt(plaintext.as_bytes(), &mut alice.state).unwrap();
            let decrypted = codec.decrypt(&envelope, &mut bob.state).unwrap();
            assert_eq!(plaintext.as_bytes(), decrypted.as_slice());
        }
    }

    #[test]
    fn test_ping_pong_conversation() {
        let (codec, mut alice, mut bob) = setup();

        for i in 0..20 {
            if i % 2 == 0 {
                let msg = format!("Alice says {}", i);
                let envelope = codec.encrypt(msg.as_bytes(), &mut alice.state).unwrap();
                assert_eq!(codec.decrypt(&envelope, &mut bob.state).unwrap(), msg.as_bytes());
            } else {
                let msg = format!("Bob says {}", i);
                let envelope = codec.encrypt(msg.as_bytes(), &mut bob.state).unwrap();
                assert_eq!(codec.decrypt(&envelope, &mut alice.state).unwrap(), msg.as_bytes());
            }
        }
    }

    #[test]
    fn test_consecutive_envelopes_share_nothing() {
        let (codec, mut alice, _bob) = setup();

        let first = codec.encrypt(b"same plaintext", &mut alice.state).unwrap();
        let second = codec.encrypt(b"same plaintext", &mut alice.state).unwrap();

        assert_ne!(first.ciphertext, second.ciphertext);
        assert_ne!(first.mac, second.mac);
        assert_ne!(first.ephemeral_key, second.ephemeral_key);
        assert_ne!(first.iv, second.iv);
    }

    #[test]
    fn test_integrity_failure_leaves_state() {
        let (codec, mut alice, mut bob) = setup();

        let mut envelope = codec.encrypt(b"hello", &mut alice.state).unwrap();
        envelope.mac[0] ^= 0x01;

        let before = bob.state.fingerprint();
        assert!(matches!(
            codec.decrypt(&envelope, &mut bob.state),
            Err(CryptoError::IntegrityCheckFailed)
        ));
        assert_eq!(before, bob.state.fingerprint());
        assert_eq!(bob.state.remote_generation(), 0);

        // Restoring the tag makes it open normally
        envelope.mac[0] ^= 0x01;
        assert_eq!(codec.decrypt(&envelope, &mut bob.state).unwrap(), b"hello");
    }

    #[test]
    fn test_unsent_seal_leaves_state() {
        let (codec, alice, mut bob) = setup();

        let before = alice.state.fingerprint();
        let sealed = codec.seal(b"never sent", &alice.state).unwrap();
        assert_eq!(before, alice.state.fingerprint());

        // Bob could still open it, but Alice never moved on
        assert_eq!(codec.decrypt(&sealed.envelope, &mut bob.state).unwrap(), b"never sent");
        drop(sealed);
        assert_eq!(alice.state.local_generation(), 0);
    }

    #[test]
    fn test_encrypt_requires_remote() {
        let pool = Arc::new(EntropyPool::seeded(EntropyConfig::default()).unwrap());
        let codec = EnvelopeCodec::new(pool.clone());
        let mut state = RatchetState::new(pool.as_ref()).unwrap();

        assert!(matches!(
            codec.encrypt(b"x", &mut state),
            Err(CryptoError::RatchetNotReady(_))
        ));
        assert_eq!(state.local_generation(), 0);
    }

    #[test]
    fn test_message_too_large() {
        let pool = Arc::new(EntropyPool::seeded(EntropyConfig::default()).unwrap());
        let (mut alice, _bob) = linked_pair(&pool);
        let codec = EnvelopeCodec::with_max_message_size(pool, 16);

        assert!(matches!(
            codec.encrypt(&[0u8; 17], &mut alice.state),
            Err(CryptoError::MessageTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_replay_after_advance_is_rejected() {
        let (codec, mut alice, mut bob) = setup();

        let first = codec.encrypt(b"hello", &mut alice.state).unwrap();
        codec.decrypt(&first, &mut bob.state).unwrap();

        // Bob's remote pointer moved to the key announced in `first`
        assert!(matches!(
            codec.decrypt(&first, &mut bob.state),
            Err(CryptoError::IntegrityCheckFailed)
        ));
    }

    #[test]
    fn test_envelope_bytes() {
        let (codec, mut alice, _bob) = setup();
        let envelope = codec.encrypt(b"wire", &mut alice.state).unwrap();

        let restored = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(envelope, restored);
        assert!(Envelope::from_bytes(&[0xFF, 0x01]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let (codec, mut alice, mut bob) = setup();
            let envelope = codec.encrypt(&plaintext, &mut alice.state).unwrap();
            prop_assert_eq!(envelope.ciphertext.len(), plaintext.len());
            prop_assert_eq!(codec.decrypt(&envelope, &mut bob.state).unwrap(), plaintext);
        }

        #[test]
        fn prop_single_bit_tamper_is_damaged(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            field in 0usize..4,
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let (codec, mut alice, mut bob) = setup();
            let mut envelope = codec.encrypt(&plaintext, &mut alice.state).unwrap();

            let target: &mut [u8] = match field {
                0 => &mut envelope.ciphertext,
                1 => &mut envelope.mac,
                2 => &mut envelope.ephemeral_key.0,
                _ => &mut envelope.iv.0,
            };
            let i = index.index(target.len());
            target[i] ^= 1 << bit;

            let before = bob.state.fingerprint();
            prop_assert!(matches!(
                codec.decrypt(&envelope, &mut bob.state),
                Err(CryptoError::IntegrityCheckFailed)
            ));
            prop_assert_eq!(before, bob.state.fingerprint());
        }
    }
}
