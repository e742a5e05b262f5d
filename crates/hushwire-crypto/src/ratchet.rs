//! Per-session ratchet pointers
//!
//! The ratchet keeps two one-directional pointers:
//!
//! - **local**: our current ephemeral key pair and IV. Outbound messages are
//!   encrypted under this material while the envelope announces its
//!   replacement. It is replaced only by [`RatchetState::commit_local`].
//! - **remote**: the peer's identity, current ephemeral public key and IV.
//!   The key/IV move forward only through [`RatchetState::accept_remote`],
//!   which takes a [`VerifiedAnnouncement`] that can only be obtained by
//!   passing the envelope MAC check. The identity is set once.
//!
//! Both entry points refuse peer keys that are low-order X25519 points, so
//! the remote pointer always holds a key the next exchange can use.
//!
//! Sending therefore advances our own side on every message, while our view
//! of the peer advances only on authenticated receipt.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::entropy::EntropySource;
use crate::error::{CryptoError, Result};
use crate::identity::IdentityPublicKey;
use crate::keys::{EphemeralKeyPair, EphemeralPublicKey, Iv, SharedSecret};

/// Our outbound ratchet material
pub struct LocalRatchet {
    keypair: EphemeralKeyPair,
    iv: Iv,
}

impl LocalRatchet {
    /// Generate fresh material from the entropy pool
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self> {
        Ok(Self {
            keypair: EphemeralKeyPair::generate(entropy)?,
            iv: Iv::generate(entropy)?,
        })
    }

    /// Ephemeral public key
    pub fn public_key(&self) -> &EphemeralPublicKey {
        self.keypair.public_key()
    }

    /// Current IV
    pub fn iv(&self) -> &Iv {
        &self.iv
    }

    pub(crate) fn diffie_hellman(&self, their_public: &EphemeralPublicKey) -> Result<SharedSecret> {
        self.keypair.diffie_hellman(their_public)
    }
}

impl fmt::Debug for LocalRatchet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRatchet")
            .field("public_key", self.public_key())
            .field("iv", &self.iv)
            .finish()
    }
}

/// Our view of the peer's ratchet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRatchet {
    identity: IdentityPublicKey,
    ephemeral: EphemeralPublicKey,
    iv: Iv,
}

impl RemoteRatchet {
    /// Peer identity key, fixed at handshake
    pub fn identity(&self) -> &IdentityPublicKey {
        &self.identity
    }

    /// Peer's current ephemeral public key
    pub fn ephemeral(&self) -> &EphemeralPublicKey {
        &self.ephemeral
    }

    /// Peer's current IV
    pub fn iv(&self) -> &Iv {
        &self.iv
    }
}

/// Pending replacement of the local pointer.
///
/// Produced by [`RatchetState::advance_local`]; the state only moves to
/// `next` when the token is handed back to [`RatchetState::commit_local`].
#[must_use = "an advance does nothing until committed"]
pub struct LocalAdvance {
    base_generation: u64,
    previous_public: EphemeralPublicKey,
    previous_iv: Iv,
    next: LocalRatchet,
}

impl LocalAdvance {
    /// Public key being superseded
    pub fn previous_public(&self) -> &EphemeralPublicKey {
        &self.previous_public
    }

    /// IV being superseded (the one used to encrypt the current message)
    pub fn previous_iv(&self) -> &Iv {
        &self.previous_iv
    }

    /// Replacement material announced to the peer
    pub fn next(&self) -> &LocalRatchet {
        &self.next
    }
}

/// Next-use key and IV announced by an envelope whose MAC has verified
#[derive(Debug)]
pub struct VerifiedAnnouncement {
    pub(crate) ephemeral: EphemeralPublicKey,
    pub(crate) iv: Iv,
}

/// Ratchet state for one session with one peer
pub struct RatchetState {
    local: LocalRatchet,
    local_generation: u64,
    remote: Option<RemoteRatchet>,
    remote_generation: u64,
}

impl RatchetState {
    /// Create state with freshly generated local material and no peer yet
    pub fn new(entropy: &dyn EntropySource) -> Result<Self> {
        Ok(Self {
            local: LocalRatchet::generate(entropy)?,
            local_generation: 0,
            remote: None,
            remote_generation: 0,
        })
    }

    /// Current local material
    pub fn local(&self) -> &LocalRatchet {
        &self.local
    }

    /// Current view of the peer, once the handshake seeded it
    pub fn remote(&self) -> Option<&RemoteRatchet> {
        self.remote.as_ref()
    }

    /// The peer view, or an error if the handshake has not completed
    pub fn require_remote(&self) -> Result<&RemoteRatchet> {
        self.remote
            .as_ref()
            .ok_or(CryptoError::RatchetNotReady("remote pointer not seeded"))
    }

    /// Number of committed local advances
    pub fn local_generation(&self) -> u64 {
        self.local_generation
    }

    /// Number of accepted remote announcements
    pub fn remote_generation(&self) -> u64 {
        self.remote_generation
    }

    /// Bind the peer identity and its first announced key/IV.
    ///
    /// Allowed exactly once per session. Fails with
    /// [`CryptoError::InvalidPublicKey`] for a low-order `ephemeral`.
    pub fn seed_remote(
        &mut self,
        identity: IdentityPublicKey,
        ephemeral: EphemeralPublicKey,
        iv: Iv,
    ) -> Result<()> {
        if self.remote.is_some() {
            return Err(CryptoError::RatchetNotReady("remote pointer already seeded"));
        }
        self.check_usable(&ephemeral)?;
        debug!(peer = %identity.fingerprint_hex(), "Seeding remote ratchet");
        self.remote = Some(RemoteRatchet {
            identity,
            ephemeral,
            iv,
        });
        Ok(())
    }

    /// Generate the replacement local material without committing it
    pub fn advance_local(&self, entropy: &dyn EntropySource) -> Result<LocalAdvance> {
        Ok(LocalAdvance {
            base_generation: self.local_generation,
            previous_public: *self.local.public_key(),
            previous_iv: self.local.iv,
            next: LocalRatchet::generate(entropy)?,
        })
    }

    /// Commit a pending advance once its envelope has been sent.
    ///
    /// Fails if another advance was committed in between.
    pub fn commit_local(&mut self, advance: LocalAdvance) -> Result<()> {
        if advance.base_generation != self.local_generation {
            return Err(CryptoError::StaleAdvance);
        }
        self.local = advance.next;
        self.local_generation += 1;
        Ok(())
    }

    /// Move the remote pointer to an authenticated announcement.
    ///
    /// A low-order announced key is refused and the pointer stays put.
    pub fn accept_remote(&mut self, announcement: VerifiedAnnouncement) -> Result<()> {
        self.check_usable(&announcement.ephemeral)?;
        let remote = self
            .remote
            .as_mut()
            .ok_or(CryptoError::RatchetNotReady("remote pointer not seeded"))?;
        remote.ephemeral = announcement.ephemeral;
        remote.iv = announcement.iv;
        self.remote_generation += 1;
        Ok(())
    }

    // Low-order points give an all-zero shared secret for every scalar
    fn check_usable(&self, their_public: &EphemeralPublicKey) -> Result<()> {
        self.local.diffie_hellman(their_public).map(drop)
    }

    /// Hash over the public parts of both pointers (no secrets)
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.local.public_key().as_bytes());
        hasher.update(self.local.iv.as_bytes());
        if let Some(remote) = &self.remote {
            hasher.update(remote.ephemeral.as_bytes());
            hasher.update(remote.iv.as_bytes());
        }
        hasher.finalize().into()
    }
}

impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("local", &self.local)
            .field("local_generation", &self.local_generation)
            .field("remote", &self.remote)
            .field("remote_generation", &self.remote_generation)
            .finish()
    }
}
