//! Channel session
//!
//! Binds the identity key, ratchet and envelope codec to a relay transport
//! and drives the handshake state machine. All ratchet access goes through
//! `&mut self`, so a session has exactly one writer at a time.
//!
//! A session is never resumed. After any failure it stays FAILED and every
//! further call returns [`ProtocolError::SessionClosed`]; reconnecting means
//! building a new session (optionally reusing the identity key).
//!
//! A `send` whose future is dropped while the envelope is with the relay
//! counts as abandoned. The peer may already hold the announced key, so the
//! next call on the session fails it instead of reusing the old material.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use hushwire_crypto::entropy::EntropySource;
use hushwire_crypto::envelope::{Envelope, EnvelopeCodec};
use hushwire_crypto::identity::{IdentityKeyPair, IdentityKeyService, IdentityPublicKey};
use hushwire_crypto::ratchet::RatchetState;
use hushwire_crypto::CryptoError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::content::Content;
use crate::error::{FailureReason, ProtocolError, Result};
use crate::handshake::{transition, HandshakeEffect, HandshakeEvent, HandshakeState, Transition};
use crate::protocol::{ConnectStatus, HandshakeHello, RelayEvent, RoomId};
use crate::transport::{RelayEvents, RelayTransport};

/// Progress readout for the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for a seeded entropy pool
    FindingEntropy,
    /// Generating identity and ephemeral keys
    GeneratingKey,
    /// Opening a room at the relay
    Connecting,
    /// Waiting for and verifying the peer hello
    Handshaking,
    /// Ready to send and receive
    Ready,
    /// Session ended
    Failed(FailureReason),
}

impl SessionStatus {
    fn for_state(state: &HandshakeState) -> Self {
        match state {
            HandshakeState::Init => SessionStatus::FindingEntropy,
            HandshakeState::KeyGen => SessionStatus::GeneratingKey,
            HandshakeState::Connecting => SessionStatus::Connecting,
            HandshakeState::HelloSent | HandshakeState::Authenticated { .. } => {
                SessionStatus::Handshaking
            }
            HandshakeState::Active { .. } => SessionStatus::Ready,
            HandshakeState::Failed(reason) => SessionStatus::Failed(reason.clone()),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::FindingEntropy => write!(f, "finding entropy"),
            SessionStatus::GeneratingKey => write!(f, "generating key"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Handshaking => write!(f, "handshaking"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// One inbound item from the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Verified, decrypted content
    Message(Content),
    /// An envelope that could not be verified or decoded; a recheck was sent
    Undeliverable,
    /// Peer could not verify one of our envelopes
    RecheckRequested,
}

/// Encrypted channel with one peer
pub struct ChannelSession {
    config: ChannelConfig,
    entropy: Arc<dyn EntropySource>,
    codec: EnvelopeCodec,
    transport: Box<dyn RelayTransport>,
    events: RelayEvents,
    state: HandshakeState,
    identity: Option<Arc<IdentityKeyPair>>,
    ratchet: Option<RatchetState>,
    room: Option<RoomId>,
    status: watch::Sender<SessionStatus>,
    send_in_flight: bool,
}

impl ChannelSession {
    /// Create a session in INIT.
    ///
    /// `events` must be the receiving half paired with `transport`.
    ///
    /// The session only reads from `entropy`. Periodic reseeding is up to the
    /// owner of the pool, usually by calling
    /// [`EntropyPool::spawn_reseeder`](hushwire_crypto::entropy::EntropyPool::spawn_reseeder)
    /// before the first session starts.
    pub fn new<T>(
        config: ChannelConfig,
        entropy: Arc<dyn EntropySource>,
        transport: T,
        events: RelayEvents,
    ) -> Result<Self>
    where
        T: RelayTransport + 'static,
    {
        config.validate().map_err(ProtocolError::Configuration)?;
        let codec = EnvelopeCodec::with_max_message_size(entropy.clone(), config.max_message_size);
        let (status, _) = watch::channel(SessionStatus::FindingEntropy);

        Ok(Self {
            config,
            entropy,
            codec,
            transport: Box::new(transport),
            events,
            state: HandshakeState::Init,
            identity: None,
            ratchet: None,
            room: None,
            status,
            send_in_flight: false,
        })
    }

    /// Reuse an existing identity instead of generating one
    pub fn with_identity(mut self, identity: Arc<IdentityKeyPair>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Current handshake state
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Room allocated by the relay, once connected
    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    /// Our identity key pair, once generated
    pub fn identity(&self) -> Option<&Arc<IdentityKeyPair>> {
        self.identity.as_ref()
    }

    /// Authenticated peer identity
    pub fn peer_identity(&self) -> Option<IdentityPublicKey> {
        match &self.state {
            HandshakeState::Authenticated { peer } | HandshakeState::Active { peer } => Some(*peer),
            _ => None,
        }
    }

    /// Ratchet state, while the session holds one
    pub fn ratchet(&self) -> Option<&RatchetState> {
        self.ratchet.as_ref()
    }

    /// Run INIT → KEYGEN → CONNECTING → HELLO_SENT and return our room
    pub async fn start(&mut self) -> Result<RoomId> {
        self.ensure("start", |s| matches!(s, HandshakeState::Init))?;
        self.drive(HandshakeEvent::Start).await;

        match (&self.state, self.room) {
            (HandshakeState::HelloSent, Some(room)) => Ok(room),
            _ => Err(self.failure_error()),
        }
    }

    /// Ask the relay to pair us with the owner of `room`
    pub async fn connect_to(&mut self, room: RoomId) -> Result<()> {
        self.ensure("connect_to", |s| matches!(s, HandshakeState::HelloSent))?;

        match self.transport.connect_to(room).await {
            Ok(ConnectStatus::Ok) => {
                info!(%room, "Connected to room");
                Ok(())
            }
            Ok(status) => {
                let reason = format!("connect to room {} rejected: {} (code {})", room, status, status.code());
                Err(self.fail(FailureReason::Transport(reason)).await)
            }
            Err(e) => Err(self.fail(FailureReason::Transport(e.to_string())).await),
        }
    }

    /// Wait for the peer hello and complete the handshake.
    ///
    /// Returns the peer identity once the session is ACTIVE. The identity is
    /// accepted on first use; the signature only proves possession of its
    /// private key.
    pub async fn await_peer(&mut self) -> Result<IdentityPublicKey> {
        self.ensure("await_peer", |s| matches!(s, HandshakeState::HelloSent))?;

        let event = match self.events.recv().await {
            Some(RelayEvent::PeerConnected(bytes)) => match HandshakeHello::from_bytes(&bytes) {
                Ok(hello) => HandshakeEvent::PeerHello(hello),
                Err(e) => {
                    warn!("Undecodable peer hello: {}", e);
                    HandshakeEvent::Fail(FailureReason::AuthenticationRejected)
                }
            },
            Some(RelayEvent::Disconnected) => HandshakeEvent::Fail(FailureReason::Disconnected),
            Some(other) => HandshakeEvent::Fail(FailureReason::ProtocolViolation(format!(
                "{:?} before handshake",
                other
            ))),
            None => HandshakeEvent::Fail(FailureReason::Transport("relay closed".to_string())),
        };
        self.drive(event).await;

        match &self.state {
            HandshakeState::Active { peer } => {
                info!(peer = %peer.fingerprint_hex(), "Session active");
                Ok(*peer)
            }
            _ => Err(self.failure_error()),
        }
    }

    /// Encrypt and send one item of content
    pub async fn send(&mut self, content: &Content) -> Result<()> {
        self.ensure("send", HandshakeState::is_active)?;
        self.check_abandoned_send().await?;

        let sealed = {
            let ratchet = self.ratchet.as_ref().ok_or(ProtocolError::SessionClosed)?;
            self.codec.seal(&content.encode(), ratchet)?
        };
        let bytes = sealed.envelope.to_bytes()?;

        self.send_in_flight = true;
        if let Err(e) = self.transport.send(bytes).await {
            return Err(self.fail(FailureReason::Transport(e.to_string())).await);
        }
        self.send_in_flight = false;

        let ratchet = self.ratchet.as_mut().ok_or(ProtocolError::SessionClosed)?;
        ratchet.commit_local(sealed.advance)?;
        debug!(kind = content.kind(), generation = ratchet.local_generation(), "Message sent");
        Ok(())
    }

    /// Wait for the next inbound item
    pub async fn receive(&mut self) -> Result<Incoming> {
        self.ensure("receive", HandshakeState::is_active)?;
        self.check_abandoned_send().await?;

        match self.events.recv().await {
            Some(RelayEvent::Deliver(bytes)) => self.open(&bytes).await,
            Some(RelayEvent::Recheck) => {
                info!("Peer requested a recheck");
                Ok(Incoming::RecheckRequested)
            }
            Some(RelayEvent::Disconnected) => Err(self.fail(FailureReason::Disconnected).await),
            Some(RelayEvent::PeerConnected(_)) => Err(self
                .fail(FailureReason::ProtocolViolation("hello after handshake".to_string()))
                .await),
            None => Err(self.fail(FailureReason::Transport("relay closed".to_string())).await),
        }
    }

    /// Close the session and leave the relay. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.state.is_failed() {
            self.drive(HandshakeEvent::Fail(FailureReason::Closed)).await;
        }
        Ok(())
    }

    async fn open(&mut self, bytes: &[u8]) -> Result<Incoming> {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Undecodable envelope: {}", e);
                return self.undeliverable().await;
            }
        };

        let ratchet = self.ratchet.as_mut().ok_or(ProtocolError::SessionClosed)?;
        match self.codec.decrypt(&envelope, ratchet) {
            Ok(plaintext) => match Content::decode(&plaintext) {
                Ok(content) => {
                    debug!(kind = content.kind(), "Message received");
                    Ok(Incoming::Message(content))
                }
                Err(e) => {
                    warn!("Authenticated plaintext is malformed: {}", e);
                    Ok(Incoming::Undeliverable)
                }
            },
            Err(CryptoError::IntegrityCheckFailed) => self.undeliverable().await,
            Err(CryptoError::InvalidPublicKey(msg)) => {
                let reason = format!("unusable announced key: {}", msg);
                Err(self.fail(FailureReason::ProtocolViolation(reason)).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn undeliverable(&mut self) -> Result<Incoming> {
        if let Err(e) = self.transport.recheck().await {
            return Err(self.fail(FailureReason::Transport(e.to_string())).await);
        }
        Ok(Incoming::Undeliverable)
    }

    async fn check_abandoned_send(&mut self) -> Result<()> {
        if self.send_in_flight {
            warn!("Previous send was abandoned before it completed");
            let reason = FailureReason::Transport("send abandoned".to_string());
            return Err(self.fail(reason).await);
        }
        Ok(())
    }

    fn ensure(&self, operation: &'static str, allowed: fn(&HandshakeState) -> bool) -> Result<()> {
        if self.state.is_failed() {
            return Err(ProtocolError::SessionClosed);
        }
        if !allowed(&self.state) {
            return Err(ProtocolError::InvalidState {
                state: self.state.clone(),
                operation,
            });
        }
        Ok(())
    }

    fn failure_error(&self) -> ProtocolError {
        match &self.state {
            HandshakeState::Failed(reason) => match reason {
                FailureReason::AuthenticationRejected => ProtocolError::Authentication(reason.clone()),
                FailureReason::KeyGeneration(msg) => ProtocolError::KeyGeneration(msg.clone()),
                FailureReason::Transport(msg) => ProtocolError::Transport(msg.clone()),
                FailureReason::Disconnected => ProtocolError::Transport("peer disconnected".to_string()),
                FailureReason::ProtocolViolation(msg) => ProtocolError::ProtocolViolation(msg.clone()),
                FailureReason::Closed => ProtocolError::SessionClosed,
            },
            state => ProtocolError::InvalidState {
                state: state.clone(),
                operation: "handshake",
            },
        }
    }

    async fn fail(&mut self, reason: FailureReason) -> ProtocolError {
        self.drive(HandshakeEvent::Fail(reason)).await;
        self.failure_error()
    }

    fn apply(&mut self, event: HandshakeEvent) -> Vec<HandshakeEffect> {
        let Transition { state, effects } = transition(&self.state, event);
        if state != self.state {
            match &state {
                HandshakeState::Failed(reason) => {
                    warn!(from = self.state.name(), %reason, "Session failed")
                }
                _ => info!(from = self.state.name(), to = state.name(), "Session state changed"),
            }
        }
        self.state = state;
        self.status.send_replace(SessionStatus::for_state(&self.state));
        effects
    }

    async fn drive(&mut self, event: HandshakeEvent) {
        let mut pending: VecDeque<HandshakeEffect> = self.apply(event).into();
        while let Some(effect) = pending.pop_front() {
            if let Some(next) = self.perform(effect).await {
                pending.extend(self.apply(next));
            }
        }
    }

    async fn perform(&mut self, effect: HandshakeEffect) -> Option<HandshakeEvent> {
        match effect {
            HandshakeEffect::GenerateKeys => match self.generate_keys().await {
                Ok(()) => Some(HandshakeEvent::KeysReady),
                Err(e) => Some(HandshakeEvent::Fail(FailureReason::KeyGeneration(e.to_string()))),
            },

            HandshakeEffect::OpenRoom => match self.transport.open_room().await {
                Ok(room) => {
                    self.room = Some(room);
                    Some(HandshakeEvent::RoomOpened(room))
                }
                Err(e) => Some(HandshakeEvent::Fail(FailureReason::Transport(e.to_string()))),
            },

            HandshakeEffect::SendHello(room) => {
                let hello = match (&self.identity, &self.ratchet) {
                    (Some(identity), Some(ratchet)) => HandshakeHello::new(identity, ratchet.local()),
                    _ => {
                        return Some(HandshakeEvent::Fail(FailureReason::ProtocolViolation(
                            "hello without keys".to_string(),
                        )))
                    }
                };
                let sent = match hello.to_bytes() {
                    Ok(bytes) => self.transport.send_hello(bytes).await,
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(()) => {
                        debug!(%room, "Hello sent");
                        None
                    }
                    Err(e) => Some(HandshakeEvent::Fail(FailureReason::Transport(e.to_string()))),
                }
            }

            HandshakeEffect::SeedRemote(hello) => {
                let Some(ratchet) = self.ratchet.as_mut() else {
                    return Some(HandshakeEvent::Fail(FailureReason::ProtocolViolation(
                        "no ratchet to seed".to_string(),
                    )));
                };
                match ratchet.seed_remote(hello.identity_key, hello.ephemeral_key, hello.iv) {
                    Ok(()) => Some(HandshakeEvent::RemoteSeeded),
                    Err(e) => Some(HandshakeEvent::Fail(FailureReason::ProtocolViolation(e.to_string()))),
                }
            }

            HandshakeEffect::Teardown => {
                self.ratchet = None;
                self.send_in_flight = false;
                if let Err(e) = self.transport.disconnect().await {
                    debug!("Relay disconnect during teardown: {}", e);
                }
                None
            }
        }
    }

    async fn generate_keys(&mut self) -> Result<()> {
        if !self.entropy.is_seeded() {
            return Err(CryptoError::EntropyNotSeeded.into());
        }

        if self.identity.is_none() {
            let service = IdentityKeyService::new(self.entropy.clone(), self.config.identity.clone());
            let identity = tokio::task::spawn_blocking(move || service.generate())
                .await
                .map_err(|e| ProtocolError::KeyGeneration(e.to_string()))??;
            self.identity = Some(Arc::new(identity));
        }

        self.ratchet = Some(RatchetState::new(self.entropy.as_ref())?);
        Ok(())
    }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("state", &self.state)
            .field("room", &self.room)
            .field("identity", &self.identity.as_ref().map(|i| i.public_key()))
            .finish_non_exhaustive()
    }
}
