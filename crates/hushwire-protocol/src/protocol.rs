//! Protocol message types
//!
//! Everything that crosses the relay: the handshake hello, relay requests
//! and the events the relay pushes back. Hellos and envelopes travel as
//! opaque `bincode` blobs; the relay never interprets them.

use std::fmt;

use hushwire_crypto::identity::{IdentityKeyPair, IdentityKeyService, IdentityPublicKey, IdentitySignature};
use hushwire_crypto::keys::{EphemeralPublicKey, Iv};
use hushwire_crypto::ratchet::LocalRatchet;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Relay-assigned rendezvous identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a connect-to request, numbered as the relay reports it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ConnectStatus {
    /// Rooms paired
    Ok = 0,
    /// No such room, or its owner has not sent a hello yet
    UnknownRoom = 1,
    /// Room is already paired or is the caller's own
    RoomBusy = 2,
}

impl ConnectStatus {
    /// Numeric status code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parse a numeric status code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ConnectStatus::Ok),
            1 => Some(ConnectStatus::UnknownRoom),
            2 => Some(ConnectStatus::RoomBusy),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStatus::Ok => write!(f, "ok"),
            ConnectStatus::UnknownRoom => write!(f, "unknown room"),
            ConnectStatus::RoomBusy => write!(f, "room busy"),
        }
    }
}

/// First message of a connection: identity plus the initial ratchet material
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeHello {
    /// Sender identity public key (hex)
    pub identity_key: IdentityPublicKey,
    /// Sender's first ephemeral public key
    pub ephemeral_key: EphemeralPublicKey,
    /// Identity signature over the digest of `ephemeral_key`
    pub signature: IdentitySignature,
    /// Sender's first IV
    pub iv: Iv,
}

impl HandshakeHello {
    /// Build a hello announcing `local`, signed with `identity`
    pub fn new(identity: &IdentityKeyPair, local: &LocalRatchet) -> Self {
        let ephemeral_key = *local.public_key();
        Self {
            identity_key: identity.public_key(),
            ephemeral_key,
            signature: IdentityKeyService::sign(identity, ephemeral_key.as_bytes()),
            iv: *local.iv(),
        }
    }

    /// Check the signature against the claimed identity key
    pub fn verify(&self) -> bool {
        IdentityKeyService::verify(
            &self.identity_key,
            self.ephemeral_key.as_bytes(),
            self.signature.as_bytes(),
        )
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Client-to-relay requests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRequest {
    /// Allocate a room for this client
    OpenRoom,
    /// Pair with the owner of another room
    ConnectTo(RoomId),
    /// Store this client's hello for delivery to its future peer
    HandshakeHello(Vec<u8>),
    /// Forward an envelope to the peer
    Send(Vec<u8>),
    /// Ask the peer to resend or resync after an integrity failure
    Recheck,
    /// Leave the relay
    Disconnect,
}

/// Relay replies to [`RelayRequest`]s
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayResponse {
    /// Room allocated
    RoomOpened(RoomId),
    /// Outcome of a connect-to
    Connect(ConnectStatus),
    /// Request accepted
    Accepted,
}

/// Relay-to-client events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayEvent {
    /// Paired; carries the peer's hello
    PeerConnected(Vec<u8>),
    /// Envelope from the peer
    Deliver(Vec<u8>),
    /// Peer could not verify one of our envelopes
    Recheck,
    /// Peer or relay ended the session
    Disconnected,
}
