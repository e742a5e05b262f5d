//! # Hushwire Protocol
//!
//! Mutually authenticated two-party channel over an untrusted relay.
//!
//! ## Overview
//!
//! - **Handshake**: signed hellos exchange identity keys and the first
//!   ratchet material, driven by a pure state machine
//! - **Transport**: a relay seam for rooms, pairing and opaque blob
//!   forwarding, plus an in-memory relay
//! - **Session**: send and receive framed content with per-message keys
//!
//! ## Usage
//!
//! ```ignore
//! use hushwire_protocol::prelude::*;
//!
//! let relay = MemoryRelay::new();
//! let (transport, events) = relay.connect();
//! let mut session = ChannelSession::new(ChannelConfig::default(), pool, transport, events)?;
//!
//! let room = session.start().await?;
//! session.connect_to(peer_room).await?;
//! session.await_peer().await?;
//!
//! session.send(&Content::text("hello")).await?;
//! let incoming = session.receive().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod content;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::ChannelConfig;
pub use content::Content;
pub use error::{FailureReason, ProtocolError, Result};
pub use handshake::{HandshakeEffect, HandshakeEvent, HandshakeState};
pub use protocol::{ConnectStatus, HandshakeHello, RelayEvent, RelayRequest, RoomId};
pub use session::{ChannelSession, Incoming, SessionStatus};
pub use transport::{MemoryRelay, MemoryTransport, RelayTransport};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = hushwire_crypto::PROTOCOL_VERSION;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::ChannelConfig;
    pub use crate::content::Content;
    pub use crate::error::{FailureReason, ProtocolError, Result};
    pub use crate::session::{ChannelSession, Incoming, SessionStatus};
    pub use crate::transport::{MemoryRelay, RelayTransport};
}
