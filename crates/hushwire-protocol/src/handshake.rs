//! Connection state machine
//!
//! States: INIT → KEYGEN → CONNECTING → HELLO_SENT → AUTHENTICATED → ACTIVE
//!
//! [`transition`] is a pure function of (state, event). It performs no I/O;
//! the session executes the returned [`HandshakeEffect`]s and feeds their
//! outcomes back in as events. Failures and unexpected events move to
//! FAILED, which absorbs everything afterwards.

use hushwire_crypto::identity::IdentityPublicKey;

use crate::error::FailureReason;
use crate::protocol::{HandshakeHello, RoomId};

/// Handshake state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing generated yet
    Init,
    /// Generating identity and first ephemeral material
    KeyGen,
    /// Opening a room at the relay
    Connecting,
    /// Hello stored at the relay, waiting for a peer
    HelloSent,
    /// Peer hello verified, ratchet being seeded
    Authenticated {
        /// Verified peer identity
        peer: IdentityPublicKey,
    },
    /// Ready for bidirectional traffic
    Active {
        /// Verified peer identity
        peer: IdentityPublicKey,
    },
    /// Terminal
    Failed(FailureReason),
}

impl HandshakeState {
    /// Whether the state is terminal
    pub fn is_failed(&self) -> bool {
        matches!(self, HandshakeState::Failed(_))
    }

    /// Whether messages may be exchanged
    pub fn is_active(&self) -> bool {
        matches!(self, HandshakeState::Active { .. })
    }

    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Init => "INIT",
            HandshakeState::KeyGen => "KEYGEN",
            HandshakeState::Connecting => "CONNECTING",
            HandshakeState::HelloSent => "HELLO_SENT",
            HandshakeState::Authenticated { .. } => "AUTHENTICATED",
            HandshakeState::Active { .. } => "ACTIVE",
            HandshakeState::Failed(_) => "FAILED",
        }
    }
}

/// Inputs to the state machine
#[derive(Clone, Debug)]
pub enum HandshakeEvent {
    /// Caller asked to start
    Start,
    /// Identity and first ephemeral material are ready
    KeysReady,
    /// Relay allocated a room
    RoomOpened(RoomId),
    /// Peer hello arrived
    PeerHello(HandshakeHello),
    /// Remote ratchet pointer seeded from the peer hello
    RemoteSeeded,
    /// Something went wrong
    Fail(FailureReason),
}

impl HandshakeEvent {
    fn name(&self) -> &'static str {
        match self {
            HandshakeEvent::Start => "start",
            HandshakeEvent::KeysReady => "keys-ready",
            HandshakeEvent::RoomOpened(_) => "room-opened",
            HandshakeEvent::PeerHello(_) => "peer-hello",
            HandshakeEvent::RemoteSeeded => "remote-seeded",
            HandshakeEvent::Fail(_) => "fail",
        }
    }
}

/// Work the session must perform after a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakeEffect {
    /// Generate (or reuse) the identity and create the ratchet
    GenerateKeys,
    /// Ask the relay for a room
    OpenRoom,
    /// Sign and send our hello for this room
    SendHello(RoomId),
    /// Seed the remote pointer from a verified hello
    SeedRemote(HandshakeHello),
    /// Drop ratchet material and leave the relay
    Teardown,
}

/// Result of one transition
#[derive(Debug, PartialEq, Eq)]
pub struct Transition {
    /// State after the event
    pub state: HandshakeState,
    /// Effects to execute, in order
    pub effects: Vec<HandshakeEffect>,
}

impl Transition {
    fn to(state: HandshakeState, effects: Vec<HandshakeEffect>) -> Self {
        Self { state, effects }
    }

    fn fail(reason: FailureReason) -> Self {
        Self::to(HandshakeState::Failed(reason), vec![HandshakeEffect::Teardown])
    }
}

/// Compute the next state and effects for `event` in `state`
pub fn transition(state: &HandshakeState, event: HandshakeEvent) -> Transition {
    use HandshakeEffect as Fx;
    use HandshakeEvent as Ev;
    use HandshakeState as St;

    match (state, event) {
        (St::Failed(reason), _) => Transition::to(St::Failed(reason.clone()), Vec::new()),
        (_, Ev::Fail(reason)) => Transition::fail(reason),

        (St::Init, Ev::Start) => Transition::to(St::KeyGen, vec![Fx::GenerateKeys]),
        (St::KeyGen, Ev::KeysReady) => Transition::to(St::Connecting, vec![Fx::OpenRoom]),
        (St::Connecting, Ev::RoomOpened(room)) => {
            Transition::to(St::HelloSent, vec![Fx::SendHello(room)])
        }
        (St::HelloSent, Ev::PeerHello(hello)) => {
            if hello.verify() {
                let peer = hello.identity_key;
                Transition::to(St::Authenticated { peer }, vec![Fx::SeedRemote(hello)])
            } else {
                Transition::fail(FailureReason::AuthenticationRejected)
            }
        }
        (St::Authenticated { peer }, Ev::RemoteSeeded) => {
            Transition::to(St::Active { peer: *peer }, Vec::new())
        }

        (state, event) => Transition::fail(FailureReason::ProtocolViolation(format!(
            "unexpected {} in {}",
            event.name(),
            state.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hushwire_crypto::entropy::{EntropyConfig, EntropyPool};
    use hushwire_crypto::identity::{IdentityConfig, IdentityKeyService};
    use hushwire_crypto::ratchet::LocalRatchet;

    fn peer_hello() -> HandshakeHello {
        let pool = Arc::new(EntropyPool::seeded(EntropyConfig::default()).unwrap());
        let identity = IdentityKeyService::new(pool.clone(), IdentityConfig::default())
            .generate()
            .unwrap();
        let local = LocalRatchet::generate(pool.as_ref()).unwrap();
        HandshakeHello::new(&identity, &local)
    }

    #[test]
    fn test_happy_path() {
        let hello = peer_hello();
        let peer = hello.identity_key;

        let t = transition(&HandshakeState::Init, HandshakeEvent::Start);
        assert_eq!(t.state, HandshakeState::KeyGen);
        assert_eq!(t.effects, vec![HandshakeEffect::GenerateKeys]);

        let t = transition(&t.state, HandshakeEvent::KeysReady);
        assert_eq!(t.state, HandshakeState::Connecting);
        assert_eq!(t.effects, vec![HandshakeEffect::OpenRoom]);

        let t = transition(&t.state, HandshakeEvent::RoomOpened(RoomId(7)));
        assert_eq!(t.state, HandshakeState::HelloSent);
        assert_eq!(t.effects, vec![HandshakeEffect::SendHello(RoomId(7))]);

        let t = transition(&t.state, HandshakeEvent::PeerHello(hello.clone()));
        assert_eq!(t.state, HandshakeState::Authenticated { peer });
        assert_eq!(t.effects, vec![HandshakeEffect::SeedRemote(hello)]);

        let t = transition(&t.state, HandshakeEvent::RemoteSeeded);
        assert_eq!(t.state, HandshakeState::Active { peer });
        assert!(t.effects.is_empty());
        assert!(t.state.is_active());
    }

    #[test]
    fn test_bad_signature_fails() {
        let mut hello = peer_hello();
        hello.signature.0[10] ^= 0x01;

        let t = transition(&HandshakeState::HelloSent, HandshakeEvent::PeerHello(hello));
        assert_eq!(
            t.state,
            HandshakeState::Failed(FailureReason::AuthenticationRejected)
        );
        assert_eq!(t.effects, vec![HandshakeEffect::Teardown]);

        // Nothing leads out of FAILED
        let t = transition(&t.state, HandshakeEvent::RemoteSeeded);
        assert!(t.state.is_failed());
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_fail_from_any_state() {
        let peer = peer_hello().identity_key;
        let states = [
            HandshakeState::Init,
            HandshakeState::KeyGen,
            HandshakeState::Connecting,
            HandshakeState::HelloSent,
            HandshakeState::Authenticated { peer },
            HandshakeState::Active { peer },
        ];
        for state in states {
            let t = transition(&state, HandshakeEvent::Fail(FailureReason::Disconnected));
            assert_eq!(t.state, HandshakeState::Failed(FailureReason::Disconnected));
            assert_eq!(t.effects, vec![HandshakeEffect::Teardown]);
        }
    }

    #[test]
    fn test_unexpected_event_is_violation() {
        let t = transition(&HandshakeState::Init, HandshakeEvent::KeysReady);
        assert!(matches!(
            t.state,
            HandshakeState::Failed(FailureReason::ProtocolViolation(_))
        ));

        // A second hello after activation is not allowed
        let hello = peer_hello();
        let active = HandshakeState::Active { peer: hello.identity_key };
        let t = transition(&active, HandshakeEvent::PeerHello(hello));
        assert!(matches!(
            t.state,
            HandshakeState::Failed(FailureReason::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_hello_before_room_rejected() {
        let t = transition(&HandshakeState::Connecting, HandshakeEvent::PeerHello(peer_hello()));
        assert!(t.state.is_failed());
        assert_ne!(t.state, HandshakeState::Active { peer: peer_hello().identity_key });
    }
}
