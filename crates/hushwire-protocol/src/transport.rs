//! Relay transport seam
//!
//! The relay is an untrusted rendezvous point that allocates rooms, pairs
//! two clients and forwards opaque blobs between them. Sessions talk to it
//! through [`RelayTransport`] and receive its pushes as [`RelayEvent`]s on
//! an mpsc channel.
//!
//! [`MemoryRelay`] is an in-process relay used by the demo client and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::{ConnectStatus, RelayEvent, RelayRequest, RelayResponse, RoomId};

/// Receiving half for relay pushes
pub type RelayEvents = mpsc::UnboundedReceiver<RelayEvent>;

/// Client side of the relay protocol
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Allocate a room and return its identifier
    async fn open_room(&self) -> Result<RoomId>;

    /// Store our serialized hello for delivery on pairing
    async fn send_hello(&self, hello: Vec<u8>) -> Result<()>;

    /// Pair with the owner of `room`
    async fn connect_to(&self, room: RoomId) -> Result<ConnectStatus>;

    /// Forward a serialized envelope to the peer
    async fn send(&self, envelope: Vec<u8>) -> Result<()>;

    /// Ask the peer to resend after an integrity failure
    async fn recheck(&self) -> Result<()>;

    /// Leave the relay
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl<T: RelayTransport + ?Sized> RelayTransport for Arc<T> {
    async fn open_room(&self) -> Result<RoomId> {
        (**self).open_room().await
    }

    async fn send_hello(&self, hello: Vec<u8>) -> Result<()> {
        (**self).send_hello(hello).await
    }

    async fn connect_to(&self, room: RoomId) -> Result<ConnectStatus> {
        (**self).connect_to(room).await
    }

    async fn send(&self, envelope: Vec<u8>) -> Result<()> {
        (**self).send(envelope).await
    }

    async fn recheck(&self) -> Result<()> {
        (**self).recheck().await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }
}

/// Relay-internal client handle
pub type ClientId = u64;

struct ClientSlot {
    room: Option<RoomId>,
    hello: Option<Vec<u8>>,
    peer: Option<ClientId>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

#[derive(Default)]
struct RelayState {
    next_client: ClientId,
    next_room: u64,
    clients: HashMap<ClientId, ClientSlot>,
    rooms: HashMap<RoomId, ClientId>,
}

impl RelayState {
    fn push(&self, client: ClientId, event: RelayEvent) {
        if let Some(slot) = self.clients.get(&client) {
            if slot.events.send(event).is_err() {
                debug!(client, "Dropping event for closed receiver");
            }
        }
    }
}

/// In-process rendezvous relay
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, returning its transport and event stream
    pub fn connect(&self) -> (MemoryTransport, RelayEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_client += 1;
        let client = state.next_client;
        state.clients.insert(
            client,
            ClientSlot {
                room: None,
                hello: None,
                peer: None,
                events: tx,
            },
        );
        debug!(client, "Relay client registered");

        let transport = MemoryTransport {
            relay: self.clone(),
            client,
        };
        (transport, rx)
    }

    /// Number of allocated rooms
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Apply one request on behalf of `client`
    pub fn handle(&self, client: ClientId, request: RelayRequest) -> Result<RelayResponse> {
        let mut state = self.state.lock();
        if !state.clients.contains_key(&client) {
            return Err(ProtocolError::Transport("client not connected".to_string()));
        }

        match request {
            RelayRequest::OpenRoom => {
                state.next_room += 1;
                let room = RoomId(state.next_room);
                if let Some(old) = state.clients.get_mut(&client).and_then(|s| s.room.replace(room)) {
                    state.rooms.remove(&old);
                }
                state.rooms.insert(room, client);
                info!(client, %room, "Room opened");
                Ok(RelayResponse::RoomOpened(room))
            }

            RelayRequest::HandshakeHello(hello) => {
                let slot = state
                    .clients
                    .get_mut(&client)
                    .ok_or_else(|| ProtocolError::Transport("client not connected".to_string()))?;
                if slot.room.is_none() {
                    return Err(ProtocolError::Transport("hello before open-room".to_string()));
                }
                slot.hello = Some(hello);
                Ok(RelayResponse::Accepted)
            }

            RelayRequest::ConnectTo(room) => {
                let status = Self::pair(&mut state, client, room)?;
                Ok(RelayResponse::Connect(status))
            }

            RelayRequest::Send(blob) => {
                let peer = Self::peer_of(&state, client)?;
                debug!(client, peer, len = blob.len(), "Forwarding envelope");
                state.push(peer, RelayEvent::Deliver(blob));
                Ok(RelayResponse::Accepted)
            }

            RelayRequest::Recheck => {
                let peer = Self::peer_of(&state, client)?;
                state.push(peer, RelayEvent::Recheck);
                Ok(RelayResponse::Accepted)
            }

            RelayRequest::Disconnect => {
                if let Some(slot) = state.clients.remove(&client) {
                    if let Some(room) = slot.room {
                        state.rooms.remove(&room);
                    }
                    if let Some(peer) = slot.peer {
                        if let Some(peer_slot) = state.clients.get_mut(&peer) {
                            peer_slot.peer = None;
                        }
                        state.push(peer, RelayEvent::Disconnected);
                    }
                }
                info!(client, "Relay client disconnected");
                Ok(RelayResponse::Accepted)
            }
        }
    }

    fn peer_of(state: &RelayState, client: ClientId) -> Result<ClientId> {
        state
            .clients
            .get(&client)
            .and_then(|slot| slot.peer)
            .ok_or_else(|| ProtocolError::Transport("no peer connected".to_string()))
    }

    fn pair(state: &mut RelayState, client: ClientId, room: RoomId) -> Result<ConnectStatus> {
        let own_hello = state
            .clients
            .get(&client)
            .and_then(|slot| slot.hello.clone())
            .ok_or_else(|| ProtocolError::Transport("connect-to before hello".to_string()))?;

        let Some(&target) = state.rooms.get(&room) else {
            return Ok(ConnectStatus::UnknownRoom);
        };
        if target == client {
            return Ok(ConnectStatus::RoomBusy);
        }

        let (target_hello, target_paired) = match state.clients.get(&target) {
            Some(slot) => (slot.hello.clone(), slot.peer.is_some()),
            None => return Ok(ConnectStatus::UnknownRoom),
        };
        let own_paired = state.clients.get(&client).is_some_and(|s| s.peer.is_some());
        if target_paired || own_paired {
            return Ok(ConnectStatus::RoomBusy);
        }
        let Some(target_hello) = target_hello else {
            return Ok(ConnectStatus::UnknownRoom);
        };

        if let Some(slot) = state.clients.get_mut(&client) {
            slot.peer = Some(target);
        }
        if let Some(slot) = state.clients.get_mut(&target) {
            slot.peer = Some(client);
        }
        state.push(client, RelayEvent::PeerConnected(target_hello));
        state.push(target, RelayEvent::PeerConnected(own_hello));

        info!(client, target, %room, "Clients paired");
        Ok(ConnectStatus::Ok)
    }
}

/// A client handle on a [`MemoryRelay`]
#[derive(Clone)]
pub struct MemoryTransport {
    relay: MemoryRelay,
    client: ClientId,
}

impl MemoryTransport {
    fn request(&self, request: RelayRequest) -> Result<RelayResponse> {
        self.relay.handle(self.client, request)
    }

    fn expect_accepted(response: RelayResponse) -> Result<()> {
        match response {
            RelayResponse::Accepted => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: RelayResponse) -> ProtocolError {
    warn!(?response, "Unexpected relay response");
    ProtocolError::Transport(format!("unexpected relay response: {:?}", response))
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn open_room(&self) -> Result<RoomId> {
        match self.request(RelayRequest::OpenRoom)? {
            RelayResponse::RoomOpened(room) => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    async fn send_hello(&self, hello: Vec<u8>) -> Result<()> {
        Self::expect_accepted(self.request(RelayRequest::HandshakeHello(hello))?)
    }

    async fn connect_to(&self, room: RoomId) -> Result<ConnectStatus> {
        match self.request(RelayRequest::ConnectTo(room))? {
            RelayResponse::Connect(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    async fn send(&self, envelope: Vec<u8>) -> Result<()> {
        Self::expect_accepted(self.request(RelayRequest::Send(envelope))?)
    }

    async fn recheck(&self) -> Result<()> {
        Self::expect_accepted(self.request(RelayRequest::Recheck)?)
    }

    async fn disconnect(&self) -> Result<()> {
        Self::expect_accepted(self.request(RelayRequest::Disconnect)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rooms_are_distinct() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.connect();
        let (b, _b_rx) = relay.connect();

        let room_a = a.open_room().await.unwrap();
        let room_b = b.open_room().await.unwrap();
        assert_ne!(room_a, room_b);
        assert_eq!(relay.room_count(), 2);
    }

    #[tokio::test]
    async fn test_pairing_exchanges_hellos() {
        let relay = MemoryRelay::new();
        let (a, mut a_rx) = relay.connect();
        let (b, mut b_rx) = relay.connect();

        a.open_room().await.unwrap();
        let room_b = b.open_room().await.unwrap();
        a.send_hello(b"hello-a".to_vec()).await.unwrap();
        b.send_hello(b"hello-b".to_vec()).await.unwrap();

        assert_eq!(a.connect_to(room_b).await.unwrap(), ConnectStatus::Ok);
        assert_eq!(a_rx.recv().await, Some(RelayEvent::PeerConnected(b"hello-b".to_vec())));
        assert_eq!(b_rx.recv().await, Some(RelayEvent::PeerConnected(b"hello-a".to_vec())));

        a.send(b"blob".to_vec()).await.unwrap();
        assert_eq!(b_rx.recv().await, Some(RelayEvent::Deliver(b"blob".to_vec())));

        b.recheck().await.unwrap();
        assert_eq!(a_rx.recv().await, Some(RelayEvent::Recheck));
    }

    #[tokio::test]
    async fn test_connect_status_codes() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.connect();
        let (b, _b_rx) = relay.connect();
        let (c, _c_rx) = relay.connect();

        let room_a = a.open_room().await.unwrap();
        a.send_hello(b"a".to_vec()).await.unwrap();

        // Target has no hello yet
        let room_b = b.open_room().await.unwrap();
        assert_eq!(a.connect_to(room_b).await.unwrap(), ConnectStatus::UnknownRoom);
        assert_eq!(a.connect_to(RoomId(999)).await.unwrap(), ConnectStatus::UnknownRoom);
        assert_eq!(a.connect_to(room_a).await.unwrap(), ConnectStatus::RoomBusy);

        b.send_hello(b"b".to_vec()).await.unwrap();
        assert_eq!(b.connect_to(room_a).await.unwrap(), ConnectStatus::Ok);

        c.open_room().await.unwrap();
        c.send_hello(b"c".to_vec()).await.unwrap();
        assert_eq!(c.connect_to(room_a).await.unwrap(), ConnectStatus::RoomBusy);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_peer() {
        let relay = MemoryRelay::new();
        let (a, mut a_rx) = relay.connect();
        let (b, mut b_rx) = relay.connect();

        a.open_room().await.unwrap();
        let room_b = b.open_room().await.unwrap();
        a.send_hello(b"a".to_vec()).await.unwrap();
        b.send_hello(b"b".to_vec()).await.unwrap();
        a.connect_to(room_b).await.unwrap();
        a_rx.recv().await.unwrap();
        b_rx.recv().await.unwrap();

        a.disconnect().await.unwrap();
        assert_eq!(b_rx.recv().await, Some(RelayEvent::Disconnected));
        assert_eq!(relay.room_count(), 1);

        // Both sides are now unpaired
        assert!(matches!(b.send(b"x".to_vec()).await, Err(ProtocolError::Transport(_))));
        assert!(matches!(a.open_room().await, Err(ProtocolError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let relay = MemoryRelay::new();
        let (a, _a_rx) = relay.connect();
        assert!(a.send(b"x".to_vec()).await.is_err());
        assert!(a.send_hello(b"x".to_vec()).await.is_err());
    }
}
