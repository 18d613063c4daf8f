use std::{net::SocketAddr, time::Duration};

use crate::rendezvous::RoomId;
use crate::NetError;

mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

/// Events surfaced by the transport, polled once per tick by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection we requested was accepted by the remote.
    ConnectionAccepted(SocketAddr),
    /// A remote connected to us.
    IncomingConnection(SocketAddr),
    /// NAT punch-through to the remote succeeded, a direct connect can be issued.
    PunchSucceeded(SocketAddr),
    PunchFailed(SocketAddr),
    TargetUnresponsive(SocketAddr),
    /// The rendezvous server does not know the requested room.
    TargetNotConnected(SocketAddr),
    AttemptFailed(SocketAddr),
    /// The remote refused us because it has no incoming slot left.
    NoFreeIncomingConnections(SocketAddr),
    /// The remote closed the connection.
    Disconnected(SocketAddr),
    /// The link to the remote was lost.
    ConnectionLost(SocketAddr),
    Message { from: SocketAddr, payload: Vec<u8> },
}

/// Reliable, ordered, address oriented transport with a NAT punch-through helper.
///
/// Every message sent with [`Transport::send`] is delivered reliably and in order
/// for a given link. Nothing is guaranteed across different links.
pub trait Transport {
    /// Opens the local endpoint with room for `max_connections` links.
    fn startup(&mut self, max_connections: usize) -> Result<(), NetError>;

    fn set_max_incoming_connections(&mut self, max_incoming: usize);

    /// Starts connecting to `addr`, the outcome is reported as an event.
    fn connect(&mut self, addr: SocketAddr);

    /// Asks the rendezvous server at `server_addr` to punch through to the host of `room`.
    fn open_nat(&mut self, room: &RoomId, server_addr: SocketAddr);

    fn send(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<(), NetError>;

    /// Returns the next available event without blocking.
    fn receive(&mut self) -> Option<TransportEvent>;

    fn close(&mut self, addr: SocketAddr);

    /// Closes every link, waiting at most `timeout` for pending messages to flush.
    fn shutdown(&mut self, timeout: Duration);

    fn local_addr(&self) -> SocketAddr;
}
