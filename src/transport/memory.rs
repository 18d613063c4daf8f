use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{Transport, TransportEvent};
use crate::packet::Message;
use crate::rendezvous::RoomId;
use crate::{NetError, ROOM_ID_BYTES};

const ROOM_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug)]
struct Endpoint {
    sender: Sender<TransportEvent>,
    links: HashSet<SocketAddr>,
    incoming: HashSet<SocketAddr>,
    max_connections: usize,
    max_incoming: usize,
    online: bool,
}

#[derive(Debug)]
struct Rendezvous {
    addr: SocketAddr,
    clients: HashSet<SocketAddr>,
    rooms: HashMap<RoomId, SocketAddr>,
    next_room: u32,
}

impl Rendezvous {
    fn room_for(&mut self, addr: SocketAddr) -> RoomId {
        if let Some((room, _)) = self.rooms.iter().find(|(_, host)| **host == addr) {
            return *room;
        }

        // Odd multiplier keeps codes unique for the first 32^5 rooms.
        let mut value = self.next_room.wrapping_mul(2_654_435_761) % (1 << 25);
        self.next_room += 1;
        let mut code = [0u8; ROOM_ID_BYTES];
        for byte in code.iter_mut() {
            *byte = ROOM_ALPHABET[(value % 32) as usize];
            value /= 32;
        }

        let room = RoomId::from_bytes(code).expect("room alphabet is alphanumeric");
        self.rooms.insert(room, addr);
        room
    }
}

#[derive(Debug, Default)]
struct Hub {
    endpoints: HashMap<SocketAddr, Endpoint>,
    rendezvous: Option<Rendezvous>,
}

impl Hub {
    fn push(&self, to: SocketAddr, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(&to) {
            log::trace!("{} <- {:?}", to, event);
            // The receiving transport may already be gone.
            let _ = endpoint.sender.send(event);
        }
    }

    fn is_rendezvous(&self, addr: SocketAddr) -> bool {
        matches!(&self.rendezvous, Some(rendezvous) if rendezvous.addr == addr)
    }

    fn is_linked(&self, from: SocketAddr, to: SocketAddr) -> bool {
        self.endpoints.get(&from).map_or(false, |endpoint| endpoint.links.contains(&to))
    }

    fn unlink(&mut self, a: SocketAddr, b: SocketAddr) -> bool {
        let mut removed = false;
        for (this, other) in [(a, b), (b, a)] {
            if let Some(endpoint) = self.endpoints.get_mut(&this) {
                removed |= endpoint.links.remove(&other);
                endpoint.incoming.remove(&other);
            }
            if let Some(rendezvous) = self.rendezvous.as_mut().filter(|r| r.addr == this) {
                rendezvous.clients.remove(&other);
            }
        }

        removed
    }

    fn connect(&mut self, from: SocketAddr, to: SocketAddr) {
        if self.is_linked(from, to) {
            log::trace!("{} is already connected to {}", from, to);
            return;
        }

        let has_free_connection = self
            .endpoints
            .get(&from)
            .map_or(false, |endpoint| endpoint.online && endpoint.links.len() < endpoint.max_connections);
        if !has_free_connection {
            self.push(from, TransportEvent::AttemptFailed(to));
            return;
        }

        if self.is_rendezvous(to) {
            self.connect_rendezvous(from, to);
            return;
        }

        let target_state = self
            .endpoints
            .get(&to)
            .filter(|target| target.online && from != to)
            .map(|target| target.incoming.len() < target.max_incoming && target.links.len() < target.max_connections);
        match target_state {
            None => self.push(from, TransportEvent::AttemptFailed(to)),
            Some(false) => self.push(from, TransportEvent::NoFreeIncomingConnections(to)),
            Some(true) => {
                if let Some(endpoint) = self.endpoints.get_mut(&from) {
                    endpoint.links.insert(to);
                }
                if let Some(target) = self.endpoints.get_mut(&to) {
                    target.links.insert(from);
                    target.incoming.insert(from);
                }
                self.push(from, TransportEvent::ConnectionAccepted(to));
                self.push(to, TransportEvent::IncomingConnection(from));
            }
        }
    }

    fn connect_rendezvous(&mut self, from: SocketAddr, server: SocketAddr) {
        let room = match self.rendezvous.as_mut() {
            Some(rendezvous) => {
                rendezvous.clients.insert(from);
                rendezvous.room_for(from)
            }
            None => return,
        };
        if let Some(endpoint) = self.endpoints.get_mut(&from) {
            endpoint.links.insert(server);
        }

        self.push(from, TransportEvent::ConnectionAccepted(server));
        // Every peer gets a room, only hosts keep it.
        match Message::AssignedRoom(room).encode() {
            Ok(payload) => self.push(from, TransportEvent::Message { from: server, payload }),
            Err(e) => log::error!("Failed to encode room assignment: {}", e),
        }
    }

    fn open_nat(&mut self, from: SocketAddr, room: &RoomId, server: SocketAddr) {
        let host = match &self.rendezvous {
            Some(rendezvous) if rendezvous.addr == server && rendezvous.clients.contains(&from) => {
                rendezvous.rooms.get(room).copied().filter(|host| *host != from && rendezvous.clients.contains(host))
            }
            _ => {
                self.push(from, TransportEvent::AttemptFailed(server));
                return;
            }
        };

        match host {
            Some(host) => {
                self.push(from, TransportEvent::PunchSucceeded(host));
                self.push(host, TransportEvent::PunchSucceeded(from));
            }
            None => self.push(from, TransportEvent::TargetNotConnected(server)),
        }
    }

    fn close(&mut self, from: SocketAddr, to: SocketAddr) {
        if self.unlink(from, to) {
            self.push(to, TransportEvent::Disconnected(from));
        }
    }

    fn shutdown(&mut self, addr: SocketAddr) {
        let links: Vec<SocketAddr> = match self.endpoints.get_mut(&addr) {
            Some(endpoint) => {
                endpoint.online = false;
                endpoint.links.iter().copied().collect()
            }
            None => return,
        };

        for link in links {
            self.close(addr, link);
        }
    }
}

/// In-process network connecting [`MemoryTransport`] endpoints, optionally with a rendezvous server.
///
/// The rendezvous server assigns a room to every endpoint that connects to it and brokers
/// punch-through requests between an endpoint and the owner of a room.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rendezvous(server_addr: SocketAddr) -> Self {
        let hub = Hub {
            endpoints: HashMap::new(),
            rendezvous: Some(Rendezvous {
                addr: server_addr,
                clients: HashSet::new(),
                rooms: HashMap::new(),
                next_room: 0,
            }),
        };

        Self {
            hub: Arc::new(Mutex::new(hub)),
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the endpoint bound to `addr`, replacing any previous endpoint with that address.
    pub fn endpoint(&self, addr: SocketAddr) -> MemoryTransport {
        let (sender, receiver) = unbounded();
        let mut hub = self.hub();
        hub.shutdown(addr);
        hub.endpoints.insert(
            addr,
            Endpoint {
                sender,
                links: HashSet::new(),
                incoming: HashSet::new(),
                max_connections: 0,
                max_incoming: 0,
                online: false,
            },
        );

        MemoryTransport {
            addr,
            network: self.clone(),
            receiver,
        }
    }

    pub fn rendezvous_addr(&self) -> Option<SocketAddr> {
        self.hub().rendezvous.as_ref().map(|rendezvous| rendezvous.addr)
    }

    /// Returns whether `a` currently holds a link to `b`.
    pub fn is_linked(&self, a: SocketAddr, b: SocketAddr) -> bool {
        self.hub().is_linked(a, b)
    }

    /// Drops the link between `a` and `b` as if the connection was lost,
    /// both ends receive [`TransportEvent::ConnectionLost`].
    pub fn sever(&self, a: SocketAddr, b: SocketAddr) {
        let mut hub = self.hub();
        if hub.unlink(a, b) {
            hub.push(a, TransportEvent::ConnectionLost(b));
            hub.push(b, TransportEvent::ConnectionLost(a));
        }
    }
}

/// A single endpoint of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    receiver: Receiver<TransportEvent>,
}

impl Transport for MemoryTransport {
    fn startup(&mut self, max_connections: usize) -> Result<(), NetError> {
        let mut hub = self.network.hub();
        let endpoint = hub.endpoints.get_mut(&self.addr).ok_or(NetError::NotConnected(self.addr))?;
        endpoint.max_connections = max_connections;
        endpoint.max_incoming = max_connections;
        endpoint.online = true;
        log::debug!("Memory endpoint {} started with {} connections", self.addr, max_connections);

        Ok(())
    }

    fn set_max_incoming_connections(&mut self, max_incoming: usize) {
        if let Some(endpoint) = self.network.hub().endpoints.get_mut(&self.addr) {
            endpoint.max_incoming = max_incoming;
        }
    }

    fn connect(&mut self, addr: SocketAddr) {
        self.network.hub().connect(self.addr, addr);
    }

    fn open_nat(&mut self, room: &RoomId, server_addr: SocketAddr) {
        self.network.hub().open_nat(self.addr, room, server_addr);
    }

    fn send(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<(), NetError> {
        let hub = self.network.hub();
        if !hub.is_linked(self.addr, addr) {
            return Err(NetError::NotConnected(addr));
        }
        if !hub.is_rendezvous(addr) {
            hub.push(
                addr,
                TransportEvent::Message {
                    from: self.addr,
                    payload: payload.to_vec(),
                },
            );
        }

        Ok(())
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        self.receiver.try_recv().ok()
    }

    fn close(&mut self, addr: SocketAddr) {
        self.network.hub().close(self.addr, addr);
    }

    fn shutdown(&mut self, timeout: Duration) {
        // Delivery is immediate, nothing is left to flush.
        log::trace!("Shutting down memory endpoint {} (timeout {:?})", self.addr, timeout);
        self.network.hub().shutdown(self.addr);
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain(transport: &mut MemoryTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.receive()).collect()
    }

    #[test]
    fn connect_to_rendezvous_assigns_room() {
        let server = addr(5000);
        let network = MemoryNetwork::with_rendezvous(server);
        let mut transport = network.endpoint(addr(1));
        transport.startup(2).unwrap();
        transport.connect(server);

        let events = drain(&mut transport);
        assert_eq!(events[0], TransportEvent::ConnectionAccepted(server));
        match &events[1] {
            TransportEvent::Message { from, payload } => {
                assert_eq!(*from, server);
                assert!(matches!(Message::decode(payload).unwrap(), Message::AssignedRoom(_)));
            }
            event => panic!("unexpected event {:?}", event),
        }
        assert!(network.is_linked(addr(1), server));
    }

    #[test]
    fn rooms_are_unique_and_stable() {
        let server = addr(5000);
        let network = MemoryNetwork::with_rendezvous(server);
        let mut hub = network.hub();
        let rendezvous = hub.rendezvous.as_mut().unwrap();
        let first = rendezvous.room_for(addr(1));
        let second = rendezvous.room_for(addr(2));
        assert_ne!(first, second);
        assert_eq!(rendezvous.room_for(addr(1)), first);
    }

    #[test]
    fn punchthrough_to_room() {
        let server = addr(5000);
        let network = MemoryNetwork::with_rendezvous(server);
        let mut host = network.endpoint(addr(1));
        let mut client = network.endpoint(addr(2));
        host.startup(4).unwrap();
        client.startup(4).unwrap();
        host.connect(server);
        client.connect(server);

        let room = drain(&mut host)
            .into_iter()
            .find_map(|event| match event {
                TransportEvent::Message { payload, .. } => match Message::decode(&payload) {
                    Ok(Message::AssignedRoom(room)) => Some(room),
                    _ => None,
                },
                _ => None,
            })
            .unwrap();
        drain(&mut client);

        client.open_nat(&room, server);
        assert_eq!(drain(&mut client), vec![TransportEvent::PunchSucceeded(addr(1))]);
        assert_eq!(drain(&mut host), vec![TransportEvent::PunchSucceeded(addr(2))]);

        client.open_nat(&"ZZZZZ".parse().unwrap(), server);
        assert_eq!(drain(&mut client), vec![TransportEvent::TargetNotConnected(server)]);
    }

    #[test]
    fn incoming_limit() {
        let network = MemoryNetwork::new();
        let mut a = network.endpoint(addr(1));
        let mut b = network.endpoint(addr(2));
        let mut c = network.endpoint(addr(3));
        a.startup(4).unwrap();
        b.startup(4).unwrap();
        c.startup(4).unwrap();
        c.set_max_incoming_connections(1);

        a.connect(addr(3));
        assert_eq!(drain(&mut a), vec![TransportEvent::ConnectionAccepted(addr(3))]);
        assert_eq!(drain(&mut c), vec![TransportEvent::IncomingConnection(addr(1))]);

        b.connect(addr(3));
        assert_eq!(drain(&mut b), vec![TransportEvent::NoFreeIncomingConnections(addr(3))]);
    }

    #[test]
    fn send_close_and_sever() {
        let network = MemoryNetwork::new();
        let mut a = network.endpoint(addr(1));
        let mut b = network.endpoint(addr(2));
        a.startup(1).unwrap();
        b.startup(1).unwrap();

        assert!(matches!(a.send(addr(2), &[1]), Err(NetError::NotConnected(_))));
        a.connect(addr(2));
        drain(&mut a);
        drain(&mut b);

        a.send(addr(2), &[1, 2]).unwrap();
        assert_eq!(
            drain(&mut b),
            vec![TransportEvent::Message {
                from: addr(1),
                payload: vec![1, 2]
            }]
        );

        network.sever(addr(1), addr(2));
        assert_eq!(drain(&mut a), vec![TransportEvent::ConnectionLost(addr(2))]);
        assert_eq!(drain(&mut b), vec![TransportEvent::ConnectionLost(addr(1))]);

        a.connect(addr(2));
        drain(&mut b);
        a.close(addr(2));
        assert_eq!(drain(&mut b), vec![TransportEvent::Disconnected(addr(1))]);
        assert!(!network.is_linked(addr(2), addr(1)));
    }

    #[test]
    fn connect_before_startup_fails() {
        let network = MemoryNetwork::new();
        let mut a = network.endpoint(addr(1));
        let mut b = network.endpoint(addr(2));
        b.startup(1).unwrap();
        a.connect(addr(2));
        assert_eq!(drain(&mut a), vec![TransportEvent::AttemptFailed(addr(2))]);
    }
}
