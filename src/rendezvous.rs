use std::{fmt, net::SocketAddr, str::FromStr};

use crate::transport::Transport;
use crate::{NetError, ROOM_ID_BYTES};

/// Short code the rendezvous server assigns to a host session.
///
/// Clients learn it out-of-band (typed by the player) and use it to
/// ask the server for a punch-through to the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoomId([u8; ROOM_ID_BYTES]);

impl RoomId {
    pub fn from_bytes(bytes: [u8; ROOM_ID_BYTES]) -> Result<Self, NetError> {
        if !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err(NetError::InvalidRoomId(String::from_utf8_lossy(&bytes).into_owned()));
        }

        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("room ids only contain ascii characters")
    }
}

impl FromStr for RoomId {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; ROOM_ID_BYTES] = s.as_bytes().try_into().map_err(|_| NetError::InvalidRoomId(s.to_owned()))?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomId({})", self.as_str())
    }
}

/// Link to the rendezvous (punch-through) server.
#[derive(Debug)]
pub(crate) struct RendezvousClient {
    server_addr: SocketAddr,
    connected: bool,
}

impl RendezvousClient {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            connected: false,
        }
    }

    pub fn is_server(&self, addr: SocketAddr) -> bool {
        addr == self.server_addr
    }

    pub fn connect<T: Transport>(&mut self, transport: &mut T) {
        log::debug!("Connecting to punchthrough server {}", self.server_addr);
        transport.connect(self.server_addr);
    }

    pub fn set_connected(&mut self) {
        log::debug!("Connected to punchthrough server {}", self.server_addr);
        self.connected = true;
    }

    pub fn set_disconnected(&mut self) {
        self.connected = false;
    }

    /// Asks the server to open a path to the host owning `room`.
    pub fn request_punchthrough<T: Transport>(&self, transport: &mut T, room: &RoomId) {
        log::debug!("Requesting punchthrough to room {}", room);
        transport.open_nat(room, self.server_addr);
    }

    pub fn disconnect<T: Transport>(&mut self, transport: &mut T) {
        if self.connected {
            log::debug!("Closing connection to punchthrough server {}", self.server_addr);
            transport.close(self.server_addr);
            self.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_room_id() {
        let room: RoomId = "Q7X2A".parse().unwrap();
        assert_eq!(room.as_str(), "Q7X2A");
        assert_eq!(room.to_string(), "Q7X2A");
        assert_eq!(room.as_bytes(), b"Q7X2A");
    }

    #[test]
    fn invalid_room_id() {
        assert!(matches!("ABCD".parse::<RoomId>(), Err(NetError::InvalidRoomId(_))));
        assert!(matches!("ABCDEF".parse::<RoomId>(), Err(NetError::InvalidRoomId(_))));
        assert!(matches!("AB D1".parse::<RoomId>(), Err(NetError::InvalidRoomId(_))));
        assert!(matches!(RoomId::from_bytes([0, 1, 2, 3, 4]), Err(NetError::InvalidRoomId(_))));
    }
}
