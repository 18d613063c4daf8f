use std::{error, fmt, io, net::SocketAddr};

use crate::{MAX_PAYLOAD_BYTES, MAX_PLAYERS, ROOM_ID_BYTES};

/// Enum with possibles errors that can occur.
#[derive(Debug)]
pub enum NetError {
    InvalidCapacity(usize),
    InvalidRoomId(String),
    TruncatedMessage { needed: usize, available: usize },
    TrailingBytes { declared: usize, available: usize },
    InvalidMessageTag(u8),
    PayloadAboveLimit(usize),
    NotConnected(SocketAddr),
    IoError(io::Error),
}

impl fmt::Display for NetError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use NetError::*;

        match *self {
            InvalidCapacity(capacity) => write!(fmt, "player capacity {} is outside 1..={}", capacity, MAX_PLAYERS),
            InvalidRoomId(ref room) => write!(fmt, "room id {:?} is not {} ascii alphanumeric characters", room, ROOM_ID_BYTES),
            TruncatedMessage { needed, available } => {
                write!(fmt, "message is truncated: needed {} bytes but only {} are available", needed, available)
            }
            TrailingBytes { declared, available } => {
                write!(fmt, "message declared {} bytes but {} bytes were received", declared, available)
            }
            InvalidMessageTag(tag) => write!(fmt, "invalid message tag {}", tag),
            PayloadAboveLimit(len) => write!(fmt, "payload of {} bytes is above the {} bytes limit", len, MAX_PAYLOAD_BYTES),
            NotConnected(addr) => write!(fmt, "no connection to {}", addr),
            IoError(ref err) => write!(fmt, "{}", err),
        }
    }
}

impl error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(inner: io::Error) -> Self {
        NetError::IoError(inner)
    }
}
