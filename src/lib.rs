//! Natlobby is the networking core of a small peer-to-peer game lobby. One player hosts
//! a room and the others join it using a short room code, with a punch-through
//! rendezvous server brokering the connections between players behind NATs.
//!
//! The host is the hub of the session: it assigns player ids, tells everyone who
//! joined or left and forwards application messages between clients.
//!
//! Has the following features:
//! - Room creation and joining by room code
//! - Player id assignment and live player tracking
//! - Reconnection of dropped players after the game started
//! - Big-endian helpers to marshal ints and floats into application payloads
//!
//! The session is agnostic to the transport, anything implementing [`transport::Transport`]
//! can be used. An in memory implementation is available for local play and tests.
mod config;
mod error;
mod packet;
mod registry;
mod rendezvous;
mod serialize;
mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::NetError;
pub use packet::{Message, MessageTag, RoomInfo, MESSAGE_TAG_BASE};
pub use registry::PlayerSet;
pub use rendezvous::RoomId;
pub use serialize::{decode_float, decode_int, encode_float, encode_int, write_float, write_int, Reader};
pub use session::{Role, Session, SessionStatus, SHUTDOWN_TIMEOUT};

/// The maximum number of players in a room, host included.
pub const MAX_PLAYERS: usize = 32;
/// The maximum number of bytes in a single message payload.
pub const MAX_PAYLOAD_BYTES: usize = u8::MAX as usize;
/// The number of characters in a room id.
pub const ROOM_ID_BYTES: usize = 5;
