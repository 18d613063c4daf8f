use crate::rendezvous::RoomId;
use crate::serialize::Reader;
use crate::{NetError, MAX_PAYLOAD_BYTES, ROOM_ID_BYTES};

/// First tag value available to user messages on the transport,
/// lower values are reserved for the transport's own packets.
pub const MESSAGE_TAG_BASE: u8 = 134;

/// Bytes taken by the tag and the length prefix.
pub const FRAME_HEADER_BYTES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Standard = 0,
    AssignedRoom,
    JoinRoom,
    JoinRoomFail,
    Reconnect,
    PlayerJoined,
    PlayerLeft,
    StartGame,
}

impl MessageTag {
    pub fn to_byte(self) -> u8 {
        MESSAGE_TAG_BASE + self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, NetError> {
        use MessageTag::*;

        let tag = match byte.wrapping_sub(MESSAGE_TAG_BASE) {
            0 => Standard,
            1 => AssignedRoom,
            2 => JoinRoom,
            3 => JoinRoomFail,
            4 => Reconnect,
            5 => PlayerJoined,
            6 => PlayerLeft,
            7 => StartGame,
            _ => return Err(NetError::InvalidMessageTag(byte)),
        };

        Ok(tag)
    }
}

/// Room state the host hands to a joining or reconnecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomInfo {
    pub num_players: u8,
    pub max_players: u8,
    pub player_id: u8,
    pub api_version: u8,
}

impl RoomInfo {
    const BYTES: usize = 4;

    fn read(reader: &mut Reader) -> Result<Self, NetError> {
        Ok(Self {
            num_players: reader.read_u8()?,
            max_players: reader.read_u8()?,
            player_id: reader.read_u8()?,
            api_version: reader.read_u8()?,
        })
    }

    fn to_bytes(self) -> [u8; Self::BYTES] {
        [self.num_players, self.max_players, self.player_id, self.api_version]
    }
}

/// Every frame exchanged by sessions, `[tag][len][len bytes of payload]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// Opaque application payload.
    Standard(&'a [u8]),
    AssignedRoom(RoomId),
    JoinRoom(RoomInfo),
    JoinRoomFail,
    Reconnect(RoomInfo),
    PlayerJoined(u8),
    PlayerLeft(u8),
    StartGame,
}

impl<'a> Message<'a> {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Standard(_) => MessageTag::Standard,
            Message::AssignedRoom(_) => MessageTag::AssignedRoom,
            Message::JoinRoom(_) => MessageTag::JoinRoom,
            Message::JoinRoomFail => MessageTag::JoinRoomFail,
            Message::Reconnect(_) => MessageTag::Reconnect,
            Message::PlayerJoined(_) => MessageTag::PlayerJoined,
            Message::PlayerLeft(_) => MessageTag::PlayerLeft,
            Message::StartGame => MessageTag::StartGame,
        }
    }

    /// Frames the message, failing if the payload does not fit the length byte.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let info;
        let slot;
        let payload: &[u8] = match self {
            Message::Standard(payload) => *payload,
            Message::AssignedRoom(room) => room.as_bytes(),
            Message::JoinRoom(room_info) | Message::Reconnect(room_info) => {
                info = room_info.to_bytes();
                &info
            }
            Message::PlayerJoined(player_id) | Message::PlayerLeft(player_id) => {
                slot = [*player_id];
                &slot
            }
            Message::JoinRoomFail | Message::StartGame => &[],
        };

        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(NetError::PayloadAboveLimit(payload.len()));
        }

        let mut buffer = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
        buffer.push(self.tag().to_byte());
        buffer.push(payload.len() as u8);
        buffer.extend_from_slice(payload);

        Ok(buffer)
    }

    /// Parses a whole frame. The declared length must match the received bytes exactly.
    pub fn decode(buffer: &'a [u8]) -> Result<Self, NetError> {
        let mut frame = Reader::new(buffer);
        let tag = MessageTag::from_byte(frame.read_u8()?)?;
        let len = frame.read_u8()? as usize;
        let payload = frame.read_bytes(len)?;
        if !frame.is_empty() {
            return Err(NetError::TrailingBytes {
                declared: len,
                available: buffer.len() - FRAME_HEADER_BYTES,
            });
        }

        let mut reader = Reader::new(payload);
        let message = match tag {
            MessageTag::Standard => return Ok(Message::Standard(payload)),
            MessageTag::AssignedRoom => {
                let room: [u8; ROOM_ID_BYTES] = reader.read_array()?;
                Message::AssignedRoom(RoomId::from_bytes(room)?)
            }
            MessageTag::JoinRoom => Message::JoinRoom(RoomInfo::read(&mut reader)?),
            MessageTag::JoinRoomFail => Message::JoinRoomFail,
            MessageTag::Reconnect => Message::Reconnect(RoomInfo::read(&mut reader)?),
            MessageTag::PlayerJoined => Message::PlayerJoined(reader.read_u8()?),
            MessageTag::PlayerLeft => Message::PlayerLeft(reader.read_u8()?),
            MessageTag::StartGame => Message::StartGame,
        };
        reader.finish()?;

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_frame_layout() {
        let frame = Message::Standard(&[1, 2, 3]).encode().unwrap();
        assert_eq!(frame, vec![MESSAGE_TAG_BASE, 3, 1, 2, 3]);
        assert_eq!(Message::decode(&frame).unwrap(), Message::Standard(&[1, 2, 3]));
    }

    #[test]
    fn join_room_layout() {
        let info = RoomInfo {
            num_players: 3,
            max_players: 3,
            player_id: 2,
            api_version: 9,
        };
        let frame = Message::JoinRoom(info).encode().unwrap();
        assert_eq!(frame, vec![MESSAGE_TAG_BASE + 2, 4, 3, 3, 2, 9]);
        assert_eq!(Message::decode(&frame).unwrap(), Message::JoinRoom(info));
    }

    #[test]
    fn room_assigned() {
        let room: RoomId = "AB12Z".parse().unwrap();
        let frame = Message::AssignedRoom(room).encode().unwrap();
        assert_eq!(&frame[2..], b"AB12Z");
        assert_eq!(Message::decode(&frame).unwrap(), Message::AssignedRoom(room));
    }

    #[test]
    fn empty_messages() {
        for message in [Message::JoinRoomFail, Message::StartGame] {
            let frame = message.encode().unwrap();
            assert_eq!(frame.len(), FRAME_HEADER_BYTES);
            assert_eq!(Message::decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn payload_above_limit() {
        let payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        assert!(matches!(
            Message::Standard(&payload).encode(),
            Err(NetError::PayloadAboveLimit(len)) if len == MAX_PAYLOAD_BYTES + 1
        ));
        assert!(Message::Standard(&payload[..MAX_PAYLOAD_BYTES]).encode().is_ok());
    }

    #[test]
    fn declared_length_longer_than_frame() {
        let frame = [MessageTag::Standard.to_byte(), 5, 1, 2];
        assert!(matches!(
            Message::decode(&frame),
            Err(NetError::TruncatedMessage { needed: 5, available: 2 })
        ));
    }

    #[test]
    fn declared_length_shorter_than_frame() {
        let frame = [MessageTag::PlayerLeft.to_byte(), 1, 4, 4];
        assert!(matches!(Message::decode(&frame), Err(NetError::TrailingBytes { declared: 1, available: 2 })));
    }

    #[test]
    fn short_protocol_payload() {
        let frame = [MessageTag::JoinRoom.to_byte(), 3, 1, 1, 1];
        assert!(matches!(Message::decode(&frame), Err(NetError::TruncatedMessage { .. })));

        let frame = [MessageTag::PlayerJoined.to_byte(), 0];
        assert!(matches!(Message::decode(&frame), Err(NetError::TruncatedMessage { .. })));
    }

    #[test]
    fn unknown_tag() {
        assert!(matches!(Message::decode(&[3, 0]), Err(NetError::InvalidMessageTag(3))));
        assert!(matches!(
            Message::decode(&[MESSAGE_TAG_BASE + 8, 0]),
            Err(NetError::InvalidMessageTag(_))
        ));
    }

    #[test]
    fn empty_buffer() {
        assert!(matches!(Message::decode(&[]), Err(NetError::TruncatedMessage { .. })));
    }
}
