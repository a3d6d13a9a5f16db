use bytes::{Buf, BufMut, BytesMut};

/// Fixed length of a frame header: 1-byte type + 4-byte stream id + 4-byte
/// payload length, all integers big-endian.
pub const HEADER_SIZE: usize = 9;

/// The seven message types that can appear on the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Unencrypted, first frame only: payload is the shared token.
    Auth,
    /// Request to dial a remote host:port for a new stream.
    Connect,
    /// Raw stream bytes, at most [`crate::MAX_DATA_PAYLOAD`] per frame.
    Data,
    /// Retires a stream id on both ends.
    Close,
    /// Liveness probe; expects a `Pong` echoing its timestamp.
    Ping,
    /// Reply to `Ping`.
    Pong,
    /// Carries a UTF-8 error string for a specific stream id.
    Error,
}

impl MessageType {
    const fn as_byte(self) -> u8 {
        match self {
            MessageType::Auth => 0x01,
            MessageType::Connect => 0x02,
            MessageType::Data => 0x03,
            MessageType::Close => 0x04,
            MessageType::Ping => 0x05,
            MessageType::Pong => 0x06,
            MessageType::Error => 0x07,
        }
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MessageType::Auth),
            0x02 => Some(MessageType::Connect),
            0x03 => Some(MessageType::Data),
            0x04 => Some(MessageType::Close),
            0x05 => Some(MessageType::Ping),
            0x06 => Some(MessageType::Pong),
            0x07 => Some(MessageType::Error),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        MessageType::from_byte(byte).ok_or(UnknownMessageType(byte))
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value.as_byte()
    }
}

/// Raised when a header byte does not correspond to a known [`MessageType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type byte: {0:#04x}")]
pub struct UnknownMessageType(pub u8);

/// Writes the 9-byte big-endian header into `out`.
pub fn pack_header(message_type: MessageType, stream_id: u32, payload_len: u32, out: &mut BytesMut) {
    out.reserve(HEADER_SIZE);
    out.put_u8(message_type.into());
    out.put_u32(stream_id);
    out.put_u32(payload_len);
}

/// Reads a 9-byte big-endian header from the front of `buf` without
/// consuming the payload. Returns `None` if fewer than 9 bytes are
/// available.
pub fn unpack_header(buf: &[u8]) -> Option<(MessageType, u32, u32)> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let mut cursor = buf;
    let type_byte = cursor.get_u8();
    let stream_id = cursor.get_u32();
    let payload_len = cursor.get_u32();
    let message_type = MessageType::from_byte(type_byte)?;
    Some((message_type, stream_id, payload_len))
}
