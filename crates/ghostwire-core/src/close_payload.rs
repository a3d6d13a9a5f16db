//! Encoding for the `CLOSE` frame plaintext: a single big-endian `u16`
//! reason code, per the wire data model.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The stream ended because the local or remote side read EOF normally.
pub const CLOSE_REASON_EOF: u16 = 0;
/// The stream ended because a read or write against the local TCP
/// connection failed.
pub const CLOSE_REASON_IO_ERROR: u16 = 1;

pub fn encode_close(reason: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(reason);
    buf.freeze()
}

/// Best-effort decode: a payload too short to hold a reason code is treated
/// as a normal close rather than rejected, since the reason code is
/// informational only and never gates stream teardown.
pub fn decode_close(mut payload: &[u8]) -> u16 {
    if payload.len() < 2 {
        return CLOSE_REASON_EOF;
    }
    payload.get_u16()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_payload_round_trip_eof() {
        let encoded = encode_close(CLOSE_REASON_EOF);
        assert_eq!(decode_close(&encoded), CLOSE_REASON_EOF);
    }

    #[test]
    fn test_close_payload_round_trip_io_error() {
        let encoded = encode_close(CLOSE_REASON_IO_ERROR);
        assert_eq!(decode_close(&encoded), CLOSE_REASON_IO_ERROR);
    }

    #[test]
    fn test_decode_close_short_buffer_defaults_to_eof() {
        assert_eq!(decode_close(&[]), CLOSE_REASON_EOF);
        assert_eq!(decode_close(&[1]), CLOSE_REASON_EOF);
    }
}
