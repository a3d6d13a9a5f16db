//! Encoding for the `CONNECT` frame plaintext: a length-prefixed host string
//! followed by a big-endian port, per the wire data model.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, thiserror::Error)]
pub enum ConnectPayloadError {
    #[error("connect payload too short")]
    Short,
    #[error("connect host is not valid utf-8")]
    InvalidHost,
}

pub fn encode_connect(host: &str, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + host.len() + 2);
    buf.put_u16(host.len() as u16);
    buf.put_slice(host.as_bytes());
    buf.put_u16(port);
    buf.freeze()
}

pub fn decode_connect(mut payload: &[u8]) -> Result<(String, u16), ConnectPayloadError> {
    if payload.len() < 2 {
        return Err(ConnectPayloadError::Short);
    }
    let host_len = payload.get_u16() as usize;
    if payload.len() < host_len + 2 {
        return Err(ConnectPayloadError::Short);
    }
    let host_bytes = &payload[..host_len];
    let host = std::str::from_utf8(host_bytes)
        .map_err(|_| ConnectPayloadError::InvalidHost)?
        .to_string();
    payload.advance(host_len);
    let port = payload.get_u16();
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_payload_round_trip() {
        let encoded = encode_connect("example.internal", 8443);
        let (host, port) = decode_connect(&encoded).unwrap();
        assert_eq!(host, "example.internal");
        assert_eq!(port, 8443);
    }

    #[test]
    fn test_connect_payload_empty_host() {
        let encoded = encode_connect("", 80);
        let (host, port) = decode_connect(&encoded).unwrap();
        assert_eq!(host, "");
        assert_eq!(port, 80);
    }

    #[test]
    fn test_decode_connect_short_buffer() {
        assert!(matches!(
            decode_connect(&[0, 5, b'a', b'b']),
            Err(ConnectPayloadError::Short)
        ));
    }
}
