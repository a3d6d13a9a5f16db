use bytes::{Bytes, BytesMut};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;

use crate::frame::{pack_header, unpack_header, MessageType, HEADER_SIZE};
use crate::keys::SessionKey;

/// Length in bytes of the random nonce prepended to every AEAD envelope.
const NONCE_LEN: usize = 12;
/// Length in bytes of the Poly1305 authentication tag appended by
/// ChaCha20-Poly1305.
const TAG_LEN: usize = 16;

/// Errors raised while packing or unpacking frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer does not yet contain a complete frame.
    #[error("short buffer: need {needed} bytes, have {have}")]
    Short { needed: usize, have: usize },
    /// Decryption failed: the nonce, header or ciphertext was tampered with,
    /// or the wrong key was used.
    #[error("authentication failed")]
    AuthFailed,
    /// The header named a byte that is not a known message type.
    #[error(transparent)]
    UnknownMessageType(#[from] crate::frame::UnknownMessageType),
    /// A plaintext exceeded the maximum payload size before encryption.
    #[error("payload too large: {0} bytes exceeds {max}", max = crate::MAX_DATA_PAYLOAD)]
    PayloadTooLarge(usize),
}

/// Encrypts `plaintext` under `key`, authenticating `header` as associated
/// data. The returned envelope is a fresh random 12-byte nonce followed by
/// the ChaCha20-Poly1305 ciphertext and 16-byte tag.
pub fn encrypt(key: &SessionKey, plaintext: &[u8], header: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // encrypt() only fails on plaintexts larger than the algorithm's
    // internal limit (far beyond MAX_DATA_PAYLOAD), which callers already
    // guard against via pack_frame.
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: header,
            },
        )
        .expect("chacha20poly1305 encryption failed");

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    envelope
}

/// Decrypts an envelope produced by [`encrypt`] under the same `key` and
/// `header`. Fails with [`CodecError::AuthFailed`] if the envelope is too
/// short to contain a nonce and tag, or if authentication fails for any
/// reason (wrong key, tampered header, tampered ciphertext).
pub fn decrypt(key: &SessionKey, envelope: &[u8], header: &[u8]) -> Result<Vec<u8>, CodecError> {
    if envelope.len() < NONCE_LEN {
        return Err(CodecError::AuthFailed);
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| CodecError::AuthFailed)
}

/// Packs a frame for the wire: header || payload, where the payload is the
/// raw token bytes for [`MessageType::Auth`] and an AEAD envelope over
/// `plaintext` (with the header as associated data) for every other type.
pub fn pack_frame(
    message_type: MessageType,
    stream_id: u32,
    plaintext: &[u8],
    key: &SessionKey,
) -> Result<BytesMut, CodecError> {
    if matches!(message_type, MessageType::Data) && plaintext.len() > crate::MAX_DATA_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(plaintext.len()));
    }

    let mut out = BytesMut::new();
    if matches!(message_type, MessageType::Auth) {
        pack_header(message_type, stream_id, plaintext.len() as u32, &mut out);
        out.extend_from_slice(plaintext);
        return Ok(out);
    }

    // The envelope length is a deterministic function of the plaintext
    // length (nonce prefix + ciphertext + tag), so the real on-wire length
    // is known before encrypting and the full header can be authenticated.
    let envelope_len = (NONCE_LEN + plaintext.len() + TAG_LEN) as u32;
    let aad = encode_aad(message_type, stream_id, envelope_len);
    let envelope = encrypt(key, plaintext, &aad);
    debug_assert_eq!(envelope.len() as u32, envelope_len);
    pack_header(message_type, stream_id, envelope_len, &mut out);
    out.extend_from_slice(&envelope);
    Ok(out)
}

/// The associated-data header used for AEAD: the full 9-byte header as it
/// will appear on the wire, including the envelope length, so a tampered
/// length field fails authentication instead of silently passing through.
/// Both endpoints compute it identically because both derive type, stream
/// id and envelope length from the same frame.
fn encode_aad(message_type: MessageType, stream_id: u32, envelope_len: u32) -> BytesMut {
    let mut aad = BytesMut::with_capacity(HEADER_SIZE);
    pack_header(message_type, stream_id, envelope_len, &mut aad);
    aad
}

/// Attempts to decode one complete frame from the front of `buf`. Returns
/// the decoded message type, stream id, decrypted plaintext, and the number
/// of bytes consumed from `buf`.
///
/// `AUTH` frames are unencrypted and may legitimately arrive as a partial
/// read, so a short buffer for them is reported as `Err(CodecError::Short)`.
/// Every other message type is always transmitted as exactly one WebSocket
/// message carrying exactly one frame (the transport preserves message
/// boundaries), so for them the header's length field must exactly match
/// the number of bytes actually present; any mismatch can only be a
/// tampered length field, not a legitimate partial read, and is reported as
/// `Err(CodecError::AuthFailed)` rather than `Short`.
pub fn unpack_frame(
    buf: &[u8],
    key: &SessionKey,
) -> Result<(MessageType, u32, Bytes, usize), CodecError> {
    let (message_type, stream_id, payload_len) =
        unpack_header(buf).ok_or(CodecError::Short {
            needed: HEADER_SIZE,
            have: buf.len(),
        })?;
    let payload_len = payload_len as usize;

    if matches!(message_type, MessageType::Auth) {
        let total = HEADER_SIZE + payload_len;
        if buf.len() < total {
            return Err(CodecError::Short {
                needed: total,
                have: buf.len(),
            });
        }
        let payload = &buf[HEADER_SIZE..total];
        return Ok((message_type, stream_id, Bytes::copy_from_slice(payload), total));
    }

    let available = buf.len() - HEADER_SIZE;
    if payload_len != available {
        return Err(CodecError::AuthFailed);
    }
    let payload = &buf[HEADER_SIZE..];
    let aad = encode_aad(message_type, stream_id, payload_len as u32);
    let plaintext = decrypt(key, payload, &aad)?;
    Ok((message_type, stream_id, Bytes::from(plaintext), HEADER_SIZE + payload_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_key;

    fn test_key() -> SessionKey {
        derive_key("test-token", "ws://127.0.0.1:9443/ws")
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = test_key();
        let header = encode_aad(MessageType::Data, 7, (NONCE_LEN + 16 + TAG_LEN) as u32);
        let plaintext = b"hello, ghostwire";
        let envelope = encrypt(&key, plaintext, &header);
        let decrypted = decrypt(&key, &envelope, &header).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_rejects_wrong_key() {
        let key = test_key();
        let other_key = derive_key("other-token", "ws://127.0.0.1:9443/ws");
        let header = encode_aad(MessageType::Data, 7, (NONCE_LEN + 7 + TAG_LEN) as u32);
        let envelope = encrypt(&key, b"payload", &header);
        assert!(matches!(
            decrypt(&other_key, &envelope, &header),
            Err(CodecError::AuthFailed)
        ));
    }

    #[test]
    fn test_decrypt_rejects_bit_flip_in_ciphertext() {
        let key = test_key();
        let header = encode_aad(MessageType::Data, 7, (NONCE_LEN + 7 + TAG_LEN) as u32);
        let mut envelope = encrypt(&key, b"payload", &header);
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &envelope, &header),
            Err(CodecError::AuthFailed)
        ));
    }

    #[test]
    fn test_decrypt_rejects_bit_flip_in_header() {
        let key = test_key();
        let header = encode_aad(MessageType::Data, 7, (NONCE_LEN + 7 + TAG_LEN) as u32);
        let envelope = encrypt(&key, b"payload", &header);
        let mut tampered_header = header.clone();
        tampered_header[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &envelope, &tampered_header),
            Err(CodecError::AuthFailed)
        ));
    }

    #[test]
    fn test_decrypt_rejects_bit_flip_in_nonce() {
        let key = test_key();
        let header = encode_aad(MessageType::Data, 7, (NONCE_LEN + 7 + TAG_LEN) as u32);
        let mut envelope = encrypt(&key, b"payload", &header);
        envelope[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &envelope, &header),
            Err(CodecError::AuthFailed)
        ));
    }

    #[test]
    fn test_pack_unpack_frame_round_trip_data() {
        let key = test_key();
        let packed = pack_frame(MessageType::Data, 99, b"abc123", &key).unwrap();
        let (mt, stream_id, payload, consumed) = unpack_frame(&packed, &key).unwrap();
        assert_eq!(mt, MessageType::Data);
        assert_eq!(stream_id, 99);
        assert_eq!(&payload[..], b"abc123");
        assert_eq!(consumed, packed.len());
    }

    #[test]
    fn test_pack_unpack_frame_empty_payload() {
        let key = test_key();
        let packed = pack_frame(MessageType::Data, 1, b"", &key).unwrap();
        let (_, _, payload, _) = unpack_frame(&packed, &key).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_pack_unpack_frame_max_payload() {
        let key = test_key();
        let plaintext = vec![0xABu8; crate::MAX_DATA_PAYLOAD];
        let packed = pack_frame(MessageType::Data, 1, &plaintext, &key).unwrap();
        let (_, _, payload, _) = unpack_frame(&packed, &key).unwrap();
        assert_eq!(payload.len(), crate::MAX_DATA_PAYLOAD);
    }

    #[test]
    fn test_pack_frame_rejects_oversized_data_payload() {
        let key = test_key();
        let plaintext = vec![0u8; crate::MAX_DATA_PAYLOAD + 1];
        assert!(matches!(
            pack_frame(MessageType::Data, 1, &plaintext, &key),
            Err(CodecError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_pack_unpack_auth_frame_is_unencrypted() {
        let key = test_key();
        let token = b"shared-secret-token-";
        let packed = pack_frame(MessageType::Auth, 0, token, &key).unwrap();
        // AUTH payload is stored verbatim right after the 9-byte header.
        assert_eq!(&packed[HEADER_SIZE..], token);
        let (mt, _, payload, _) = unpack_frame(&packed, &key).unwrap();
        assert_eq!(mt, MessageType::Auth);
        assert_eq!(&payload[..], token);
    }

    #[test]
    fn test_unpack_frame_short_header() {
        let key = test_key();
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(matches!(
            unpack_frame(&buf, &key),
            Err(CodecError::Short { .. })
        ));
    }

    #[test]
    fn test_unpack_frame_short_payload() {
        // AUTH is the one message type that can legitimately arrive as a
        // partial read, so it's the only one that still reports `Short`
        // for a truncated payload.
        let key = test_key();
        let packed = pack_frame(MessageType::Auth, 0, b"shared-secret-token-", &key).unwrap();
        let truncated = &packed[..packed.len() - 1];
        assert!(matches!(
            unpack_frame(truncated, &key),
            Err(CodecError::Short { .. })
        ));
    }

    #[test]
    fn test_unpack_frame_rejects_tampered_length_on_encrypted_frame() {
        // Non-AUTH frames always travel as exactly one transport message,
        // so a header length that doesn't match the bytes actually present
        // can only mean the length field was tampered with, not that the
        // read was partial.
        let key = test_key();
        let packed = pack_frame(MessageType::Data, 1, b"abc", &key).unwrap();
        let mut tampered = BytesMut::from(&packed[..]);
        tampered[8] ^= 0x01;
        assert!(matches!(
            unpack_frame(&tampered, &key),
            Err(CodecError::AuthFailed)
        ));
    }

    #[test]
    fn test_pack_unpack_round_trip_all_message_types() {
        let key = test_key();
        for mt in [
            MessageType::Connect,
            MessageType::Data,
            MessageType::Close,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Error,
        ] {
            let packed = pack_frame(mt, 5, b"payload-bytes", &key).unwrap();
            let (decoded_type, stream_id, payload, _) = unpack_frame(&packed, &key).unwrap();
            assert_eq!(decoded_type, mt);
            assert_eq!(stream_id, 5);
            assert_eq!(&payload[..], b"payload-bytes");
        }
    }

    #[test]
    fn test_retargeting_stream_id_breaks_authentication() {
        // Associated data binds the header to the ciphertext: splicing a
        // DATA frame's ciphertext onto a different stream id must fail.
        let key = test_key();
        let packed = pack_frame(MessageType::Data, 1, b"abc", &key).unwrap();
        let mut retargeted = BytesMut::from(&packed[..]);
        // Stream id occupies bytes [1..5) of the header.
        retargeted[1..5].copy_from_slice(&2u32.to_be_bytes());
        assert!(matches!(
            unpack_frame(&retargeted, &key),
            Err(CodecError::AuthFailed)
        ));
    }
}
