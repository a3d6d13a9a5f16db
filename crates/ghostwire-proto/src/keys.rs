use sha2::{Digest, Sha256};

/// Length in bytes of a derived session key.
pub const SESSION_KEY_LEN: usize = 32;

/// A 32-byte symmetric key derived from the shared token and carrier URL,
/// valid for the lifetime of one carrier.
pub type SessionKey = [u8; SESSION_KEY_LEN];

/// Derives the session key for a carrier from its shared `token` and
/// canonical `url`. Deterministic: `derive_key(t, u) == derive_key(t, u)`
/// for all inputs, and both endpoints must agree on `url` (scheme, host,
/// port and path) to arrive at the same key.
///
/// One-shot SHA-256 over `token || 0x7C || url`, no salt.
pub fn derive_key(token: &str, url: &str) -> SessionKey {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update([b'|']);
    hasher.update(url.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key("token123", "ws://127.0.0.1:9443/ws");
        let b = derive_key("token123", "ws://127.0.0.1:9443/ws");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_key_is_32_bytes() {
        let key = derive_key("token123", "ws://127.0.0.1:9443/ws");
        assert_eq!(key.len(), SESSION_KEY_LEN);
    }

    #[test]
    fn test_derive_key_differs_on_token() {
        let a = derive_key("token-a", "ws://127.0.0.1:9443/ws");
        let b = derive_key("token-b", "ws://127.0.0.1:9443/ws");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_differs_on_url() {
        let a = derive_key("token123", "ws://127.0.0.1:9443/ws");
        let b = derive_key("token123", "ws://127.0.0.1:9444/ws");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_no_boundary_confusion() {
        // "ab" | "c" must not collide with "a" | "bc" despite concatenating
        // to the same raw bytes, because of the 0x7C separator.
        let a = derive_key("ab", "c");
        let b = derive_key("a", "bc");
        assert_ne!(a, b);
    }
}
