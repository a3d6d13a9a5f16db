use rand::Rng;

/// Number of characters in a generated token.
pub const TOKEN_LEN: usize = 20;

const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generates a fresh 20-character URL-safe token using a cryptographically
/// secure RNG.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Constant-time token comparison. Returns `false` immediately if the
/// lengths differ (no content is scanned in that case); otherwise compares
/// every byte without short-circuiting on the first mismatch, so the
/// running time of the content comparison depends only on the shared
/// length, not on where a mismatch occurs.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
