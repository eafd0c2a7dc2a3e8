//! Download token generation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes behind each token (192 bits of entropy).
const TOKEN_BYTES: usize = 24;

/// Generate a fresh URL-safe download token.
///
/// Tokens are opaque identifiers; two calls never collide in practice.
pub fn generate() -> String {
    let mut raw = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Check that a string looks like a token we produced: the URL-safe base64
/// alphabet and the exact encoded length. Anything else is an unknown path.
pub fn is_well_formed(s: &str) -> bool {
    s.len() == (TOKEN_BYTES * 4).div_ceil(3)
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert!(is_well_formed(&a));
        assert!(!a.contains('/'));
        assert!(!a.contains('+'));
    }

    #[test]
    fn well_formed_rejects_garbage() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"a".repeat(64)));
        let mut t = generate();
        t.push('!');
        assert!(!is_well_formed(&t));
    }
}
