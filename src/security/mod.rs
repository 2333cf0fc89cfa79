//! Secret-handling helpers shared by the lifecycle and the chat-command adapter.
//!
//! [`constant_time_eq`] is used whenever an access secret supplied by a reader
//! is compared against the stored one. [`seal`] holds the one-time key
//! encryption used when the server itself has to produce ciphertext.

pub mod seal;

pub use seal::{open, seal, SealedPayload};

/// Constant-time string comparison to prevent timing attacks.
///
/// Does not short-circuit on length mismatch. Always iterates over the
/// longer input so length is not leaked through timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    let len_diff = a.len() ^ b.len();

    // XOR each byte, padding the shorter input with zeros.
    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = *a.get(i).unwrap_or(&0);
        let y = *b.get(i).unwrap_or(&0);
        byte_diff |= x ^ y;
    }
    (len_diff == 0) & (byte_diff == 0)
}

/// Whether a reader holding `supplied` may take a record protected by `stored`.
///
/// Records without an access secret are open to anyone holding the handle.
pub fn access_secret_matches(stored: Option<&str>, supplied: Option<&str>) -> bool {
    match stored {
        None => true,
        Some(expected) => constant_time_eq(expected, supplied.unwrap_or("")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_same() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("a", ""));
    }

    #[test]
    fn unprotected_record_ignores_supplied_secret() {
        assert!(access_secret_matches(None, None));
        assert!(access_secret_matches(None, Some("anything")));
    }

    #[test]
    fn protected_record_requires_exact_secret() {
        assert!(access_secret_matches(Some("s"), Some("s")));
        assert!(!access_secret_matches(Some("s"), None));
        assert!(!access_secret_matches(Some("s"), Some("")));
        assert!(!access_secret_matches(Some("s"), Some("S")));
    }

    #[test]
    fn empty_stored_secret_still_needs_a_match() {
        assert!(access_secret_matches(Some(""), None));
        assert!(!access_secret_matches(Some(""), Some("x")));
    }
}
