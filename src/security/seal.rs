// One-time payload sealing for messages the server creates on a user's behalf.
//
// Each seal generates a fresh 256-bit ChaCha20-Poly1305 key and a random
// 12-byte nonce. The stored payload is `base64(nonce ‖ ciphertext ‖ tag)`; the
// key is handed back to the caller only, encoded as URL-safe base64 so it can
// travel in a link fragment. The server keeps no copy of the key.

use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

/// Length of the random encryption key in bytes (256-bit, matches `ChaCha20`).
const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length in bytes.
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Standard base64 of `nonce ‖ ciphertext ‖ tag`; safe to persist.
    pub payload: String,
    /// URL-safe base64 key; must only ever be given to the message author.
    pub key: String,
}

pub fn seal(plaintext: &str) -> Result<SealedPayload> {
    let key = ChaCha20Poly1305::generate_key(&mut OsRng);
    let cipher = ChaCha20Poly1305::new(&key);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(SealedPayload {
        payload: STANDARD.encode(blob),
        key: URL_SAFE_NO_PAD.encode(key),
    })
}

/// Reverse of [`seal`]. Used by tests and by tooling that holds the key.
pub fn open(payload: &str, key: &str) -> Result<String> {
    let key_bytes = URL_SAFE_NO_PAD
        .decode(key)
        .context("Failed to decode payload key (corrupt base64)")?;
    anyhow::ensure!(key_bytes.len() == KEY_LEN, "Payload key has wrong length");

    let blob = STANDARD
        .decode(payload)
        .context("Failed to decode sealed payload (corrupt base64)")?;
    anyhow::ensure!(blob.len() > NONCE_LEN, "Sealed payload too short (missing nonce)");

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| anyhow::anyhow!("Decryption failed: wrong key or tampered data"))?;

    String::from_utf8(plaintext).context("Opened payload is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_payload_opens_with_its_key() {
        let sealed = seal("launch codes").unwrap();
        assert_eq!(open(&sealed.payload, &sealed.key).unwrap(), "launch codes");
    }

    #[test]
    fn payload_does_not_contain_plaintext() {
        let sealed = seal("launch codes").unwrap();
        let raw = STANDARD.decode(&sealed.payload).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"launch"));
    }

    #[test]
    fn each_seal_uses_a_fresh_key() {
        let a = seal("same").unwrap();
        let b = seal("same").unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.payload, b.payload);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let a = seal("secret").unwrap();
        let b = seal("secret").unwrap();
        assert!(open(&a.payload, &b.key).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let sealed = seal("secret").unwrap();
        let mut raw = STANDARD.decode(&sealed.payload).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(open(&STANDARD.encode(raw), &sealed.key).is_err());
    }

    #[test]
    fn key_is_url_safe() {
        let sealed = seal("x").unwrap();
        assert!(sealed
            .key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
