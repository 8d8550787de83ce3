//! Channel credential secrecy (SPEC_FULL.md §5: credential encryption at rest).
//!
//! A Channel Connection's credentials are sealed with ChaCha20-Poly1305
//! under a per-deployment key before they ever reach `pms-store`'s sled
//! tree. The decrypted form only ever lives inside `PlainSecret`, which
//! zeroizes its buffer on drop so a credential never lingers in memory
//! longer than the call that needed it.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("ciphertext too short to contain a nonce")]
    Truncated,

    #[error("decryption failed: wrong key or corrupted ciphertext")]
    DecryptionFailed,
}

/// A decrypted credential. Zeroized on drop; never `Debug`/`Display`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PlainSecret(Vec<u8>);

impl PlainSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Seal `plaintext` with `key` into a self-describing blob: a random
/// 12-byte nonce followed by the ciphertext.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).expect("encryption does not fail for valid key/nonce");
    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Open a blob produced by [`seal`].
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<PlainSecret, SecretError> {
    if sealed.len() < 12 {
        return Err(SecretError::Truncated);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(12);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SecretError::DecryptionFailed)?;
    Ok(PlainSecret(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"api-token-abc123");
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened.as_bytes(), b"api-token-abc123");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&[1u8; 32], b"secret");
        assert!(open(&[2u8; 32], &sealed).is_err());
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        assert!(matches!(open(&[0u8; 32], &[1, 2, 3]), Err(SecretError::Truncated)));
    }
}
