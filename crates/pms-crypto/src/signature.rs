//! Webhook signature verification.
//!
//! Per spec.md §9 Open Questions, the exact signature scheme per channel
//! (Airbnb's HMAC variant, Booking.com's mutual TLS vs. signature, Google
//! VR's OAuth token audience) is out of scope for the core and owned by
//! each adapter. This module provides the one concrete scheme every
//! HMAC-based adapter needs (an HMAC-SHA256 comparison against a shared
//! secret), so adapters only have to supply the header name and secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("signature header is not valid hex")]
    MalformedHeader,

    #[error("signature does not match")]
    Mismatch,
}

/// Verify `hex_signature` is the HMAC-SHA256 of `body` under `secret`.
/// Uses `Mac::verify_slice`'s constant-time comparison.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], hex_signature: &str) -> Result<(), SignatureError> {
    let expected_bytes = hex::decode(hex_signature.trim()).map_err(|_| SignatureError::MalformedHeader)?;
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected_bytes).map_err(|_| SignatureError::Mismatch)
}

/// Compute the hex-encoded HMAC-SHA256 signature of `body` under `secret`,
/// used by adapters' own test fixtures and by the rejection-path helpers
/// that must echo a signature back to a sandboxed platform endpoint.
pub fn sign_hmac_sha256(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison for platforms (Google VR) that authenticate
/// webhook calls with a static bearer token rather than a body signature.
/// `provided` is the token as received, without the `Bearer ` prefix.
pub fn verify_bearer_token(secret: &str, provided: &str) -> Result<(), SignatureError> {
    let (a, b) = (secret.as_bytes(), provided.as_bytes());
    if a.len() != b.len() {
        return Err(SignatureError::Mismatch);
    }
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    if diff == 0 {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let secret = b"shh";
        let body = b"payload-bytes";
        let sig = sign_hmac_sha256(secret, body);
        assert!(verify_hmac_sha256(secret, body, &sig).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"shh";
        let sig = sign_hmac_sha256(secret, b"original");
        assert_eq!(verify_hmac_sha256(secret, b"tampered", &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(
            verify_hmac_sha256(b"shh", b"body", "not-hex!!"),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn bearer_token_accepts_matching_secret() {
        assert_eq!(verify_bearer_token("tok-abc", "tok-abc"), Ok(()));
    }

    #[test]
    fn bearer_token_rejects_mismatch() {
        assert_eq!(verify_bearer_token("tok-abc", "tok-xyz"), Err(SignatureError::Mismatch));
        assert_eq!(verify_bearer_token("tok-abc", "tok-ab"), Err(SignatureError::Mismatch));
    }
}
