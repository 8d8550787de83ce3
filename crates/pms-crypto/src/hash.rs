//! BLAKE3 payload hashing for idempotency keys and delivery fingerprints.

/// Compute the BLAKE3 hash of arbitrary bytes -> 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hex-encoded BLAKE3 digest of an event payload, used as the idempotency
/// fingerprint stored alongside a delivery attempt's outcome.
pub fn payload_fingerprint(payload: &[u8]) -> String {
    hex::encode(blake3_hash(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = payload_fingerprint(b"hello");
        let b = payload_fingerprint(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_content() {
        assert_ne!(payload_fingerprint(b"hello"), payload_fingerprint(b"world"));
    }
}
