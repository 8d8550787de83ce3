pub mod hash;
pub mod secret;
pub mod signature;

pub use hash::{blake3_hash, payload_fingerprint};
pub use secret::{open as open_secret, seal as seal_secret, PlainSecret, SecretError};
pub use signature::{sign_hmac_sha256, verify_bearer_token, verify_hmac_sha256, SignatureError};
