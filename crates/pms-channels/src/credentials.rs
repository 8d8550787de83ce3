//! Per-connection credential unsealing (SPEC_FULL.md §5).
//!
//! `ChannelConnection::credentials_sealed` is a ChaCha20-Poly1305-sealed
//! JSON blob; this module owns unsealing it into the one shape every
//! adapter needs (an API key for REST calls, a webhook signing secret).

use pms_core::PmsError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformCredentials {
    pub api_key: String,
    pub webhook_secret: String,
}

pub fn unseal(deployment_key: &[u8; 32], sealed: &[u8]) -> Result<PlatformCredentials, PmsError> {
    let plain = pms_crypto::open_secret(deployment_key, sealed).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
    serde_json::from_slice(plain.as_bytes()).map_err(|e| PmsError::Serialization(e.to_string()))
}

pub fn seal(deployment_key: &[u8; 32], credentials: &PlatformCredentials) -> Vec<u8> {
    let plain = serde_json::to_vec(credentials).expect("PlatformCredentials always serializes");
    pms_crypto::seal_secret(deployment_key, &plain)
}
