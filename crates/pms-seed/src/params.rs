//! Configuration for applying the sample fixture set.
//!
//! In production bring-up these come from the deployment's own secret
//! material; local bring-up and integration tests use a fixed key so the
//! seeded connections' sealed credential blobs are reproducible.

/// Inputs to [`crate::apply_seed`]. Real deployments supply the deployment
/// key from wherever they keep the credential-sealing key at rest; tests use
/// [`SeedParams::test_default`].
#[derive(Clone, Copy)]
pub struct SeedParams {
    /// Key `pms_channels::credentials::seal` uses to seal the sample
    /// connections' placeholder API keys and webhook secrets.
    pub deployment_key: [u8; 32],
}

impl SeedParams {
    pub fn new(deployment_key: [u8; 32]) -> Self {
        Self { deployment_key }
    }

    /// Fixed key for local bring-up and tests — never use in production.
    pub fn test_default() -> Self {
        Self { deployment_key: [7u8; 32] }
    }
}
