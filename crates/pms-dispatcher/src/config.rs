/// Tunables for the dispatcher's polling loop (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often a worker polls `claim_due` when nothing was due last round.
    pub poll_interval: std::time::Duration,
    /// Max deliveries claimed per poll.
    pub batch_size: usize,
    /// Number of entity partitions processed concurrently; deliveries within
    /// one partition always run in sequence order regardless of this value.
    pub max_concurrent_partitions: usize,
    /// Whether an `AUTH_FAILED` outcome attempts one `refresh_credentials`
    /// call before disabling the connection. Tests that want to observe the
    /// disable path directly without a working refresh set this `false`.
    pub credential_refresh_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_millis(500),
            batch_size: 50,
            max_concurrent_partitions: 16,
            credential_refresh_enabled: true,
        }
    }
}
