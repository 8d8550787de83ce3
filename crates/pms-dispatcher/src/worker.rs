//! The dispatcher's polling loop: claim a batch of due deliveries, partition
//! them by `(property_id, entity_id)` so same-entity deliveries run in
//! sequence order, and run partitions concurrently (spec.md §4.8: "deliveries
//! ... must be processed in sequence order ... cross-partition ordering is
//! not guaranteed").

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use pms_channels::AdapterRegistry;
use pms_core::{Clock, PropertyId};
use pms_resilience::circuit::CircuitBreaker;
use pms_resilience::rate_limit::RateLimiter;
use pms_store::{Delivery, PmsDb};

use crate::config::DispatcherConfig;
use crate::pipeline::dispatch_one;

/// Owns the shared dependencies one dispatcher instance polls against.
/// Cheap to clone: every field is already an `Arc` or a `Clock` impl that is
/// itself expected to be cheaply cloneable (`SystemClock`, `FixedClock`).
pub struct Dispatcher<C: Clock> {
    db: Arc<PmsDb>,
    registry: Arc<AdapterRegistry>,
    circuit: Arc<CircuitBreaker<C>>,
    rate_limiter: Arc<RateLimiter<C>>,
    clock: C,
    config: DispatcherConfig,
}

impl<C: Clock + Clone + Send + Sync + 'static> Dispatcher<C> {
    pub fn new(
        db: Arc<PmsDb>,
        registry: Arc<AdapterRegistry>,
        circuit: Arc<CircuitBreaker<C>>,
        rate_limiter: Arc<RateLimiter<C>>,
        clock: C,
        config: DispatcherConfig,
    ) -> Self {
        Self { db, registry, circuit, rate_limiter, clock, config }
    }

    /// Claim and drain whatever is due right now. Returns the number of
    /// deliveries processed, so callers (tests, the idle-backoff loop below)
    /// can tell a quiet poll from a busy one.
    pub async fn drain_once(&self) -> usize {
        let now = self.clock.now();
        let claimed = match self.claim(now) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "failed to claim due deliveries");
                return 0;
            }
        };
        if claimed.is_empty() {
            return 0;
        }

        let partitions = partition_by_entity(claimed);
        let count: usize = partitions.values().map(|v| v.len()).sum();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_partitions));

        let mut handles = Vec::with_capacity(partitions.len());
        for (_key, mut deliveries) in partitions {
            deliveries.sort_by_key(|d| d.sequence);
            let db = Arc::clone(&self.db);
            let registry = Arc::clone(&self.registry);
            let circuit = Arc::clone(&self.circuit);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let clock = self.clock.clone();
            let permit = Arc::clone(&semaphore);
            let credential_refresh_enabled = self.config.credential_refresh_enabled;

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                for delivery in deliveries {
                    dispatch_one(&db, &registry, &circuit, &rate_limiter, &clock, delivery, credential_refresh_enabled).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        count
    }

    fn claim(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Delivery>, pms_core::PmsError> {
        pms_store::Outbox::new(&self.db).claim_due(now, self.config.batch_size)
    }

    /// Run forever, polling at `config.poll_interval` whenever a drain comes
    /// back empty. Exits as soon as `shutdown` resolves, even mid-sleep.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("dispatcher shutting down");
                    return;
                }
                processed = self.drain_once() => {
                    if processed == 0 {
                        tokio::select! {
                            _ = &mut shutdown => return,
                            _ = tokio::time::sleep(self.config.poll_interval) => {}
                        }
                    }
                }
            }
        }
    }
}

fn partition_by_entity(deliveries: Vec<Delivery>) -> BTreeMap<(PropertyId, Uuid), Vec<Delivery>> {
    let mut partitions: BTreeMap<(PropertyId, Uuid), Vec<Delivery>> = BTreeMap::new();
    for delivery in deliveries {
        partitions.entry((delivery.property_id, delivery.entity_id)).or_default().push(delivery);
    }
    partitions
}
