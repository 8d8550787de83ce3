//! Per-channel token bucket rate limiting (spec.md §4.2, C3).
//!
//! One bucket per channel, shared across every dispatcher worker behind a
//! `Mutex`. Refill is continuous and wall-clock driven rather than
//! per-tick, so a long idle gap between calls does not starve the bucket of
//! tokens it should have accrued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pms_core::{Channel, Clock};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketParams {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

struct Bucket {
    params: BucketParams,
    tokens: f64,
    last_refill: DateTime<Utc>,
    /// Set by [`RateLimiter::penalize`] after a `429 Retry-After`; no tokens
    /// are granted before this instant regardless of bucket contents.
    next_eligible_at: Option<DateTime<Utc>>,
}

impl Bucket {
    fn new(params: BucketParams, now: DateTime<Utc>) -> Self {
        Self { params, tokens: params.capacity, last_refill: now, next_eligible_at: None }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.params.refill_per_sec).min(self.params.capacity);
        self.last_refill = now;
    }
}

/// Outcome of a non-blocking acquisition attempt.
pub enum Acquisition {
    Granted,
    Denied { wait: Duration },
}

pub struct RateLimiter<C: Clock> {
    clock: C,
    buckets: Mutex<HashMap<Channel, Bucket>>,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(clock: C) -> Self {
        let mut buckets = HashMap::new();
        let now = clock.now();
        for channel in Channel::ALL {
            let (capacity, refill_rate) = pms_core::constants::default_rate_limit(channel);
            buckets.insert(channel, Bucket::new(BucketParams { capacity: capacity as f64, refill_per_sec: refill_rate }, now));
        }
        Self { clock, buckets: Mutex::new(buckets) }
    }

    /// Override the seeded operating point for one channel (spec.md §4.2:
    /// "values shown as designed operating points, not constants to hard-code").
    pub fn set_limit(&self, channel: Channel, params: BucketParams) {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        buckets.insert(channel, Bucket::new(params, now));
    }

    /// Non-blocking: grants `n` tokens immediately or reports the minimum
    /// wait until they would be available.
    pub fn try_acquire(&self, channel: Channel, n: u32) -> Acquisition {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(channel).or_insert_with(|| {
            let (capacity, refill_rate) = pms_core::constants::default_rate_limit(channel);
            Bucket::new(BucketParams { capacity: capacity as f64, refill_per_sec: refill_rate }, now)
        });
        bucket.refill(now);

        if let Some(eligible) = bucket.next_eligible_at {
            if now < eligible {
                return Acquisition::Denied { wait: (eligible - now).to_std().unwrap_or_default() };
            }
        }

        let n = n as f64;
        if bucket.tokens >= n {
            bucket.tokens -= n;
            Acquisition::Granted
        } else {
            let deficit = n - bucket.tokens;
            let wait_secs = deficit / bucket.params.refill_per_sec;
            Acquisition::Denied { wait: Duration::from_secs_f64(wait_secs.max(0.0)) }
        }
    }

    /// Blocks cooperatively (via `std::thread::sleep`) until tokens are
    /// available or `max_wait` elapses.
    pub fn acquire(&self, channel: Channel, n: u32, max_wait: Duration) -> Result<(), Duration> {
        let start = self.clock.now();
        loop {
            match self.try_acquire(channel, n) {
                Acquisition::Granted => return Ok(()),
                Acquisition::Denied { wait } => {
                    let elapsed = (self.clock.now() - start).to_std().unwrap_or_default();
                    if elapsed >= max_wait {
                        return Err(wait);
                    }
                    std::thread::sleep(wait.min(Duration::from_millis(50)));
                }
            }
        }
    }

    /// Apply the penalty an external platform's `429 Retry-After` demands:
    /// drain the bucket and push back the next eligible instant.
    pub fn penalize(&self, channel: Channel, retry_after: Duration) {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        if let Some(bucket) = buckets.get_mut(&channel) {
            bucket.tokens = 0.0;
            bucket.next_eligible_at = Some(now + chrono::Duration::from_std(retry_after).unwrap_or_default());
            debug!(%channel, retry_after_ms = retry_after.as_millis() as u64, "rate bucket penalized");
        }
    }
}
