//! Clock & ID generation (C1): injectable wall-clock time and unpredictable
//! identifiers, so that every other component depends on a trait rather than
//! `Utc::now()`/`Uuid::new_v4()` directly and can be driven deterministically
//! in tests.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Wall-clock time injection point. `SystemClock` is used in production;
/// `FixedClock` lets tests advance time explicitly (needed for lock TTL
/// expiry, circuit breaker cooldowns, and backoff scheduling tests).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Shareable across threads/tasks
/// via `Arc` so a test can hold one handle and pass clones to every
/// component under test.
#[derive(Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { inner: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("clock mutex poisoned")
    }
}

/// Generate an unpredictable, unforgeable owner/fencing token for a lock
/// acquisition (spec.md §4.1: "an unpredictable value").
pub fn new_fencing_token() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an idempotency key for an inbound webhook: `{channel}:{external_message_id}`.
pub fn inbound_idempotency_key(channel: &str, external_message_id: &str) -> String {
    format!("{channel}:{external_message_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_deterministically() {
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }

    #[test]
    fn fencing_tokens_are_unique() {
        let a = new_fencing_token();
        let b = new_fencing_token();
        assert_ne!(a, b);
    }
}
