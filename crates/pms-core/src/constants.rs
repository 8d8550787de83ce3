//! Tunable operating points for the resilience and booking layers.
//!
//! These are compiled-in defaults, not hardcoded law: spec.md is explicit
//! that the values in §4.2/§4.3/§4.8 are "designed operating points" and
//! "stand-ins", parameterizable per deployment. `pms-resilience::ChannelLimits`
//! is where a deployment overrides them per channel connection at runtime.

use std::time::Duration;

use crate::types::Channel;

// ── Rate limiter (spec.md §4.2) ──────────────────────────────────────────────

/// Token bucket `(capacity, refill_rate_per_sec)` per channel.
pub fn default_rate_limit(channel: Channel) -> (u32, f64) {
    match channel {
        Channel::Airbnb => (10, 10.0),
        Channel::BookingCom => (5, 5.0),
        Channel::Expedia => (50, 50.0),
        Channel::FewoDirekt => (10, 10.0),
        Channel::GoogleVr => (100, 100.0),
    }
}

// ── Circuit breaker (spec.md §4.3) ───────────────────────────────────────────

/// Failures within this rolling window trip the breaker.
pub const CIRCUIT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Failure count within the window that trips `closed -> open`.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before `open -> half_open`.
pub const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

/// Ceiling for the optional exponential cooldown backoff.
pub const CIRCUIT_COOLDOWN_MAX: Duration = Duration::from_secs(15 * 60);

// ── Outbound dispatcher backoff (spec.md §4.8) ───────────────────────────────

pub const BACKOFF_CAP: Duration = Duration::from_secs(3_600);
pub const BACKOFF_BASE: Duration = Duration::from_secs(60);
pub const BACKOFF_JITTER: f64 = 0.2;
pub const MAX_DELIVERY_ATTEMPTS: u32 = 10;

/// Visibility timeout for a claimed delivery: must exceed the external
/// call's budget so a crashed worker's claim expires before a retry would
/// have been due anyway (spec.md §4.4).
pub const DELIVERY_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);

// ── Checkout flow (spec.md §4.6.3) ───────────────────────────────────────────

/// Direct checkout session budget: how long a `reserved` booking holds the
/// property lock and survives before the timeout sweeper cancels it.
pub const CHECKOUT_BUDGET: Duration = Duration::from_secs(600);

/// Checkout-timeout sweeper cadence (supplemented in SPEC_FULL.md §5: not
/// specified by spec.md directly, cheap to run superfluously).
pub const CHECKOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

// ── Lock manager (spec.md §4.1, §4.9) ────────────────────────────────────────

pub const BOOKING_LOCK_TTL: Duration = Duration::from_secs(600);
pub const WEBHOOK_LOCK_TTL: Duration = Duration::from_secs(10);
pub const WEBHOOK_LOCK_WAIT: Duration = Duration::from_secs(5);

// ── Reconciler (spec.md §4.10) ───────────────────────────────────────────────

pub const RECONCILE_WINDOW_PAST_DAYS: i64 = 1;
pub const RECONCILE_WINDOW_FUTURE_DAYS: i64 = 365;

/// Per-property automatic-correction count above which the reconciler
/// throttles and raises an alert for operator acknowledgment.
pub const RECONCILE_AUTO_CORRECTION_THRESHOLD: u32 = 5;

pub fn booking_lock_key(property_id: uuid::Uuid) -> String {
    format!("booking:property:{property_id}")
}
