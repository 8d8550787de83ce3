//! Per-channel operating points bundled into one value a deployment can
//! override at runtime (spec.md §4.2/§4.3: the seeded rate-limit and circuit
//! thresholds are "designed operating points", not hardcoded law).

use pms_core::constants::default_rate_limit;
use pms_core::{Channel, Clock};

use crate::circuit::{CircuitBreaker, CircuitThresholds};
use crate::rate_limit::{BucketParams, RateLimiter};

#[derive(Debug, Clone, Copy)]
pub struct ChannelLimits {
    pub channel: Channel,
    pub rate: BucketParams,
    pub circuit: CircuitThresholds,
}

impl ChannelLimits {
    /// The compiled-in defaults for `channel`, identical to what `RateLimiter::new`
    /// and `CircuitBreaker::new` already seed themselves with.
    pub fn defaults_for(channel: Channel) -> Self {
        let (capacity, refill_per_sec) = default_rate_limit(channel);
        Self { channel, rate: BucketParams { capacity: capacity as f64, refill_per_sec }, circuit: CircuitThresholds::default() }
    }

    /// Push this channel's limits into both resilience primitives in one
    /// call, the way a deployment loads its per-channel configuration at
    /// startup or after an operator adjusts it.
    pub fn apply<C: Clock>(&self, rate_limiter: &RateLimiter<C>, circuit_breaker: &CircuitBreaker<C>) {
        rate_limiter.set_limit(self.channel, self.rate);
        circuit_breaker.set_thresholds(self.channel, self.circuit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pms_core::clock::FixedClock;

    #[test]
    fn defaults_for_airbnb_match_the_compiled_in_seed() {
        let limits = ChannelLimits::defaults_for(Channel::Airbnb);
        assert_eq!(limits.rate.capacity, 10.0);
        assert_eq!(limits.circuit.failure_threshold, 5);
    }

    #[test]
    fn apply_overrides_both_primitives() {
        let clock = FixedClock::new(Utc::now());
        let rate_limiter = RateLimiter::new(clock.clone());
        let circuit_breaker = CircuitBreaker::new(clock);

        let mut limits = ChannelLimits::defaults_for(Channel::Expedia);
        limits.rate.capacity = 2.0;
        limits.circuit.failure_threshold = 1;
        limits.apply(&rate_limiter, &circuit_breaker);

        use crate::rate_limit::Acquisition;
        assert!(matches!(rate_limiter.try_acquire(Channel::Expedia, 2), Acquisition::Granted));
        assert!(matches!(rate_limiter.try_acquire(Channel::Expedia, 1), Acquisition::Denied { .. }));

        circuit_breaker.on_failure(Channel::Expedia);
        assert_eq!(circuit_breaker.state_of(Channel::Expedia), crate::circuit::CircuitState::Open);
    }
}
