//! Per-channel circuit breaker (spec.md §4.3, C4).
//!
//! Three states per channel: `closed`, `open`, `half_open`. Failure counting
//! is a rolling time window rather than a simple counter, mirroring how the
//! consensus layer's difficulty tracker windows its samples — old failures
//! age out rather than requiring an explicit reset.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pms_core::constants::{CIRCUIT_COOLDOWN, CIRCUIT_COOLDOWN_MAX, CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_FAILURE_WINDOW};
use pms_core::{Channel, Clock};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Per-channel circuit tunables (spec.md §4.3's "designed operating
/// points"). `CircuitBreaker::set_thresholds` lets a deployment override
/// these per channel connection at runtime, the same way
/// `RateLimiter::set_limit` overrides the token bucket.
#[derive(Debug, Clone, Copy)]
pub struct CircuitThresholds {
    pub failure_window: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub cooldown_max: Duration,
}

impl Default for CircuitThresholds {
    fn default() -> Self {
        Self { failure_window: CIRCUIT_FAILURE_WINDOW, failure_threshold: CIRCUIT_FAILURE_THRESHOLD, cooldown: CIRCUIT_COOLDOWN, cooldown_max: CIRCUIT_COOLDOWN_MAX }
    }
}

struct ChannelCircuit {
    state: CircuitState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    thresholds: CircuitThresholds,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl ChannelCircuit {
    fn new() -> Self {
        Self::with_thresholds(CircuitThresholds::default())
    }

    fn with_thresholds(thresholds: CircuitThresholds) -> Self {
        Self { state: CircuitState::Closed, failures: VecDeque::new(), opened_at: None, cooldown: thresholds.cooldown, thresholds, probe_in_flight: false }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.thresholds.failure_window).unwrap_or_default();
        while let Some(front) = self.failures.front() {
            if now - *front > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }
}

pub struct CircuitBreaker<C: Clock> {
    clock: C,
    channels: Mutex<HashMap<Channel, ChannelCircuit>>,
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, channels: Mutex::new(HashMap::new()) }
    }

    /// Whether a call through `channel` may proceed right now. While `open`,
    /// denies until the cooldown elapses, at which point it transitions to
    /// `half_open` and allows exactly one probe through.
    pub fn allow(&self, channel: Channel) -> Decision {
        let now = self.clock.now();
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        let circuit = channels.entry(channel).or_insert_with(ChannelCircuit::new);
        circuit.prune(now);

        match circuit.state {
            CircuitState::Closed => Decision::Allow,
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                if now - opened_at >= chrono::Duration::from_std(circuit.cooldown).unwrap_or_default() {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    log_transition(channel, CircuitState::Open, CircuitState::HalfOpen, "cooldown elapsed");
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    Decision::Deny
                } else {
                    circuit.probe_in_flight = true;
                    Decision::Allow
                }
            }
        }
    }

    /// One successful probe (or a normal success while `closed`) resets the
    /// circuit.
    pub fn on_success(&self, channel: Channel) {
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        let circuit = channels.entry(channel).or_insert_with(ChannelCircuit::new);
        let prior = circuit.state;
        circuit.failures.clear();
        circuit.state = CircuitState::Closed;
        circuit.opened_at = None;
        circuit.cooldown = circuit.thresholds.cooldown;
        circuit.probe_in_flight = false;
        if prior != CircuitState::Closed {
            log_transition(channel, prior, CircuitState::Closed, "successful probe");
        }
    }

    /// A transient/unavailable failure. Trips the breaker once the rolling
    /// window's failure count reaches the threshold; a probe failure in
    /// `half_open` trips immediately and doubles the cooldown up to the cap.
    pub fn on_failure(&self, channel: Channel) {
        let now = self.clock.now();
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        let circuit = channels.entry(channel).or_insert_with(ChannelCircuit::new);
        let prior = circuit.state;

        if prior == CircuitState::HalfOpen {
            circuit.cooldown = (circuit.cooldown * 2).min(circuit.thresholds.cooldown_max);
            circuit.trip(now);
            log_transition(channel, prior, CircuitState::Open, "probe failed");
            return;
        }

        circuit.prune(now);
        circuit.failures.push_back(now);
        if circuit.failures.len() as u32 >= circuit.thresholds.failure_threshold {
            circuit.trip(now);
            log_transition(channel, prior, CircuitState::Open, "failure threshold reached");
        }
    }

    /// Override the seeded operating point for one channel (spec.md §4.3:
    /// these thresholds are "designed operating points", not hardcoded
    /// law). Resets that channel's circuit to `closed`, matching
    /// `RateLimiter::set_limit`'s fresh-bucket behavior.
    pub fn set_thresholds(&self, channel: Channel, thresholds: CircuitThresholds) {
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        channels.insert(channel, ChannelCircuit::with_thresholds(thresholds));
    }

    /// A non-retryable authentication failure trips the breaker immediately
    /// regardless of the rolling failure count (spec.md §4.3).
    pub fn on_auth_failure(&self, channel: Channel) {
        let now = self.clock.now();
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        let circuit = channels.entry(channel).or_insert_with(ChannelCircuit::new);
        let prior = circuit.state;
        circuit.trip(now);
        log_transition(channel, prior, CircuitState::Open, "non-retryable auth failure");
    }

    pub fn state_of(&self, channel: Channel) -> CircuitState {
        let mut channels = self.channels.lock().expect("circuit breaker mutex poisoned");
        channels.entry(channel).or_insert_with(ChannelCircuit::new).state
    }
}

fn log_transition(channel: Channel, from: CircuitState, to: CircuitState, reason: &str) {
    info!(%channel, ?from, ?to, reason, "circuit breaker transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pms_core::clock::FixedClock;

    #[test]
    fn trips_after_threshold_failures_in_window() {
        let clock = FixedClock::new(Utc::now());
        let cb = CircuitBreaker::new(clock.clone());
        for _ in 0..4 {
            cb.on_failure(Channel::Airbnb);
        }
        assert_eq!(cb.state_of(Channel::Airbnb), CircuitState::Closed);
        cb.on_failure(Channel::Airbnb);
        assert_eq!(cb.state_of(Channel::Airbnb), CircuitState::Open);
        assert_eq!(cb.allow(Channel::Airbnb), Decision::Deny);
    }

    #[test]
    fn half_open_allows_single_probe_then_closes_on_success() {
        let clock = FixedClock::new(Utc::now());
        let cb = CircuitBreaker::new(clock.clone());
        for _ in 0..5 {
            cb.on_failure(Channel::Airbnb);
        }
        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(cb.allow(Channel::Airbnb), Decision::Allow);
        assert_eq!(cb.allow(Channel::Airbnb), Decision::Deny, "only one probe in flight");
        cb.on_success(Channel::Airbnb);
        assert_eq!(cb.state_of(Channel::Airbnb), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens_with_increased_cooldown() {
        let clock = FixedClock::new(Utc::now());
        let cb = CircuitBreaker::new(clock.clone());
        for _ in 0..5 {
            cb.on_failure(Channel::Airbnb);
        }
        clock.advance(chrono::Duration::seconds(31));
        cb.allow(Channel::Airbnb);
        cb.on_failure(Channel::Airbnb);
        assert_eq!(cb.state_of(Channel::Airbnb), CircuitState::Open);
        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(cb.allow(Channel::Airbnb), Decision::Deny, "cooldown doubled past 31s");
    }

    #[test]
    fn stale_failures_age_out_of_window() {
        let clock = FixedClock::new(Utc::now());
        let cb = CircuitBreaker::new(clock.clone());
        for _ in 0..4 {
            cb.on_failure(Channel::Airbnb);
        }
        clock.advance(chrono::Duration::seconds(61));
        cb.on_failure(Channel::Airbnb);
        assert_eq!(cb.state_of(Channel::Airbnb), CircuitState::Closed, "earlier failures aged out of the window");
    }
}
