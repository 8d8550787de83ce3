//! The error taxonomy (spec.md §7).
//!
//! Every variant carries the structured fields an operator needs to locate
//! the failing booking/delivery/event without leaking internal detail to an
//! end user. Propagation policy lives with the callers (pms-store,
//! pms-dispatcher, pms-ingress): user-input and conflict variants surface
//! unchanged; integration variants are caught by the dispatcher and turned
//! into retry state; infrastructure variants are logged and downgraded to
//! `Internal` before crossing back out of the core.

use thiserror::Error;
use uuid::Uuid;

use crate::types::DateRange;

#[derive(Debug, Error, Clone)]
pub enum PmsError {
    // ── User input ───────────────────────────────────────────────────────────
    #[error("invalid date range: check_in must be before check_out")]
    InvalidDateRange,

    #[error("guests must be a positive integer, got {0}")]
    InvalidGuestCount(i32),

    #[error("unknown property: {0}")]
    UnknownProperty(Uuid),

    #[error("booking not found: {0}")]
    NotFound(Uuid),

    // ── Conflict ──────────────────────────────────────────────────────────────
    #[error("dates unavailable: conflicts with existing interval(s) {conflicting:?}")]
    DatesUnavailable { conflicting: Vec<DateRange> },

    #[error("concurrent booking in progress for this property")]
    ConcurrentBooking,

    // ── State ─────────────────────────────────────────────────────────────────
    #[error("invalid state transition: {booking_id} is {from}, cannot reach {to}")]
    InvalidState {
        booking_id: Uuid,
        from: String,
        to: String,
    },

    #[error("payment could not be verified for booking {booking_id}")]
    PaymentNotVerified { booking_id: Uuid },

    #[error("optimistic concurrency check failed: expected version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    // ── Integration ───────────────────────────────────────────────────────────
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("circuit open for channel {channel}")]
    CircuitOpen { channel: String },

    #[error("adapter transient failure: {cause}")]
    AdapterTransient { cause: String },

    #[error("adapter permanent validation failure: {cause}")]
    AdapterPermanent { cause: String },

    #[error("channel authentication failed for connection {connection_id}")]
    AuthFailed { connection_id: Uuid },

    // ── Infrastructure ────────────────────────────────────────────────────────
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("lock store unavailable: {0}")]
    LockStoreUnavailable(String),

    #[error("internal error (correlation_id={correlation_id})")]
    Internal { correlation_id: Uuid },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PmsError {
    /// True for the subset of errors the dispatcher should swallow into
    /// retry/backoff state rather than surface (spec.md §7).
    pub fn is_integration(&self) -> bool {
        matches!(
            self,
            PmsError::RateLimited { .. }
                | PmsError::CircuitOpen { .. }
                | PmsError::AdapterTransient { .. }
                | PmsError::AdapterPermanent { .. }
                | PmsError::AuthFailed { .. }
        )
    }

    /// Collapse any infrastructure-class error into the generic code callers
    /// outside the core are allowed to see, stamping a correlation id for
    /// operators to grep logs by.
    pub fn redact_infrastructure(self, correlation_id: Uuid) -> PmsError {
        match self {
            PmsError::StoreUnavailable(_)
            | PmsError::LockStoreUnavailable(_)
            | PmsError::Serialization(_) => PmsError::Internal { correlation_id },
            other => other,
        }
    }
}
