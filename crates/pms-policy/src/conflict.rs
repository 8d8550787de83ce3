//! Conflict Resolution Policy (C12, spec.md §4.11).
//!
//! Pure, deterministic functions — no I/O, no storage handle — so the
//! ingress pipeline and the reconciler can both call the same decision logic
//! over whatever booking state they have in hand and get byte-identical
//! results for identical inputs. Checks run in the fixed order spec.md
//! prescribes: direct-ownership override, then same-channel ownership, then
//! restrictiveness-with-tiebreak.

use chrono::{DateTime, Utc};
use pms_core::{BookingStatus, Channel, Source};
use tracing::info;

/// Outcome of resolving a status conflict on an existing booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusResolution {
    /// The locally stored status is kept; the incoming channel status must
    /// be re-pushed back to the channel that sent it.
    LocalWins,
    /// The incoming status is applied to the local booking.
    IncomingWins,
}

/// Resolve a status conflict between a booking's current state and an
/// incoming channel update (spec.md §4.11).
pub fn resolve_status_conflict(
    booking_source: Source,
    booking_status: BookingStatus,
    booking_updated_at: DateTime<Utc>,
    incoming_channel: Channel,
    incoming_status: BookingStatus,
    incoming_observed_at: DateTime<Utc>,
) -> StatusResolution {
    // Rule 1: a direct booking's local status always wins.
    if booking_source == Source::Direct {
        return StatusResolution::LocalWins;
    }

    // Rule 2: the channel that owns this booking always wins on its own booking.
    if booking_source == Source::Channel(incoming_channel) {
        return StatusResolution::IncomingWins;
    }

    // Rule 3: cross-channel update on a booking owned by another channel.
    // The more restrictive status wins; ties break on recency, then on
    // locally-stored status winning outright.
    let local_rank = booking_status.restrictiveness_rank();
    let incoming_rank = incoming_status.restrictiveness_rank();
    let resolution = match local_rank.cmp(&incoming_rank) {
        std::cmp::Ordering::Less => StatusResolution::LocalWins,
        std::cmp::Ordering::Greater => StatusResolution::IncomingWins,
        std::cmp::Ordering::Equal => {
            if incoming_observed_at > booking_updated_at {
                StatusResolution::IncomingWins
            } else {
                StatusResolution::LocalWins
            }
        }
    };
    info!(
        ?booking_source, ?booking_status, %incoming_channel, ?incoming_status, ?resolution,
        "cross-channel status conflict resolved"
    );
    resolution
}

/// Availability drift resolution: the more restrictive interpretation wins
/// (spec.md §4.11: "blocked wins over available").
pub fn resolve_availability_drift(local_blocked: bool, remote_blocked: bool) -> bool {
    local_blocked || remote_blocked
}

/// Pricing never has a resolution other than the Core's own value; a
/// divergence is something to push outward, not to accept inward.
pub struct PricingResolution;

impl PricingResolution {
    pub const CORE_WINS: &'static str = "core_wins";
}

/// Decision for a brand-new inbound booking (spec.md §4.11 "For new inbound bookings").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDecision {
    /// Accept with `status = confirmed`.
    Accept,
    /// Reject at the platform; `alert_operator` is set when the conflicting
    /// local interval belongs to a direct booking.
    Reject { alert_operator: bool },
}

/// Evaluate whether a proposed inbound booking interval may be accepted.
pub fn evaluate_new_inbound(conflicts_with_local: bool, conflict_involves_direct: bool) -> InboundDecision {
    if conflicts_with_local {
        InboundDecision::Reject { alert_operator: conflict_involves_direct }
    } else {
        InboundDecision::Accept
    }
}
