//! The uniform Channel Adapter contract every platform integration
//! satisfies (spec.md §4.7, C8). The Booking Core and Outbound Dispatcher
//! never reference a platform's specifics directly — they hold a
//! `Box<dyn ChannelAdapter>` and call through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pms_core::{AvailabilityBlock, Booking, BookingStatus, ChannelConnection, CivilDate, DateRange, PmsError, PropertyId};

/// A priced night, as pushed to a platform (spec.md §4.7 `push_pricing`).
/// `Serialize`/`Deserialize` so the dispatcher can bincode it straight into
/// an outbound event's payload alongside `Booking`/`AvailabilityBlock`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: CivilDate,
    pub amount_minor: i64,
    pub currency: String,
}

/// A booking as the platform reports it back (reconciliation / webhook
/// path), before it has been reconciled against the local record.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalBookingSnapshot {
    pub external_id: String,
    pub check_in: CivilDate,
    pub check_out: CivilDate,
    pub guests: u32,
    pub status: BookingStatus,
    pub total_minor: i64,
    pub currency: String,
}

/// The normalized result of `parse_webhook` (spec.md §4.9 step 1-2).
#[derive(Clone, Debug)]
pub struct ParsedInboundEvent {
    /// Deterministic per delivery so the idempotency layer can dedupe
    /// retries of the same webhook call.
    pub external_message_id: String,
    pub external_property_id: String,
    pub snapshot: ExternalBookingSnapshot,
}

/// The uniform per-platform capability set (spec.md §4.7).
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Create or update a booking on the platform; returns the platform's
    /// opaque booking id.
    async fn upsert_booking(&self, connection: &ChannelConnection, booking: &Booking) -> Result<String, PmsError>;

    async fn cancel_booking(&self, connection: &ChannelConnection, external_id: &str) -> Result<(), PmsError>;

    async fn push_availability(&self, connection: &ChannelConnection, property_id: PropertyId, blocks: &[AvailabilityBlock]) -> Result<(), PmsError>;

    async fn push_pricing(&self, connection: &ChannelConnection, property_id: PropertyId, per_date_prices: &[PricePoint]) -> Result<(), PmsError>;

    /// Reconciliation read path (spec.md §4.10).
    async fn list_bookings(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<ExternalBookingSnapshot>, PmsError>;

    async fn list_availability(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<DateRange>, PmsError>;

    /// Cheap, unauthenticated read of just the body's property identifier,
    /// used to route the call to the connection whose secret verifies it.
    /// This never grants the body's content any trust — only
    /// [`Self::parse_webhook`]'s signature check does that — but the
    /// identifier has to come from somewhere before a per-connection secret
    /// can even be looked up. Still checks the signature/auth header is
    /// present, since a call missing it cannot possibly verify regardless
    /// of which connection it is routed to.
    fn webhook_routing_key(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, PmsError>;

    /// Verify the webhook's signature against `connection`'s sealed
    /// `webhook_secret` and normalize its body. Must yield a stable
    /// `external_message_id` across retried deliveries of the same platform
    /// event (spec.md §4.7). Returns `PmsError::AuthFailed` if the
    /// signature does not match — callers must not act on the returned
    /// event until this succeeds.
    fn parse_webhook(&self, connection: &ChannelConnection, headers: &WebhookHeaders, body: &[u8]) -> Result<ParsedInboundEvent, PmsError>;

    /// Called proactively before credential expiry and reactively on a 401
    /// (spec.md §4.7).
    async fn refresh_credentials(&self, connection: &ChannelConnection) -> Result<ChannelConnection, PmsError>;

    fn channel(&self) -> pms_core::Channel;
}

/// Borrowed view over the inbound HTTP headers a webhook handler received,
/// so adapters stay decoupled from any particular web framework's type.
pub struct WebhookHeaders<'a> {
    pairs: &'a [(&'a str, &'a str)],
}

impl<'a> WebhookHeaders<'a> {
    pub fn new(pairs: &'a [(&'a str, &'a str)]) -> Self {
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| *v)
    }
}
