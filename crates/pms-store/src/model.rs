//! Record shapes for the tables `pms-store` owns beyond `Booking`/
//! `AvailabilityBlock` (which live in `pms-core` so other crates can share
//! the one booking shape without depending on the storage engine).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pms_core::{BookingId, Channel, DeliveryId, EventId, PropertyId};

pub use pms_core::ChannelConnection;

/// Kind of an outbound event (spec.md §3 "Outbound Event").
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum OutboundEventKind {
    BookingCreated,
    BookingUpdated,
    BookingCancelled,
    AvailabilityUpdated,
    PricingUpdated,
}

/// Origin tag carried by an event/delivery: the source that produced it, so
/// fan-out can exclude the originating channel (spec.md GLOSSARY "Origin").
pub type Origin = pms_core::Source;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct OutboundEvent {
    pub id: EventId,
    pub property_id: PropertyId,
    /// The `Booking`/`AvailabilityBlock` this event describes, as a raw uuid
    /// since an event may describe either entity.
    pub entity_id: Uuid,
    pub kind: OutboundEventKind,
    /// Opaque snapshot blob (bincode'd `pms_core::Booking` today; any shape
    /// an adapter needs tomorrow without widening this struct).
    pub payload: Vec<u8>,
    pub origin: Origin,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    InFlight,
    Succeeded,
    Dead,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Delivery {
    pub id: DeliveryId,
    pub event_id: EventId,
    pub property_id: PropertyId,
    pub entity_id: Uuid,
    pub channel: Channel,
    pub sequence: u64,
    pub state: DeliveryState,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub visibility_deadline: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct IdempotencyRecord {
    pub key: String,
    pub result_snapshot: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Returned by `BookingEngine::start_checkout` (spec.md §4.6.3).
#[derive(Clone, Debug)]
pub struct CheckoutSession {
    pub booking_id: BookingId,
    pub lock_owner_token: String,
    pub deadline: DateTime<Utc>,
}
