//! The shared booking record shape (spec.md §3, §6).
//!
//! `Booking` is the one record shape every crate in the workspace agrees on:
//! `pms-store` persists it, `pms-policy` reasons over it, `pms-channels`
//! renders it onto a platform's wire format, and `pms-ingress`/`pms-dispatcher`
//! pass it between the two. Keeping it here (rather than in `pms-store`) means
//! a channel adapter does not need to depend on the storage engine just to
//! know what a booking looks like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::BookingStatus;
use crate::types::{BlockId, BookingId, CivilDate, DateRange, Money, PropertyId, Source};

/// The central entity (spec.md §3 "Booking").
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Booking {
    pub id: BookingId,
    pub property_id: PropertyId,
    pub source: Source,
    /// Unique per channel when set; `None` for direct bookings.
    pub external_id: Option<String>,
    pub check_in: CivilDate,
    pub check_out: CivilDate,
    pub guests: u32,
    pub status: BookingStatus,
    pub total: Money,
    pub payment_intent_id: Option<String>,
    /// The lock held for the duration of an in-progress direct checkout.
    pub lock_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic counter for optimistic concurrency checks.
    pub version: u64,
}

impl Booking {
    pub fn dates(&self) -> DateRange {
        DateRange { start: self.check_in, end: self.check_out }
    }
}

/// Kind of explicit owner-imposed block (spec.md §3 "Availability Block").
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Blocked,
    Maintenance,
    ChannelHold,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct AvailabilityBlock {
    pub id: BlockId,
    pub property_id: PropertyId,
    pub start_date: CivilDate,
    pub end_date: CivilDate,
    pub kind: BlockKind,
    pub source: Source,
}

impl AvailabilityBlock {
    pub fn dates(&self) -> DateRange {
        DateRange { start: self.start_date, end: self.end_date }
    }
}
