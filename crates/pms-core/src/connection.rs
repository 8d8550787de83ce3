//! The per-`(property, channel)` connection record (spec.md §4.7, §6).
//!
//! Lives here rather than in `pms-store` so `pms-channels`' adapters can take
//! a `&ChannelConnection` without depending on the storage engine — the same
//! reasoning that put `Booking`/`AvailabilityBlock` in this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Channel, PropertyId};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ChannelConnection {
    pub property_id: PropertyId,
    pub channel: Channel,
    pub external_property_id: String,
    /// Sealed with `pms_crypto::seal_secret`; never held decrypted at rest.
    pub credentials_sealed: Vec<u8>,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ChannelConnection {
    pub fn storage_key(property_id: PropertyId, channel: Channel) -> Vec<u8> {
        let mut k = property_id.as_uuid().as_bytes().to_vec();
        k.push(channel_tag(channel));
        k
    }
}

fn channel_tag(channel: Channel) -> u8 {
    match channel {
        Channel::Airbnb => 0,
        Channel::BookingCom => 1,
        Channel::Expedia => 2,
        Channel::FewoDirekt => 3,
        Channel::GoogleVr => 4,
    }
}
