use std::path::Path;

use pms_core::PmsError;
use sled::Tree;

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees, one per entity in spec.md §6's persisted state layout:
///   bookings             — BookingId bytes           → bincode(Booking)
///   blocks                — BlockId bytes             → bincode(AvailabilityBlock)
///   channel_connections   — property_id++channel byte → bincode(ChannelConnection)
///   outbound_events        — EventId bytes             → bincode(OutboundEvent)
///   outbound_deliveries    — DeliveryId bytes           → bincode(Delivery)
///   idempotency_records    — utf8 key bytes             → bincode(IdempotencyRecord)
///   channel_links          — BookingId++channel byte    → utf8 external_id bytes
///   meta                   — utf8 key bytes             → raw bytes
#[derive(Clone)]
pub struct PmsDb {
    pub(crate) _db: sled::Db,
    pub(crate) bookings: Tree,
    pub(crate) blocks: Tree,
    pub(crate) channel_connections: Tree,
    pub(crate) outbound_events: Tree,
    pub(crate) outbound_deliveries: Tree,
    pub(crate) idempotency_records: Tree,
    pub(crate) channel_links: Tree,
    pub(crate) meta: Tree,
}

fn storage_err(e: impl std::fmt::Display) -> PmsError {
    PmsError::StoreUnavailable(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> PmsError {
    PmsError::Serialization(e.to_string())
}

impl PmsDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PmsError> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::from_sled(db)
    }

    /// Build on top of an already-open `sled::Db`, so callers (e.g. the lock
    /// manager) can share one on-disk database across multiple crates' trees.
    pub fn from_sled(db: sled::Db) -> Result<Self, PmsError> {
        let bookings = db.open_tree("bookings").map_err(storage_err)?;
        let blocks = db.open_tree("blocks").map_err(storage_err)?;
        let channel_connections = db.open_tree("channel_connections").map_err(storage_err)?;
        let outbound_events = db.open_tree("outbound_events").map_err(storage_err)?;
        let outbound_deliveries = db.open_tree("outbound_deliveries").map_err(storage_err)?;
        let idempotency_records = db.open_tree("idempotency_records").map_err(storage_err)?;
        let channel_links = db.open_tree("channel_links").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            bookings,
            blocks,
            channel_connections,
            outbound_events,
            outbound_deliveries,
            idempotency_records,
            channel_links,
            meta,
        })
    }

    pub fn sled_handle(&self) -> &sled::Db {
        &self._db
    }

    pub fn flush(&self) -> Result<(), PmsError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub(crate) fn put<T: serde::Serialize>(tree: &Tree, key: &[u8], value: &T) -> Result<(), PmsError> {
        let bytes = bincode::serialize(value).map_err(ser_err)?;
        tree.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    pub(crate) fn get<T: serde::de::DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, PmsError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn iter_all<T: serde::de::DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, PmsError> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Allocate the next per-property monotonic sequence number for the
    /// outbound event log (spec.md §3: "`sequence` (monotonic per-property)").
    pub(crate) fn next_sequence(&self, property_id: uuid::Uuid) -> Result<u64, PmsError> {
        let key = format!("seq:{property_id}");
        let current = Self::get::<u64>(&self.meta, key.as_bytes())?.unwrap_or(0);
        let next = current + 1;
        Self::put(&self.meta, key.as_bytes(), &next)?;
        Ok(next)
    }

    /// Dedup record for an inbound webhook, keyed by
    /// `pms_core::clock::inbound_idempotency_key` (spec.md §4.9).
    pub fn get_idempotency_record(&self, key: &str) -> Result<Option<crate::model::IdempotencyRecord>, PmsError> {
        Self::get(&self.idempotency_records, key.as_bytes())
    }

    pub fn put_idempotency_record(&self, record: &crate::model::IdempotencyRecord) -> Result<(), PmsError> {
        Self::put(&self.idempotency_records, record.key.as_bytes(), record)
    }

    /// Drop idempotency records past their retention window; run periodically
    /// so the tree does not grow unbounded.
    pub fn purge_expired_idempotency_records(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64, PmsError> {
        let mut removed = 0u64;
        for record in Self::iter_all::<crate::model::IdempotencyRecord>(&self.idempotency_records)? {
            if record.expires_at <= now {
                self.idempotency_records.remove(record.key.as_bytes()).map_err(storage_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read-only booking lookup that does not require the inventory guard
    /// `Inventory` serializes writes under — safe since this never mutates.
    pub fn get_booking(&self, id: pms_core::BookingId) -> Result<Option<pms_core::Booking>, PmsError> {
        Self::get(&self.bookings, id.as_uuid().as_bytes())
    }

    /// Read-only delivery lookup, for operator/test inspection without
    /// going through `Outbox::claim_due`'s claim side effects.
    pub fn get_delivery(&self, id: pms_core::DeliveryId) -> Result<Option<crate::model::Delivery>, PmsError> {
        Self::get(&self.outbound_deliveries, id.as_uuid().as_bytes())
    }

    pub(crate) fn channel_link_key(booking_id: uuid::Uuid, channel: pms_core::Channel) -> Vec<u8> {
        let mut k = booking_id.as_bytes().to_vec();
        k.push(channel as u8);
        k
    }

    /// Remember the platform's opaque id for a booking pushed to `channel`,
    /// so a later `cancel_booking`/`upsert_booking` call knows which remote
    /// record to address (spec.md §4.7: adapters never surface platform ids
    /// except as `external_id`).
    pub fn put_channel_link(&self, booking_id: uuid::Uuid, channel: pms_core::Channel, external_id: &str) -> Result<(), PmsError> {
        let key = Self::channel_link_key(booking_id, channel);
        self.channel_links.insert(key, external_id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_channel_link(&self, booking_id: uuid::Uuid, channel: pms_core::Channel) -> Result<Option<String>, PmsError> {
        let key = Self::channel_link_key(booking_id, channel);
        match self.channel_links.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec()).map_err(|e| PmsError::Serialization(e.to_string()))?)),
            None => Ok(None),
        }
    }

    pub fn remove_channel_link(&self, booking_id: uuid::Uuid, channel: pms_core::Channel) -> Result<(), PmsError> {
        let key = Self::channel_link_key(booking_id, channel);
        self.channel_links.remove(key).map_err(storage_err)?;
        Ok(())
    }

    /// Number of automatic corrections the reconciler has already applied
    /// for `property_id` on `day` (spec.md §4.10 step 5's per-property daily
    /// threshold). Stored in `meta` rather than a dedicated tree since it is
    /// a single counter, not an entity with its own lifecycle.
    pub fn reconcile_correction_count(&self, property_id: uuid::Uuid, day: chrono::NaiveDate) -> Result<u32, PmsError> {
        let key = format!("reconcile:count:{property_id}:{day}");
        Ok(Self::get::<u32>(&self.meta, key.as_bytes())?.unwrap_or(0))
    }

    pub fn increment_reconcile_correction_count(&self, property_id: uuid::Uuid, day: chrono::NaiveDate) -> Result<u32, PmsError> {
        let key = format!("reconcile:count:{property_id}:{day}");
        let next = Self::get::<u32>(&self.meta, key.as_bytes())?.unwrap_or(0) + 1;
        Self::put(&self.meta, key.as_bytes(), &next)?;
        Ok(next)
    }

    /// Whether automatic corrections for `property_id` are throttled pending
    /// operator acknowledgment. Unlike the daily counter above, this flag
    /// does not reset at midnight — it is cleared only by
    /// `clear_reconcile_throttle`.
    pub fn is_reconcile_throttled(&self, property_id: uuid::Uuid) -> Result<bool, PmsError> {
        let key = format!("reconcile:throttled:{property_id}");
        Ok(Self::get::<bool>(&self.meta, key.as_bytes())?.unwrap_or(false))
    }

    pub fn set_reconcile_throttled(&self, property_id: uuid::Uuid) -> Result<(), PmsError> {
        let key = format!("reconcile:throttled:{property_id}");
        Self::put(&self.meta, key.as_bytes(), &true)
    }

    /// Operator acknowledgment: lifts the throttle so the next run's
    /// corrections apply normally again.
    pub fn clear_reconcile_throttle(&self, property_id: uuid::Uuid) -> Result<(), PmsError> {
        let key = format!("reconcile:throttled:{property_id}");
        self.meta.remove(key.as_bytes()).map_err(storage_err)?;
        Ok(())
    }
}
