//! Event Log / Outbox (C5, spec.md §4.4): append-only events fanned out into
//! per-channel deliveries, claimed by the dispatcher with a visibility
//! timeout, and settled into success, retry, or dead-letter.
//!
//! The claim/visibility-timeout split mirrors a standard at-least-once queue:
//! `claim_due` hands a batch to one worker and stamps a deadline; if the
//! worker crashes before calling `settle`, the next `claim_due` past that
//! deadline treats the delivery as due again.

use chrono::{DateTime, Utc};
use rand::Rng;
use sled::transaction::TransactionResult;
use sled::Transactional;
use uuid::Uuid;

use pms_core::{constants, Channel, DeliveryId, EventId, PmsError, PropertyId};

use crate::db::PmsDb;
use crate::model::{ChannelConnection, Delivery, DeliveryState, Origin, OutboundEvent, OutboundEventKind};

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, PmsError> {
    bincode::serialize(value).map_err(|e| PmsError::Serialization(e.to_string()))
}

fn transaction_err(e: sled::transaction::TransactionError<sled::Error>) -> PmsError {
    PmsError::StoreUnavailable(e.to_string())
}

fn delivery_rows(deliveries: &[Delivery]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, PmsError> {
    deliveries.iter().map(|d| Ok((d.id.as_uuid().as_bytes().to_vec(), serialize(d)?))).collect()
}

pub struct Outbox<'a> {
    db: &'a PmsDb,
}

/// Exponential backoff with full jitter, capped (spec.md §4.8 stand-in
/// values): `min(cap, base * 2^attempt)`, then uniform in
/// `[(1-j)*delay, (1+j)*delay]`.
pub fn backoff_delay(attempt: u32) -> chrono::Duration {
    let base = constants::BACKOFF_BASE.as_secs_f64();
    let cap = constants::BACKOFF_CAP.as_secs_f64();
    let raw = (base * 2f64.powi(attempt as i32)).min(cap);
    let jitter = constants::BACKOFF_JITTER;
    let low = raw * (1.0 - jitter);
    let high = raw * (1.0 + jitter);
    let delay = rand::thread_rng().gen_range(low..=high);
    chrono::Duration::milliseconds((delay * 1000.0) as i64)
}

pub enum SettleOutcome {
    Succeeded,
    /// A transient failure; reschedule unless `attempt_count` has exhausted
    /// `MAX_DELIVERY_ATTEMPTS`.
    TransientFailure { error: String },
    /// A permanent failure (validation rejected by the platform): dead-letter
    /// immediately, no further retries.
    PermanentFailure { error: String },
}

impl<'a> Outbox<'a> {
    pub fn new(db: &'a PmsDb) -> Self {
        Self { db }
    }

    /// Build the event and its fanned-out deliveries (one per connected,
    /// sync-enabled channel other than `origin`'s — spec.md §4.4: "never
    /// echoes a change back to the channel that produced it") without
    /// writing either to disk yet, so a caller can commit them atomically
    /// alongside a business-entity write.
    fn stage(
        &self,
        property_id: PropertyId,
        entity_id: Uuid,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<(OutboundEvent, Vec<Delivery>), pms_core::PmsError> {
        let sequence = self.db.next_sequence(property_id.as_uuid())?;
        let event = OutboundEvent { id: EventId::new(), property_id, entity_id, kind, payload, origin, sequence, created_at: now };

        let deliveries = self
            .connected_channels(property_id)?
            .into_iter()
            .filter(|c| origin.channel() != Some(*c))
            .map(|channel| Delivery {
                id: DeliveryId::new(),
                event_id: event.id,
                property_id,
                entity_id,
                channel,
                sequence,
                state: DeliveryState::Pending,
                attempt_count: 0,
                next_attempt_at: now,
                visibility_deadline: None,
                last_error: None,
            })
            .collect();

        Ok((event, deliveries))
    }

    /// Commit a staged event and its deliveries in one transaction across
    /// `outbound_events` and `outbound_deliveries`, so a crash mid-fan-out
    /// can never leave an event with only some of its deliveries recorded
    /// (spec.md §4.4: "no event is ever lost").
    fn commit(&self, event: &OutboundEvent, deliveries: &[Delivery]) -> Result<(), pms_core::PmsError> {
        let event_bytes = serialize(event)?;
        let delivery_rows = delivery_rows(deliveries)?;

        let result: TransactionResult<(), sled::Error> = (&self.db.outbound_events, &self.db.outbound_deliveries).transaction(move |(events, dels)| {
            events.insert(event.id.as_uuid().as_bytes(), event_bytes.clone())?;
            for (key, bytes) in &delivery_rows {
                dels.insert(key.as_slice(), bytes.clone())?;
            }
            Ok(())
        });
        result.map_err(transaction_err)
    }

    /// Commit a staged event and its deliveries atomically with a single
    /// business-entity write (spec.md §4.4: "writes in the same transaction
    /// as the Booking Core state change that produced it"). `write` is
    /// already expected to have upheld whatever invariant gates the write
    /// (e.g. the exclusion-constraint check under `Inventory`'s mutex) —
    /// this only makes the persistence atomic, not the check.
    fn commit_with_business_write(
        &self,
        business_tree: &sled::Tree,
        business_key: &[u8],
        business_bytes: Vec<u8>,
        event: &OutboundEvent,
        deliveries: &[Delivery],
    ) -> Result<(), pms_core::PmsError> {
        let event_bytes = serialize(event)?;
        let delivery_rows = delivery_rows(deliveries)?;

        let result: TransactionResult<(), sled::Error> =
            (business_tree, &self.db.outbound_events, &self.db.outbound_deliveries).transaction(move |(biz, events, dels)| {
                biz.insert(business_key, business_bytes.clone())?;
                events.insert(event.id.as_uuid().as_bytes(), event_bytes.clone())?;
                for (key, bytes) in &delivery_rows {
                    dels.insert(key.as_slice(), bytes.clone())?;
                }
                Ok(())
            });
        result.map_err(transaction_err)
    }

    /// Same as [`Self::commit_with_business_write`], but the business write
    /// is a removal rather than a put (`remove_availability_block`'s case).
    fn commit_with_business_removal(
        &self,
        business_tree: &sled::Tree,
        business_key: &[u8],
        event: &OutboundEvent,
        deliveries: &[Delivery],
    ) -> Result<(), pms_core::PmsError> {
        let event_bytes = serialize(event)?;
        let delivery_rows = delivery_rows(deliveries)?;

        let result: TransactionResult<(), sled::Error> =
            (business_tree, &self.db.outbound_events, &self.db.outbound_deliveries).transaction(move |(biz, events, dels)| {
                biz.remove(business_key)?;
                events.insert(event.id.as_uuid().as_bytes(), event_bytes.clone())?;
                for (key, bytes) in &delivery_rows {
                    dels.insert(key.as_slice(), bytes.clone())?;
                }
                Ok(())
            });
        result.map_err(transaction_err)
    }

    /// Append a new event and fan it out into one delivery per connected,
    /// sync-enabled channel other than `origin`'s.
    pub fn append(
        &self,
        property_id: PropertyId,
        entity_id: Uuid,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<OutboundEvent, pms_core::PmsError> {
        let (event, deliveries) = self.stage(property_id, entity_id, kind, payload, origin, now)?;
        self.commit(&event, &deliveries)?;
        Ok(event)
    }

    /// Append an event and commit it atomically with a caller-supplied
    /// business-entity put, in the same transaction. Used by every Booking
    /// Core mutation that must never be observed with its state change
    /// applied but the corresponding outbox entries missing, or vice versa.
    #[allow(clippy::too_many_arguments)]
    pub fn append_with_business_write<T: serde::Serialize>(
        &self,
        business_tree: &sled::Tree,
        business_key: &[u8],
        business_value: &T,
        property_id: PropertyId,
        entity_id: Uuid,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<OutboundEvent, pms_core::PmsError> {
        let business_bytes = serialize(business_value)?;
        let (event, deliveries) = self.stage(property_id, entity_id, kind, payload, origin, now)?;
        self.commit_with_business_write(business_tree, business_key, business_bytes, &event, &deliveries)?;
        Ok(event)
    }

    /// Same as [`Self::append_with_business_write`], but for a business
    /// write that removes a row rather than upserting one
    /// (`remove_availability_block`'s case).
    #[allow(clippy::too_many_arguments)]
    pub fn append_with_business_removal(
        &self,
        business_tree: &sled::Tree,
        business_key: &[u8],
        property_id: PropertyId,
        entity_id: Uuid,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<OutboundEvent, pms_core::PmsError> {
        let (event, deliveries) = self.stage(property_id, entity_id, kind, payload, origin, now)?;
        self.commit_with_business_removal(business_tree, business_key, &event, &deliveries)?;
        Ok(event)
    }

    /// Append an event atomically with both a booking insert and its
    /// `(channel, external_id)` link (`accept_inbound_booking`'s case):
    /// three writes — the booking row, the channel link, and the outbox
    /// fan-out — that must all land together or not at all.
    #[allow(clippy::too_many_arguments)]
    pub fn append_with_booking_and_link(
        &self,
        booking: &pms_core::Booking,
        channel_link_key: &[u8],
        external_id: &str,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<OutboundEvent, pms_core::PmsError> {
        let booking_bytes = serialize(booking)?;
        let (event, deliveries) = self.stage(booking.property_id, booking.id.as_uuid(), kind, payload, origin, now)?;
        let event_bytes = serialize(&event)?;
        let delivery_rows = delivery_rows(&deliveries)?;
        let external_id_bytes = external_id.as_bytes().to_vec();
        let booking_key = booking.id.as_uuid().as_bytes().to_vec();

        let result: TransactionResult<(), sled::Error> =
            (&self.db.bookings, &self.db.channel_links, &self.db.outbound_events, &self.db.outbound_deliveries).transaction(move |(bookings, links, events, dels)| {
                bookings.insert(booking_key.as_slice(), booking_bytes.clone())?;
                links.insert(channel_link_key, external_id_bytes.clone())?;
                events.insert(event.id.as_uuid().as_bytes(), event_bytes.clone())?;
                for (key, bytes) in &delivery_rows {
                    dels.insert(key.as_slice(), bytes.clone())?;
                }
                Ok(())
            });
        result.map_err(transaction_err)?;
        Ok(event)
    }

    /// Queue a single delivery targeted at exactly one channel, bypassing
    /// the usual fan-out-to-every-connected-channel-but-origin rule. Used
    /// when the Conflict Resolution Policy decides the local status wins a
    /// cross-channel disagreement: the losing channel's own view is now
    /// stale and must be corrected, but every other connected channel's
    /// view is unaffected and must not be re-sent an event it already has.
    pub fn requeue_for_channel(
        &self,
        property_id: PropertyId,
        entity_id: Uuid,
        kind: OutboundEventKind,
        payload: Vec<u8>,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<(), pms_core::PmsError> {
        let sequence = self.db.next_sequence(property_id.as_uuid())?;
        let event = OutboundEvent { id: EventId::new(), property_id, entity_id, kind, payload, origin: Origin::Direct, sequence, created_at: now };
        let delivery = Delivery {
            id: DeliveryId::new(),
            event_id: event.id,
            property_id,
            entity_id,
            channel,
            sequence,
            state: DeliveryState::Pending,
            attempt_count: 0,
            next_attempt_at: now,
            visibility_deadline: None,
            last_error: None,
        };
        self.commit(&event, std::slice::from_ref(&delivery))
    }

    /// Look up the event a claimed delivery fans out from, so a dispatcher
    /// can decode its payload without reaching into `PmsDb`'s private trees.
    pub fn get_event(&self, id: EventId) -> Result<Option<OutboundEvent>, pms_core::PmsError> {
        PmsDb::get(&self.db.outbound_events, id.as_uuid().as_bytes())
    }

    fn connected_channels(&self, property_id: PropertyId) -> Result<Vec<Channel>, pms_core::PmsError> {
        let mut out = Vec::new();
        for conn in PmsDb::iter_all::<ChannelConnection>(&self.db.channel_connections)? {
            if conn.property_id == property_id && conn.sync_enabled {
                out.push(conn.channel);
            }
        }
        Ok(out)
    }

    /// Claim up to `limit` deliveries due at or before `now`: `Pending`
    /// deliveries whose `next_attempt_at` has passed, plus `InFlight`
    /// deliveries whose `visibility_deadline` has passed (an abandoned
    /// claim). Each claimed delivery is stamped `InFlight` with a fresh
    /// deadline before being handed back.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Delivery>, pms_core::PmsError> {
        let mut claimed = Vec::new();
        for mut delivery in PmsDb::iter_all::<Delivery>(&self.db.outbound_deliveries)? {
            if claimed.len() >= limit {
                break;
            }
            let due = match delivery.state {
                DeliveryState::Pending => delivery.next_attempt_at <= now,
                DeliveryState::InFlight => delivery.visibility_deadline.map(|d| d <= now).unwrap_or(false),
                DeliveryState::Succeeded | DeliveryState::Dead => false,
            };
            if !due {
                continue;
            }
            delivery.state = DeliveryState::InFlight;
            delivery.visibility_deadline = Some(now + chrono::Duration::from_std(constants::DELIVERY_VISIBILITY_TIMEOUT).unwrap());
            PmsDb::put(&self.db.outbound_deliveries, delivery.id.as_uuid().as_bytes(), &delivery)?;
            claimed.push(delivery);
        }
        Ok(claimed)
    }

    /// Record the outcome of a dispatch attempt (spec.md §4.8).
    pub fn settle(&self, id: DeliveryId, outcome: SettleOutcome, now: DateTime<Utc>) -> Result<Delivery, pms_core::PmsError> {
        let mut delivery: Delivery = PmsDb::get(&self.db.outbound_deliveries, id.as_uuid().as_bytes())?
            .ok_or(pms_core::PmsError::NotFound(id.as_uuid()))?;

        match outcome {
            SettleOutcome::Succeeded => {
                delivery.state = DeliveryState::Succeeded;
                delivery.visibility_deadline = None;
                delivery.last_error = None;
            }
            SettleOutcome::PermanentFailure { error } => {
                delivery.state = DeliveryState::Dead;
                delivery.visibility_deadline = None;
                delivery.last_error = Some(error);
            }
            SettleOutcome::TransientFailure { error } => {
                delivery.attempt_count += 1;
                delivery.last_error = Some(error);
                delivery.visibility_deadline = None;
                if delivery.attempt_count >= constants::MAX_DELIVERY_ATTEMPTS {
                    delivery.state = DeliveryState::Dead;
                    tracing::warn!(delivery_id = %delivery.id, channel = %delivery.channel, "delivery exhausted retries, dead-lettered");
                } else {
                    delivery.state = DeliveryState::Pending;
                    delivery.next_attempt_at = now + backoff_delay(delivery.attempt_count);
                }
            }
        }

        PmsDb::put(&self.db.outbound_deliveries, id.as_uuid().as_bytes(), &delivery)?;
        Ok(delivery)
    }

    /// Push a claimed delivery back to `pending` after `delay` without
    /// touching `attempt_count` or `last_error` — used for circuit-open and
    /// rate-limit denials (spec.md §4.8 steps 2-3), which are not failed
    /// attempts against the platform and must not count toward
    /// `MAX_DELIVERY_ATTEMPTS` or the circuit breaker's own failure window.
    pub fn reschedule(&self, id: DeliveryId, delay: chrono::Duration, now: DateTime<Utc>) -> Result<Delivery, pms_core::PmsError> {
        let mut delivery: Delivery = PmsDb::get(&self.db.outbound_deliveries, id.as_uuid().as_bytes())?
            .ok_or(pms_core::PmsError::NotFound(id.as_uuid()))?;
        delivery.state = DeliveryState::Pending;
        delivery.next_attempt_at = now + delay;
        delivery.visibility_deadline = None;
        PmsDb::put(&self.db.outbound_deliveries, id.as_uuid().as_bytes(), &delivery)?;
        Ok(delivery)
    }

    /// Dead-lettered deliveries for a property, for operator visibility
    /// (supplemented in SPEC_FULL.md §5).
    pub fn list_dead_letters(&self, property_id: PropertyId) -> Result<Vec<Delivery>, pms_core::PmsError> {
        Ok(PmsDb::iter_all::<Delivery>(&self.db.outbound_deliveries)?
            .into_iter()
            .filter(|d| d.property_id == property_id && d.state == DeliveryState::Dead)
            .collect())
    }

    pub fn upsert_connection(&self, conn: ChannelConnection) -> Result<(), pms_core::PmsError> {
        let key = ChannelConnection::storage_key(conn.property_id, conn.channel);
        PmsDb::put(&self.db.channel_connections, &key, &conn)
    }

    pub fn get_connection(&self, property_id: PropertyId, channel: Channel) -> Result<Option<ChannelConnection>, pms_core::PmsError> {
        let key = ChannelConnection::storage_key(property_id, channel);
        PmsDb::get(&self.db.channel_connections, &key)
    }

    /// Resolve the local property a webhook's `external_property_id` refers
    /// to, so the inbound ingress can find the connection (and hence the
    /// property lock, and the right adapter) from the platform's own id
    /// alone (spec.md §4.9 step 1).
    pub fn find_connection_by_external_property(&self, channel: Channel, external_property_id: &str) -> Result<Option<ChannelConnection>, pms_core::PmsError> {
        for conn in PmsDb::iter_all::<ChannelConnection>(&self.db.channel_connections)? {
            if conn.channel == channel && conn.external_property_id == external_property_id {
                return Ok(Some(conn));
            }
        }
        Ok(None)
    }

    /// Every sync-enabled connection across every property, for the
    /// reconciliation scheduler to walk each `(property, channel)` pair in
    /// turn without needing its own separate index of who is connected.
    pub fn list_sync_enabled_connections(&self) -> Result<Vec<ChannelConnection>, pms_core::PmsError> {
        Ok(PmsDb::iter_all::<ChannelConnection>(&self.db.channel_connections)?.into_iter().filter(|c| c.sync_enabled).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pms_core::Source;

    fn harness() -> (tempfile::TempDir, PmsDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = PmsDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn connection(property_id: PropertyId, channel: Channel) -> ChannelConnection {
        ChannelConnection {
            property_id,
            channel,
            external_property_id: "ext-1".into(),
            credentials_sealed: vec![1, 2, 3],
            sync_enabled: true,
            last_sync_at: None,
            last_error: None,
        }
    }

    #[test]
    fn fan_out_excludes_origin_channel() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();

        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();
        outbox.upsert_connection(connection(property, Channel::Expedia)).unwrap();

        let now = Utc::now();
        outbox
            .append(property, Uuid::new_v4(), OutboundEventKind::BookingCreated, vec![], Source::Channel(Channel::Airbnb), now)
            .unwrap();

        let due = outbox.claim_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].channel, Channel::Expedia);
    }

    #[test]
    fn transient_failure_reschedules_with_backoff() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();

        let now = Utc::now();
        outbox
            .append(property, Uuid::new_v4(), OutboundEventKind::BookingCreated, vec![], Source::Direct, now)
            .unwrap();
        let claimed = outbox.claim_due(now, 10).unwrap();
        let delivery = outbox.settle(claimed[0].id, SettleOutcome::TransientFailure { error: "timeout".into() }, now).unwrap();

        assert_eq!(delivery.state, DeliveryState::Pending);
        assert!(delivery.next_attempt_at > now);
        assert_eq!(delivery.attempt_count, 1);
    }

    #[test]
    fn exhausted_retries_dead_letter() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();

        let now = Utc::now();
        outbox
            .append(property, Uuid::new_v4(), OutboundEventKind::BookingCreated, vec![], Source::Direct, now)
            .unwrap();
        let mut id = outbox.claim_due(now, 10).unwrap()[0].id;
        for _ in 0..pms_core::constants::MAX_DELIVERY_ATTEMPTS {
            let d = outbox.settle(id, SettleOutcome::TransientFailure { error: "x".into() }, now).unwrap();
            id = d.id;
        }
        let dead = outbox.list_dead_letters(property).unwrap();
        assert_eq!(dead.len(), 1);
    }

    #[test]
    fn reschedule_requeues_without_counting_as_an_attempt() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();

        let now = Utc::now();
        outbox
            .append(property, Uuid::new_v4(), OutboundEventKind::BookingCreated, vec![], Source::Direct, now)
            .unwrap();
        let claimed = outbox.claim_due(now, 10).unwrap();
        let delivery = outbox.reschedule(claimed[0].id, chrono::Duration::seconds(30), now).unwrap();

        assert_eq!(delivery.state, DeliveryState::Pending);
        assert_eq!(delivery.attempt_count, 0, "a circuit/rate-limit denial must not count as a delivery attempt");
        assert!(delivery.last_error.is_none());
        assert!(delivery.next_attempt_at >= now + chrono::Duration::seconds(30));
    }

    #[test]
    fn requeue_for_channel_targets_only_the_named_channel() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();
        outbox.upsert_connection(connection(property, Channel::Expedia)).unwrap();

        let now = Utc::now();
        outbox.requeue_for_channel(property, Uuid::new_v4(), OutboundEventKind::BookingUpdated, vec![], Channel::Airbnb, now).unwrap();

        let due = outbox.claim_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].channel, Channel::Airbnb);
    }

    #[test]
    fn find_connection_by_external_property_resolves_the_local_property() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();

        let found = outbox.find_connection_by_external_property(Channel::Airbnb, "ext-1").unwrap();
        assert_eq!(found.map(|c| c.property_id), Some(property));

        let missing = outbox.find_connection_by_external_property(Channel::Airbnb, "no-such-id").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn abandoned_inflight_claim_is_reclaimed() {
        let (_dir, db) = harness();
        let outbox = Outbox::new(&db);
        let property = PropertyId::new();
        outbox.upsert_connection(connection(property, Channel::Airbnb)).unwrap();

        let now = Utc::now();
        outbox
            .append(property, Uuid::new_v4(), OutboundEventKind::BookingCreated, vec![], Source::Direct, now)
            .unwrap();
        let first_claim = outbox.claim_due(now, 10).unwrap();
        assert_eq!(first_claim.len(), 1);

        let past_deadline = now + chrono::Duration::from_std(pms_core::constants::DELIVERY_VISIBILITY_TIMEOUT).unwrap() + chrono::Duration::seconds(1);
        let reclaimed = outbox.claim_due(past_deadline, 10).unwrap();
        assert_eq!(reclaimed.len(), 1, "abandoned in-flight delivery must be reclaimed after its visibility deadline");
    }
}
