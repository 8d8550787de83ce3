//! The reconciliation run loop itself (spec.md §4.10): for one
//! `(property, channel)` pair, fetches both sides' authoritative state,
//! diffs them, resolves each disagreement through the Conflict Resolution
//! Policy, and applies the result — idempotently, so a crash mid-run never
//! double-applies a correction on resume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use pms_channels::{AdapterRegistry, ExternalBookingSnapshot};
use pms_core::{AvailabilityBlock, BlockId, BlockKind, Booking, Channel, ChannelConnection, Clock, DateRange, Money, PmsError, PropertyId, Source};
use pms_policy::{evaluate_new_inbound, resolve_availability_drift, resolve_status_conflict, InboundDecision, StatusResolution};
use pms_store::{BookingEngine, IdempotencyRecord, OutboundEventKind};

use crate::diff::{self, AvailabilityDiff, BookingDiff};
use crate::throttle;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no connection registered for property {property_id} on {channel}")]
    UnknownConnection { property_id: PropertyId, channel: Channel },
    #[error(transparent)]
    Core(#[from] PmsError),
}

/// Summary of one `(property, channel)` reconciliation run, returned so a
/// caller (the scheduler in `pms-node`, or a test) can assert on what
/// happened without re-deriving it from logs.
#[derive(Debug, Default, PartialEq)]
pub struct ReconciliationReport {
    pub missing_locally: usize,
    pub missing_remotely: usize,
    pub status_mismatches: usize,
    pub availability_drifts: usize,
    pub corrections_applied: usize,
    pub throttled: bool,
}

pub struct Reconciler<'a, C: Clock> {
    engine: &'a BookingEngine<C>,
    registry: &'a AdapterRegistry,
}

impl<'a, C: Clock + Clone> Reconciler<'a, C> {
    pub fn new(engine: &'a BookingEngine<C>, registry: &'a AdapterRegistry) -> Self {
        Self { engine, registry }
    }

    /// Runs the full diff-and-resolve cycle for one property/channel pair
    /// over `window` (spec.md §4.10's default window — today minus one day
    /// through today plus 365 days — is the caller's responsibility to
    /// construct; this method takes whatever window it is given). Fetches
    /// both sides from the adapter, then hands off to
    /// [`Self::reconcile_against`] for the part that does not need a live
    /// network call.
    pub async fn reconcile(&self, property_id: PropertyId, channel: Channel, window: DateRange, now: DateTime<Utc>) -> Result<ReconciliationReport, ReconcileError> {
        let connection = self
            .engine
            .outbox()
            .get_connection(property_id, channel)?
            .ok_or(ReconcileError::UnknownConnection { property_id, channel })?;
        let adapter = self.registry.get(channel);

        let remote_bookings = adapter.list_bookings(&connection, window).await?;
        let remote_blocked = adapter.list_availability(&connection, window).await?;

        self.reconcile_against(property_id, channel, &connection, window, remote_bookings, remote_blocked, now).await
    }

    /// The resolve-and-apply half of [`Self::reconcile`], taking the
    /// channel's authoritative lists directly rather than fetching them.
    /// Split out so the decision logic this crate actually owns can be
    /// exercised without a live adapter call; `reconcile` is a thin
    /// fetch-then-delegate wrapper around this.
    pub async fn reconcile_against(
        &self,
        property_id: PropertyId,
        channel: Channel,
        connection: &ChannelConnection,
        window: DateRange,
        remote_bookings: Vec<ExternalBookingSnapshot>,
        remote_blocked: Vec<DateRange>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let local_bookings = self.local_bookings_linked_to(property_id, channel, window)?;
        let local_blocks = self.engine.inventory().list_blocks(property_id)?;

        let booking_diffs = diff::diff_bookings(&local_bookings, &remote_bookings);
        let availability_diffs = diff::diff_availability(window, &local_blocks, &remote_blocked);

        let day = now.date_naive();
        let run_id = format!("reconcile:{property_id}:{channel}:{day}");
        let mut report = ReconciliationReport::default();

        for d in &booking_diffs {
            match d {
                BookingDiff::MissingLocally { .. } => report.missing_locally += 1,
                BookingDiff::MissingRemotely { .. } => report.missing_remotely += 1,
                BookingDiff::StatusMismatch { .. } => report.status_mismatches += 1,
            }
        }
        report.availability_drifts = availability_diffs.len();

        for d in booking_diffs {
            self.apply_booking_diff(&run_id, property_id, channel, connection, d, now, &mut report).await?;
        }

        self.apply_availability_diffs(&run_id, property_id, channel, availability_diffs, now, &mut report)?;

        Ok(report)
    }

    /// Maps every locally known booking that overlaps `window` to the
    /// `external_id` this `channel` knows it by, if any — either because the
    /// booking originates at this channel, or because a prior dispatch
    /// recorded a channel link for it.
    fn local_bookings_linked_to(&self, property_id: PropertyId, channel: Channel, window: DateRange) -> Result<HashMap<String, Booking>, PmsError> {
        let mut out = HashMap::new();
        for booking in self.engine.inventory().list_occupied(property_id, window)? {
            let external_id = match booking.source {
                Source::Channel(c) if c == channel => booking.external_id.clone(),
                _ => self.engine.db().get_channel_link(booking.id.as_uuid(), channel)?,
            };
            if let Some(external_id) = external_id {
                out.insert(external_id, booking);
            }
        }
        Ok(out)
    }

    async fn apply_booking_diff(
        &self,
        run_id: &str,
        property_id: PropertyId,
        channel: Channel,
        connection: &ChannelConnection,
        d: BookingDiff,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<(), ReconcileError> {
        let (suffix, external_id) = match &d {
            BookingDiff::MissingLocally { external_id, .. } => ("missing_locally", external_id.clone()),
            BookingDiff::MissingRemotely { external_id, .. } => ("missing_remotely", external_id.clone()),
            BookingDiff::StatusMismatch { external_id, .. } => ("status_mismatch", external_id.clone()),
        };
        let idempotency_key = format!("{run_id}:{external_id}:{suffix}");
        if self.engine.db().get_idempotency_record(&idempotency_key)?.is_some() {
            return Ok(());
        }
        if !self.admit_correction(property_id, now, report)? {
            return Ok(());
        }

        match d {
            BookingDiff::MissingLocally { remote, .. } => {
                let Some(stay) = DateRange::new(remote.check_in, remote.check_out) else { return Ok(()) };
                let occupied = self.engine.inventory().list_occupied(property_id, stay)?;
                let conflicts_with_local = !occupied.is_empty();
                let conflict_involves_direct = occupied.iter().any(|b| b.source == Source::Direct);

                match evaluate_new_inbound(conflicts_with_local, conflict_involves_direct) {
                    InboundDecision::Accept => {
                        self.engine.accept_inbound_booking(
                            property_id,
                            channel,
                            remote.external_id.clone(),
                            remote.check_in,
                            remote.check_out,
                            remote.guests,
                            remote.status,
                            Money::new(remote.total_minor, &remote.currency),
                        )?;
                    }
                    InboundDecision::Reject { alert_operator } => {
                        if alert_operator {
                            tracing::warn!(%property_id, %channel, external_id = %remote.external_id, "reconciler found a channel booking conflicting with a direct booking, operator alert raised");
                        }
                        if let Err(e) = self.registry.get(channel).cancel_booking(connection, &remote.external_id).await {
                            tracing::warn!(%channel, external_id = %remote.external_id, error = %e, "failed to notify platform of reconciler rejection");
                        }
                    }
                }
            }
            BookingDiff::MissingRemotely { booking, .. } => {
                let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
                self.engine.outbox().requeue_for_channel(property_id, booking.id.as_uuid(), OutboundEventKind::BookingCreated, payload, channel, now)?;
            }
            BookingDiff::StatusMismatch { booking, remote_status, .. } => match resolve_status_conflict(booking.source, booking.status, booking.updated_at, channel, remote_status, now) {
                StatusResolution::IncomingWins => {
                    self.engine.apply_inbound_status_update(booking.id, channel, remote_status)?;
                }
                StatusResolution::LocalWins => {
                    let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
                    self.engine.outbox().requeue_for_channel(property_id, booking.id.as_uuid(), OutboundEventKind::BookingUpdated, payload, channel, now)?;
                }
            },
        }

        self.engine.db().put_idempotency_record(&IdempotencyRecord { key: idempotency_key, result_snapshot: Vec::new(), expires_at: now + chrono::Duration::days(2) })?;
        Ok(())
    }

    /// Applies the "blocked beats available" rule (spec.md §4.11) to every
    /// drifted date where the channel reports a block we don't have: groups
    /// the dates into contiguous ranges and inserts one local
    /// `BlockKind::ChannelHold` per range. A date where we are already the
    /// more restrictive side needs no local write here — the block we
    /// already hold reaches the channel through the normal outbound
    /// dispatch path, not through this reconciliation pass.
    fn apply_availability_diffs(&self, run_id: &str, property_id: PropertyId, channel: Channel, diffs: Vec<AvailabilityDiff>, now: DateTime<Utc>, report: &mut ReconciliationReport) -> Result<(), ReconcileError> {
        let needs_local_block: Vec<_> = diffs.iter().filter(|d| resolve_availability_drift(d.locally_blocked, d.remotely_blocked) && !d.locally_blocked).map(|d| d.date).collect();

        for range in diff::group_consecutive(needs_local_block) {
            let idempotency_key = format!("{run_id}:availability:{}:{}", range.start, range.end);
            if self.engine.db().get_idempotency_record(&idempotency_key)?.is_some() {
                continue;
            }
            if !self.admit_correction(property_id, now, report)? {
                break;
            }
            self.engine.upsert_availability_block(AvailabilityBlock {
                id: BlockId::new(),
                property_id,
                start_date: range.start,
                end_date: range.end,
                kind: BlockKind::ChannelHold,
                source: Source::Channel(channel),
            })?;
            self.engine.db().put_idempotency_record(&IdempotencyRecord { key: idempotency_key, result_snapshot: Vec::new(), expires_at: now + chrono::Duration::days(2) })?;
        }
        Ok(())
    }

    /// Consults and updates the daily correction counter/throttle flag
    /// (spec.md §4.10 step 5). Returns `false` once the property is
    /// throttled for the day; the caller should still have counted the
    /// diff entry, just skip applying it.
    fn admit_correction(&self, property_id: PropertyId, now: DateTime<Utc>, report: &mut ReconciliationReport) -> Result<bool, PmsError> {
        let db = self.engine.db();
        let already_throttled = db.is_reconcile_throttled(property_id.as_uuid())?;
        let day = now.date_naive();
        let count_so_far = db.reconcile_correction_count(property_id.as_uuid(), day)?;

        if !throttle::may_apply_correction(already_throttled, count_so_far) {
            if !already_throttled {
                db.set_reconcile_throttled(property_id.as_uuid())?;
                tracing::warn!(%property_id, count = count_so_far, "reconciler correction threshold exceeded, throttling until operator acknowledgment");
            }
            report.throttled = true;
            return Ok(false);
        }

        db.increment_reconcile_correction_count(property_id.as_uuid(), day)?;
        report.corrections_applied += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pms_core::{BookingId, BookingStatus, FixedClock};
    use pms_store::PmsDb;

    fn d(y: i32, m: u32, day: u32) -> pms_core::CivilDate {
        pms_core::CivilDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn harness() -> (tempfile::TempDir, BookingEngine<FixedClock>, AdapterRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db = PmsDb::open(dir.path()).unwrap();
        let clock = FixedClock::new(Utc::now());
        let engine = BookingEngine::new(db, clock).unwrap();
        let registry = AdapterRegistry::new([7u8; 32]);
        (dir, engine, registry)
    }

    fn connection(property: PropertyId, channel: Channel, external_property_id: &str) -> ChannelConnection {
        ChannelConnection { property_id: property, channel, external_property_id: external_property_id.into(), credentials_sealed: vec![], sync_enabled: true, last_sync_at: None, last_error: None }
    }

    fn connect(engine: &BookingEngine<FixedClock>, property: PropertyId, channel: Channel, external_property_id: &str) -> ChannelConnection {
        let conn = connection(property, channel, external_property_id);
        engine.outbox().upsert_connection(conn.clone()).unwrap();
        conn
    }

    fn snapshot(external_id: &str, status: BookingStatus) -> ExternalBookingSnapshot {
        ExternalBookingSnapshot { external_id: external_id.into(), check_in: d(2025, 9, 1), check_out: d(2025, 9, 5), guests: 2, status, total_minor: 8_000, currency: "USD".into() }
    }

    fn direct_booking(property: PropertyId, check_in: pms_core::CivilDate, check_out: pms_core::CivilDate) -> Booking {
        Booking {
            id: BookingId::new(),
            property_id: property,
            source: Source::Direct,
            external_id: None,
            check_in,
            check_out,
            guests: 2,
            status: BookingStatus::Confirmed,
            total: Money::zero("USD"),
            payment_intent_id: None,
            lock_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn missing_locally_booking_with_no_conflict_is_accepted() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");
        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();

        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Confirmed)], vec![], Utc::now()).await.unwrap();

        assert_eq!(report.missing_locally, 1);
        assert_eq!(report.corrections_applied, 1);
        assert!(!report.throttled);
        assert!(engine.inventory().find_by_source_external_id(Source::Channel(Channel::Airbnb), "HM1").unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_locally_booking_conflicting_with_direct_booking_is_rejected_and_alerts() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");

        engine.inventory().insert_booking(direct_booking(property, d(2025, 9, 2), d(2025, 9, 6))).unwrap();

        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Confirmed)], vec![], Utc::now()).await.unwrap();

        assert_eq!(report.missing_locally, 1);
        assert!(engine.inventory().find_by_source_external_id(Source::Channel(Channel::Airbnb), "HM1").unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_remotely_booking_requeues_a_correction_to_that_channel() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");

        let booking = direct_booking(property, d(2025, 9, 1), d(2025, 9, 5));
        engine.inventory().insert_booking(booking.clone()).unwrap();
        engine.db().put_channel_link(booking.id.as_uuid(), Channel::Airbnb, "HM1").unwrap();

        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![], vec![], Utc::now()).await.unwrap();

        assert_eq!(report.missing_remotely, 1);
        assert_eq!(report.corrections_applied, 1);
        let claimed = engine.outbox().claim_due(Utc::now(), 10).unwrap();
        assert!(claimed.iter().any(|d| d.channel == Channel::Airbnb && d.entity_id == booking.id.as_uuid()));
    }

    #[tokio::test]
    async fn status_mismatch_owned_by_the_channel_is_applied_locally() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");

        let booking = engine
            .accept_inbound_booking(property, Channel::Airbnb, "HM1".into(), d(2025, 9, 1), d(2025, 9, 5), 2, BookingStatus::Confirmed, Money::zero("USD"))
            .unwrap();

        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Cancelled)], vec![], Utc::now()).await.unwrap();

        assert_eq!(report.status_mismatches, 1);
        assert_eq!(report.corrections_applied, 1);
        let reloaded = engine.inventory().get_booking(booking.id).unwrap().unwrap();
        assert_eq!(reloaded.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn status_mismatch_on_a_direct_booking_keeps_local_and_requeues_correction() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");

        let booking = direct_booking(property, d(2025, 9, 1), d(2025, 9, 5));
        engine.inventory().insert_booking(booking.clone()).unwrap();
        engine.db().put_channel_link(booking.id.as_uuid(), Channel::Airbnb, "HM1").unwrap();

        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Cancelled)], vec![], Utc::now()).await.unwrap();

        assert_eq!(report.status_mismatches, 1);
        let reloaded = engine.inventory().get_booking(booking.id).unwrap().unwrap();
        assert_eq!(reloaded.status, BookingStatus::Confirmed, "a direct booking's own status always wins");
        let claimed = engine.outbox().claim_due(Utc::now(), 10).unwrap();
        assert!(claimed.iter().any(|d| d.channel == Channel::Airbnb && d.entity_id == booking.id.as_uuid()));
    }

    #[tokio::test]
    async fn availability_drift_blocks_locally_when_the_channel_is_more_restrictive() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");

        let window = DateRange::new(d(2025, 9, 1), d(2025, 9, 10)).unwrap();
        let remote_blocked = vec![DateRange::new(d(2025, 9, 3), d(2025, 9, 5)).unwrap()];

        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![], remote_blocked, Utc::now()).await.unwrap();

        assert_eq!(report.availability_drifts, 2);
        assert_eq!(report.corrections_applied, 1);
        let blocks = engine.inventory().list_blocks(property).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::ChannelHold);
        assert_eq!(blocks[0].start_date, d(2025, 9, 3));
        assert_eq!(blocks[0].end_date, d(2025, 9, 5));
    }

    #[tokio::test]
    async fn rerunning_the_same_day_does_not_double_apply_a_correction() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");
        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let now = Utc::now();

        let reconciler = Reconciler::new(&engine, &registry);
        let first = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Confirmed)], vec![], now).await.unwrap();
        assert_eq!(first.corrections_applied, 1);

        let second = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, vec![snapshot("HM1", BookingStatus::Confirmed)], vec![], now).await.unwrap();
        assert_eq!(second.missing_locally, 0, "the booking accepted on the first run is now locally known, so the second run sees no diff at all");
        assert_eq!(second.corrections_applied, 0);
    }

    #[tokio::test]
    async fn exceeding_the_daily_threshold_throttles_remaining_corrections() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        let conn = connect(&engine, property, Channel::Airbnb, "prop-1");
        let window = DateRange::new(d(2025, 8, 1), d(2025, 10, 1)).unwrap();
        let now = Utc::now();

        let remote: Vec<ExternalBookingSnapshot> = (0..6).map(|i| snapshot(&format!("HM{i}"), BookingStatus::Inquiry)).collect();
        let reconciler = Reconciler::new(&engine, &registry);
        let report = reconciler.reconcile_against(property, Channel::Airbnb, &conn, window, remote, vec![], now).await.unwrap();

        assert_eq!(report.missing_locally, 6);
        assert_eq!(report.corrections_applied, 5, "only the configured daily allowance of corrections may apply automatically");
        assert!(report.throttled);
        assert!(engine.db().is_reconcile_throttled(property.as_uuid()).unwrap());
    }
}
