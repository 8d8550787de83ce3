//! Booking Core (C7, spec.md §4.6): orchestrates the Inventory Store, Event
//! Log, and Lock Manager across the direct-booking checkout flow.
//!
//! The staged shape here — acquire the property lock up front, stage the
//! business write, append the event in the same call, release the lock on
//! every exit path — is the same "serialize under a lock, commit once"
//! discipline the teacher's state engine uses for its own mutation batches,
//! applied to a two-step (reserve, then confirm) flow instead of a
//! single-shot apply.

use std::sync::Mutex;

use chrono::Utc;

use pms_core::{
    constants, AvailabilityBlock, BlockId, Booking, BookingId, BookingStatus, Clock, DateRange, Money, PmsError, PropertyId, Source,
};

use crate::db::PmsDb;
use crate::inventory::Inventory;
use crate::model::{CheckoutSession, OutboundEventKind};
use crate::outbox::Outbox;
use crate::pricing::{self, PricingRuleSet, TaxTable};

pub struct BookingEngine<C: Clock> {
    db: PmsDb,
    lock: pms_lock::LockManager<C>,
    conflict_guard: Mutex<()>,
    clock: C,
}

impl<C: Clock + Clone> BookingEngine<C> {
    pub fn new(db: PmsDb, clock: C) -> Result<Self, PmsError> {
        let lock = pms_lock::LockManager::new(db.sled_handle(), clock.clone()).map_err(|e| PmsError::LockStoreUnavailable(e.to_string()))?;
        Ok(Self { db, lock, conflict_guard: Mutex::new(()), clock })
    }

    pub fn inventory(&self) -> Inventory<'_> {
        Inventory::new(&self.db, &self.conflict_guard)
    }

    pub fn outbox(&self) -> Outbox<'_> {
        Outbox::new(&self.db)
    }

    /// Raw handle to the tables this engine is built on, for callers (the
    /// inbound ingress) that need to read/write a table `Inventory`/`Outbox`
    /// does not wrap (idempotency records, channel connections) without
    /// opening a second, conflicting handle onto the same sled database.
    pub fn db(&self) -> &PmsDb {
        &self.db
    }

    /// Start a direct-booking checkout: acquires the property lock, prices
    /// the stay, and stages a `reserved` booking (spec.md §4.6.3 step 1).
    /// The lock is held across the whole checkout session, released only by
    /// `confirm_payment`, `cancel_booking`, or `checkout_timeout_sweeper`.
    #[allow(clippy::too_many_arguments)]
    pub fn start_checkout(
        &self,
        property_id: PropertyId,
        check_in: pms_core::CivilDate,
        check_out: pms_core::CivilDate,
        guests: u32,
        rules: &PricingRuleSet,
        cleaning_fee: Money,
        service_fee_basis_points: i64,
        tax_table: TaxTable,
    ) -> Result<CheckoutSession, PmsError> {
        let stay = DateRange::new(check_in, check_out).ok_or(PmsError::InvalidDateRange)?;

        let key = constants::booking_lock_key(property_id.as_uuid());
        let handle = self
            .lock
            .acquire(&key, constants::BOOKING_LOCK_TTL, std::time::Duration::ZERO)
            .map_err(|_| PmsError::ConcurrentBooking)?;

        let now = self.clock.now();
        let quote = pricing::quote(stay, rules, cleaning_fee, service_fee_basis_points, tax_table);

        let booking = Booking {
            id: BookingId::new(),
            property_id,
            source: Source::Direct,
            external_id: None,
            check_in,
            check_out,
            guests,
            status: BookingStatus::Reserved,
            total: quote.total,
            payment_intent_id: None,
            lock_key: Some(handle.owner_token.clone()),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        if let Err(e) = self.inventory().insert_booking(booking.clone()) {
            let _ = self.lock.release(&key, &handle.owner_token);
            return Err(e);
        }
        tracing::info!(%property_id, booking_id = %booking.id, "checkout started");

        Ok(CheckoutSession {
            booking_id: booking.id,
            lock_owner_token: handle.owner_token,
            deadline: now + chrono::Duration::from_std(constants::CHECKOUT_BUDGET).unwrap(),
        })
    }

    /// Idempotent while the booking is still `reserved` and the caller holds
    /// the session's lock token (spec.md §4.6.3 step 2).
    pub fn update_guest_details(&self, booking_id: BookingId, lock_owner_token: &str, guests: u32) -> Result<Booking, PmsError> {
        let mut booking = self.inventory().get_booking(booking_id)?.ok_or(PmsError::NotFound(booking_id.as_uuid()))?;
        if booking.status != BookingStatus::Reserved {
            return Err(PmsError::InvalidState {
                booking_id: booking_id.as_uuid(),
                from: booking.status.to_string(),
                to: "reserved".into(),
            });
        }
        if booking.lock_key.as_deref() != Some(lock_owner_token) {
            return Err(PmsError::ConcurrentBooking);
        }

        booking.guests = guests;
        booking.version += 1;
        booking.updated_at = self.clock.now();
        PmsDb::put(&self.db.bookings, booking_id.as_uuid().as_bytes(), &booking)?;
        Ok(booking)
    }

    /// Transitions `reserved -> confirmed` (spec.md §4.6.3 step 3). Safe to
    /// call concurrently from a payment webhook and a client-initiated
    /// confirm: the loser of the race observes its own optimistic-concurrency
    /// failure and, finding the booking already `confirmed`, returns success
    /// with the winner's snapshot instead of an error.
    pub fn confirm_payment(&self, booking_id: BookingId, payment_intent_id: String, payment_verified: bool) -> Result<Booking, PmsError> {
        if !payment_verified {
            return Err(PmsError::PaymentNotVerified { booking_id: booking_id.as_uuid() });
        }

        let inventory = self.inventory();
        let current = inventory.get_booking(booking_id)?.ok_or(PmsError::NotFound(booking_id.as_uuid()))?;

        match inventory.update_booking_status(booking_id, &[BookingStatus::Reserved], BookingStatus::Confirmed, current.version) {
            Ok(mut booking) => {
                booking.payment_intent_id = Some(payment_intent_id);
                if let Some(owner_token) = booking.lock_key.take() {
                    let key = constants::booking_lock_key(booking.property_id.as_uuid());
                    let _ = self.lock.release(&key, &owner_token);
                }

                let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
                self.outbox().append_with_business_write(
                    &self.db.bookings,
                    booking_id.as_uuid().as_bytes(),
                    &booking,
                    booking.property_id,
                    booking.id.as_uuid(),
                    OutboundEventKind::BookingCreated,
                    payload,
                    Source::Direct,
                    self.clock.now(),
                )?;
                tracing::info!(booking_id = %booking.id, "payment confirmed");
                Ok(booking)
            }
            Err(PmsError::VersionConflict { .. }) => {
                let latest = inventory.get_booking(booking_id)?.ok_or(PmsError::NotFound(booking_id.as_uuid()))?;
                if latest.status == BookingStatus::Confirmed {
                    Ok(latest)
                } else {
                    Err(PmsError::InvalidState {
                        booking_id: booking_id.as_uuid(),
                        from: latest.status.to_string(),
                        to: "confirmed".into(),
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel a booking from any non-terminal state. Releases the property
    /// lock if the booking still holds one and emits `booking.cancelled`.
    pub fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, PmsError> {
        let inventory = self.inventory();
        let current = inventory.get_booking(booking_id)?.ok_or(PmsError::NotFound(booking_id.as_uuid()))?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }

        let mut booking = inventory.update_booking_status(booking_id, &[current.status], BookingStatus::Cancelled, current.version)?;

        if let Some(owner_token) = booking.lock_key.take() {
            let key = constants::booking_lock_key(booking.property_id.as_uuid());
            let _ = self.lock.release(&key, &owner_token);
        }

        let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
        self.outbox().append_with_business_write(
            &self.db.bookings,
            booking_id.as_uuid().as_bytes(),
            &booking,
            booking.property_id,
            booking.id.as_uuid(),
            OutboundEventKind::BookingCancelled,
            payload,
            Source::Direct,
            self.clock.now(),
        )?;
        Ok(booking)
    }

    /// Background sweep: cancels `reserved` bookings whose checkout session
    /// has expired without a confirmed payment (spec.md §4.6.3 step 4).
    /// `payment_succeeded` lets the caller check the payment intent's actual
    /// state before the sweep cancels a booking a slow webhook is about to
    /// confirm.
    pub fn checkout_timeout_sweeper(&self, payment_succeeded: impl Fn(&Booking) -> bool) -> Result<Vec<BookingId>, PmsError> {
        let now = self.clock.now();
        let mut cancelled = Vec::new();
        let reserved: Vec<Booking> = PmsDb::iter_all::<Booking>(&self.db.bookings)?
            .into_iter()
            .filter(|b| b.status == BookingStatus::Reserved)
            .filter(|b| b.created_at + chrono::Duration::from_std(constants::CHECKOUT_BUDGET).unwrap() < now)
            .collect();

        for booking in reserved {
            if payment_succeeded(&booking) {
                continue;
            }
            if self.cancel_booking(booking.id).is_ok() {
                tracing::warn!(booking_id = %booking.id, "checkout session expired without confirmed payment, cancelling");
                cancelled.push(booking.id);
            }
        }
        Ok(cancelled)
    }

    /// Admit a brand-new booking reported by a channel (spec.md §4.9 step 5,
    /// accept branch). Goes through the same exclusion-constraint insert as
    /// a direct booking; the only differences are the `Source::Channel`
    /// origin and that there is no property lock session to hold afterward,
    /// since the caller already serialized this call under the webhook lock.
    pub fn accept_inbound_booking(
        &self,
        property_id: PropertyId,
        channel: pms_core::Channel,
        external_id: String,
        check_in: pms_core::CivilDate,
        check_out: pms_core::CivilDate,
        guests: u32,
        status: BookingStatus,
        total: Money,
    ) -> Result<Booking, PmsError> {
        let now = self.clock.now();
        let booking = Booking {
            id: BookingId::new(),
            property_id,
            source: Source::Channel(channel),
            external_id: Some(external_id.clone()),
            check_in,
            check_out,
            guests,
            status,
            total,
            payment_intent_id: None,
            lock_key: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
        let link_key = PmsDb::channel_link_key(booking.id.as_uuid(), channel);
        let outbox = self.outbox();
        self.inventory().reserve_booking_slot(&booking, || {
            outbox.append_with_booking_and_link(&booking, &link_key, &external_id, OutboundEventKind::BookingCreated, payload, Source::Channel(channel), now)
        })?;
        tracing::info!(%property_id, booking_id = %booking.id, %channel, "inbound booking accepted");
        Ok(booking)
    }

    /// Apply a status report from a channel to an existing booking (spec.md
    /// §4.9 step 5, update branch), having already run the Conflict
    /// Resolution Policy and decided the incoming report wins. Uses
    /// `Inventory::force_booking_status` rather than `update_booking_status`:
    /// a cross-channel status report is an external fact, not a locally
    /// driven lifecycle step, so the new status may not be one step away
    /// from the current one.
    pub fn apply_inbound_status_update(&self, booking_id: BookingId, channel: pms_core::Channel, status: BookingStatus) -> Result<Booking, PmsError> {
        let inventory = self.inventory();
        let current = inventory.get_booking(booking_id)?.ok_or(PmsError::NotFound(booking_id.as_uuid()))?;
        if current.status == status {
            return Ok(current);
        }

        let booking = inventory.force_booking_status(booking_id, status, current.version)?;

        let payload = bincode::serialize(&booking).map_err(|e| PmsError::Serialization(e.to_string()))?;
        self.outbox().append(booking.property_id, booking.id.as_uuid(), OutboundEventKind::BookingUpdated, payload, Source::Channel(channel), self.clock.now())?;
        tracing::info!(booking_id = %booking.id, %channel, status = %booking.status, "inbound status update applied");
        Ok(booking)
    }

    /// Acquire the same property lock `start_checkout` holds across a
    /// direct-booking session and run `body` while holding it, releasing on
    /// every exit path (spec.md §5: "the inbound ingress serializes booking
    /// writes for a given property via the Booking Core lock"). A failed
    /// acquisition surfaces as `PmsError::ConcurrentBooking`, the same error
    /// a direct checkout sees when the property is already locked.
    pub fn with_property_lock<T>(
        &self,
        property_id: PropertyId,
        ttl: std::time::Duration,
        wait_for: std::time::Duration,
        body: impl FnOnce() -> Result<T, PmsError>,
    ) -> Result<T, PmsError> {
        let key = constants::booking_lock_key(property_id.as_uuid());
        let handle = self.lock.acquire(&key, ttl, wait_for).map_err(|_| PmsError::ConcurrentBooking)?;
        let result = body();
        let _ = self.lock.release(&handle.key, &handle.owner_token);
        result
    }

    /// Same as [`Self::with_property_lock`], but for callers driven by a
    /// tokio runtime (the inbound webhook pipeline): waits for the lock with
    /// `.await` instead of blocking the calling thread, so a property under
    /// contention doesn't stall unrelated tasks on the same worker. `body`
    /// itself stays synchronous since it never does I/O.
    pub async fn with_property_lock_async<T>(
        &self,
        property_id: PropertyId,
        ttl: std::time::Duration,
        wait_for: std::time::Duration,
        body: impl FnOnce() -> Result<T, PmsError>,
    ) -> Result<T, PmsError> {
        let key = constants::booking_lock_key(property_id.as_uuid());
        let handle = self.lock.acquire_async(&key, ttl, wait_for).await.map_err(|_| PmsError::ConcurrentBooking)?;
        let result = body();
        let _ = self.lock.release(&handle.key, &handle.owner_token);
        result
    }

    pub fn upsert_availability_block(&self, block: AvailabilityBlock) -> Result<(), PmsError> {
        let now = self.clock.now();
        let payload = bincode::serialize(&block).map_err(|e| PmsError::Serialization(e.to_string()))?;
        let outbox = self.outbox();
        self.inventory().reserve_block_slot(&block, || {
            outbox.append_with_business_write(&self.db.blocks, block.id.as_uuid().as_bytes(), &block, block.property_id, block.id.as_uuid(), OutboundEventKind::AvailabilityUpdated, payload, block.source, now)
        })?;
        Ok(())
    }

    pub fn remove_availability_block(&self, property_id: PropertyId, block_id: BlockId) -> Result<(), PmsError> {
        let now = self.clock.now();
        let outbox = self.outbox();
        self.inventory().with_lock(|| {
            outbox.append_with_business_removal(&self.db.blocks, block_id.as_uuid().as_bytes(), property_id, block_id.as_uuid(), OutboundEventKind::AvailabilityUpdated, Vec::new(), Source::Direct, now)
        })?;
        Ok(())
    }

    pub fn list_property_calendar(&self, property_id: PropertyId, window: DateRange) -> Result<Vec<Booking>, PmsError> {
        self.inventory().list_occupied(property_id, window)
    }

    pub fn list_dead_letters(&self, property_id: PropertyId) -> Result<Vec<crate::model::Delivery>, PmsError> {
        self.outbox().list_dead_letters(property_id)
    }
}
