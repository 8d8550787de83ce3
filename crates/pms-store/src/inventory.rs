//! Inventory Store (C6, spec.md §4.5): the exclusion constraint that is the
//! ground truth no-double-bookings guarantee.
//!
//! sled has no native range-exclusion constraint, so this module enforces it
//! at the application layer under a mutex that serializes the
//! check-then-insert sequence for the whole store. That mutex — not the
//! caller's Lock Manager acquisition — is what makes testable property #1
//! ("even with lock disabled, the store must reject the loser") hold: the
//! Lock Manager exists to avoid wasted work racing for the same property,
//! not to provide the safety guarantee itself.

use std::sync::Mutex;

use pms_core::{AvailabilityBlock, BlockId, Booking, BookingId, BookingStatus, DateRange, PropertyId};

use crate::db::PmsDb;

pub struct Inventory<'a> {
    db: &'a PmsDb,
    guard: &'a Mutex<()>,
}

impl<'a> Inventory<'a> {
    pub fn new(db: &'a PmsDb, guard: &'a Mutex<()>) -> Self {
        Self { db, guard }
    }

    fn occupied_intervals(&self, property_id: PropertyId, exclude_booking: Option<BookingId>) -> Result<Vec<DateRange>, pms_core::PmsError> {
        let mut intervals = Vec::new();
        for booking in PmsDb::iter_all::<Booking>(&self.db.bookings)? {
            if booking.property_id != property_id || !booking.status.is_active() {
                continue;
            }
            if exclude_booking == Some(booking.id) {
                continue;
            }
            intervals.push(booking.dates());
        }
        for block in PmsDb::iter_all::<AvailabilityBlock>(&self.db.blocks)? {
            if block.property_id == property_id {
                intervals.push(block.dates());
            }
        }
        Ok(intervals)
    }

    /// Insert a new booking. Returns the conflicting interval(s) if the
    /// proposed dates overlap any active booking or block for the property,
    /// or if `(source, external_id)` is already taken.
    pub fn insert_booking(&self, booking: Booking) -> Result<(), pms_core::PmsError> {
        self.reserve_booking_slot(&booking, || PmsDb::put(&self.db.bookings, booking.id.as_uuid().as_bytes(), &booking))
    }

    /// Check `booking`'s dates (and, if set, its `(source, external_id)`
    /// pair) against every active booking and block for the property, then
    /// run `write` while still holding the mutex that serializes this
    /// check-then-write sequence across the whole store. Lets a caller swap
    /// in a transactional multi-tree write (e.g. the booking row plus its
    /// outbox fan-out) for the plain `PmsDb::put` `insert_booking` uses,
    /// without duplicating the conflict check or losing the exclusion
    /// guarantee the mutex provides.
    pub fn reserve_booking_slot<T>(&self, booking: &Booking, write: impl FnOnce() -> Result<T, pms_core::PmsError>) -> Result<T, pms_core::PmsError> {
        let _lock = self.guard.lock().expect("inventory mutex poisoned");

        if let Some(external_id) = &booking.external_id {
            for existing in PmsDb::iter_all::<Booking>(&self.db.bookings)? {
                if existing.source == booking.source && existing.external_id.as_deref() == Some(external_id.as_str()) {
                    return Err(pms_core::PmsError::DatesUnavailable { conflicting: vec![existing.dates()] });
                }
            }
        }

        if booking.status.is_active() {
            let proposed = booking.dates();
            let conflicting: Vec<DateRange> = self
                .occupied_intervals(booking.property_id, None)?
                .into_iter()
                .filter(|existing| existing.overlaps(&proposed))
                .collect();
            if !conflicting.is_empty() {
                return Err(pms_core::PmsError::DatesUnavailable { conflicting });
            }
        }

        write()
    }

    /// Optimistic-concurrency status transition. `from_set` lists the
    /// statuses the caller expects to find; `expected_version` must match.
    pub fn update_booking_status(
        &self,
        id: BookingId,
        from_set: &[BookingStatus],
        to: BookingStatus,
        expected_version: u64,
    ) -> Result<Booking, pms_core::PmsError> {
        let _lock = self.guard.lock().expect("inventory mutex poisoned");

        let mut booking: Booking = PmsDb::get(&self.db.bookings, id.as_uuid().as_bytes())?
            .ok_or(pms_core::PmsError::NotFound(id.as_uuid()))?;

        if booking.version != expected_version {
            return Err(pms_core::PmsError::VersionConflict { expected: expected_version, actual: booking.version });
        }
        if !from_set.contains(&booking.status) {
            return Err(pms_core::PmsError::InvalidState {
                booking_id: id.as_uuid(),
                from: booking.status.to_string(),
                to: to.to_string(),
            });
        }
        if !booking.status.can_transition_to(to) {
            return Err(pms_core::PmsError::InvalidState {
                booking_id: id.as_uuid(),
                from: booking.status.to_string(),
                to: to.to_string(),
            });
        }

        booking.status = to;
        booking.version += 1;
        booking.updated_at = chrono::Utc::now();
        PmsDb::put(&self.db.bookings, id.as_uuid().as_bytes(), &booking)?;
        Ok(booking)
    }

    /// Force a booking to `to`, bypassing the ordinary lifecycle transition
    /// check `update_booking_status` enforces. A channel's status report is
    /// an external fact about the world, not a locally-initiated step, so
    /// the target may not be reachable via `can_transition_to` from the
    /// current status (a platform reporting `cancelled` against a
    /// `confirmed` booking jumps straight past `checked_in`/`checked_out`).
    /// Still refuses to overwrite a terminal booking: once `cancelled` or
    /// `checked_out`, no inbound report can reopen it.
    pub fn force_booking_status(&self, id: BookingId, to: BookingStatus, expected_version: u64) -> Result<Booking, pms_core::PmsError> {
        let _lock = self.guard.lock().expect("inventory mutex poisoned");

        let mut booking: Booking = PmsDb::get(&self.db.bookings, id.as_uuid().as_bytes())?
            .ok_or(pms_core::PmsError::NotFound(id.as_uuid()))?;

        if booking.version != expected_version {
            return Err(pms_core::PmsError::VersionConflict { expected: expected_version, actual: booking.version });
        }
        if booking.status.is_terminal() {
            return Err(pms_core::PmsError::InvalidState {
                booking_id: id.as_uuid(),
                from: booking.status.to_string(),
                to: to.to_string(),
            });
        }

        booking.status = to;
        booking.version += 1;
        booking.updated_at = chrono::Utc::now();
        PmsDb::put(&self.db.bookings, id.as_uuid().as_bytes(), &booking)?;
        Ok(booking)
    }

    pub fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, pms_core::PmsError> {
        PmsDb::get(&self.db.bookings, id.as_uuid().as_bytes())
    }

    /// Find the local booking a channel's own `external_id` refers to, so
    /// an inbound webhook can tell a brand-new booking from an update to one
    /// it already pushed or previously accepted.
    pub fn find_by_source_external_id(&self, source: pms_core::Source, external_id: &str) -> Result<Option<Booking>, pms_core::PmsError> {
        for booking in PmsDb::iter_all::<Booking>(&self.db.bookings)? {
            if booking.source == source && booking.external_id.as_deref() == Some(external_id) {
                return Ok(Some(booking));
            }
        }
        Ok(None)
    }

    /// Bookings and blocks occupying `property_id`'s calendar within `window`,
    /// used by the reconciler and read-only calendar queries.
    pub fn list_occupied(&self, property_id: PropertyId, window: DateRange) -> Result<Vec<Booking>, pms_core::PmsError> {
        let mut out = Vec::new();
        for booking in PmsDb::iter_all::<Booking>(&self.db.bookings)? {
            if booking.property_id == property_id && booking.status.is_active() && booking.dates().overlaps(&window) {
                out.push(booking);
            }
        }
        out.sort_by_key(|b| b.check_in);
        Ok(out)
    }

    pub fn insert_block(&self, block: AvailabilityBlock) -> Result<(), pms_core::PmsError> {
        self.reserve_block_slot(&block, || PmsDb::put(&self.db.blocks, block.id.as_uuid().as_bytes(), &block))
    }

    /// Same split as [`Self::reserve_booking_slot`], for availability blocks.
    pub fn reserve_block_slot<T>(&self, block: &AvailabilityBlock, write: impl FnOnce() -> Result<T, pms_core::PmsError>) -> Result<T, pms_core::PmsError> {
        let _lock = self.guard.lock().expect("inventory mutex poisoned");

        let proposed = block.dates();
        let conflicting: Vec<DateRange> = self
            .occupied_intervals(block.property_id, None)?
            .into_iter()
            .filter(|existing| existing.overlaps(&proposed))
            .collect();
        if !conflicting.is_empty() {
            return Err(pms_core::PmsError::DatesUnavailable { conflicting });
        }
        write()
    }

    pub fn remove_block(&self, id: BlockId) -> Result<(), pms_core::PmsError> {
        self.with_lock(|| {
            self.db.blocks.remove(id.as_uuid().as_bytes()).map_err(|e| pms_core::PmsError::StoreUnavailable(e.to_string()))?;
            Ok(())
        })
    }

    /// Run `body` while holding the same mutex the check-then-write paths
    /// above use. A block removal has no conflict check of its own, but it
    /// still must not race a concurrent insert's read of the occupied
    /// calendar — without this, an insert could read a block that is about
    /// to be removed and reject dates that are actually about to free up.
    pub fn with_lock<T>(&self, body: impl FnOnce() -> Result<T, pms_core::PmsError>) -> Result<T, pms_core::PmsError> {
        let _lock = self.guard.lock().expect("inventory mutex poisoned");
        body()
    }

    pub fn list_blocks(&self, property_id: PropertyId) -> Result<Vec<AvailabilityBlock>, pms_core::PmsError> {
        Ok(PmsDb::iter_all::<AvailabilityBlock>(&self.db.blocks)?
            .into_iter()
            .filter(|b| b.property_id == property_id)
            .collect())
    }
}
