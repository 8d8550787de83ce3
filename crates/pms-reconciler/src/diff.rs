//! Pure diff computation over already-fetched local/remote snapshots
//! (spec.md §4.10 steps 2-3). No I/O, no clock, no adapter calls — `run.rs`
//! is responsible for fetching both sides and handing the results here.

use std::collections::{HashMap, HashSet};

use pms_channels::ExternalBookingSnapshot;
use pms_core::{AvailabilityBlock, Booking, BookingStatus, CivilDate, DateRange};

/// One disagreement between the local record and a channel's own view,
/// keyed by that channel's `external_id`.
#[derive(Clone, Debug, PartialEq)]
pub enum BookingDiff {
    /// The channel has a booking with no local record linked to it.
    MissingLocally { external_id: String, remote: ExternalBookingSnapshot },
    /// A booking linked to this channel exists locally but the channel no
    /// longer reports it.
    MissingRemotely { external_id: String, booking: Booking },
    /// Both sides agree the booking exists but disagree on its status.
    StatusMismatch { external_id: String, booking: Booking, remote_status: BookingStatus },
}

/// Compares the local bookings already linked to a channel (`local`, keyed
/// by that channel's `external_id`) against the channel's own authoritative
/// list.
pub fn diff_bookings(local: &HashMap<String, Booking>, remote: &[ExternalBookingSnapshot]) -> Vec<BookingDiff> {
    let mut diffs = Vec::new();
    let mut seen = HashSet::new();

    for snapshot in remote {
        seen.insert(snapshot.external_id.clone());
        match local.get(&snapshot.external_id) {
            None => diffs.push(BookingDiff::MissingLocally { external_id: snapshot.external_id.clone(), remote: snapshot.clone() }),
            Some(booking) if booking.status != snapshot.status => {
                diffs.push(BookingDiff::StatusMismatch { external_id: snapshot.external_id.clone(), booking: booking.clone(), remote_status: snapshot.status });
            }
            Some(_) => {}
        }
    }

    for (external_id, booking) in local {
        if !seen.contains(external_id) {
            diffs.push(BookingDiff::MissingRemotely { external_id: external_id.clone(), booking: booking.clone() });
        }
    }

    diffs
}

/// One civil date within the reconciliation window where the locally
/// recorded blocked/available state disagrees with the channel's own
/// calendar (`AVAILABILITY_DRIFT`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AvailabilityDiff {
    pub date: CivilDate,
    pub locally_blocked: bool,
    pub remotely_blocked: bool,
}

fn range_contains(range: &DateRange, date: CivilDate) -> bool {
    date >= range.start && date < range.end
}

pub fn diff_availability(window: DateRange, local_blocks: &[AvailabilityBlock], remote_blocked: &[DateRange]) -> Vec<AvailabilityDiff> {
    window
        .dates()
        .filter_map(|date| {
            let locally_blocked = local_blocks.iter().any(|b| range_contains(&b.dates(), date));
            let remotely_blocked = remote_blocked.iter().any(|r| range_contains(r, date));
            if locally_blocked == remotely_blocked {
                None
            } else {
                Some(AvailabilityDiff { date, locally_blocked, remotely_blocked })
            }
        })
        .collect()
}

/// Groups a set of dates into the smallest number of contiguous ranges, so a
/// run of drifted days becomes one corrective block instead of one per day.
pub fn group_consecutive(mut dates: Vec<CivilDate>) -> Vec<DateRange> {
    dates.sort();
    dates.dedup();

    let mut ranges = Vec::new();
    let mut iter = dates.into_iter();
    let Some(first) = iter.next() else { return ranges };
    let mut start = first;
    let mut end = first.succ_opt().unwrap_or(first);

    for date in iter {
        if date == end {
            end = date.succ_opt().unwrap_or(date);
        } else {
            if let Some(range) = DateRange::new(start, end) {
                ranges.push(range);
            }
            start = date;
            end = date.succ_opt().unwrap_or(date);
        }
    }
    if let Some(range) = DateRange::new(start, end) {
        ranges.push(range);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use pms_core::{BlockId, BlockKind, BookingId, Money, PropertyId, Source};

    fn d(y: i32, m: u32, day: u32) -> CivilDate {
        CivilDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn snapshot(external_id: &str, status: BookingStatus) -> ExternalBookingSnapshot {
        ExternalBookingSnapshot {
            external_id: external_id.into(),
            check_in: d(2025, 6, 1),
            check_out: d(2025, 6, 5),
            guests: 2,
            status,
            total_minor: 10_000,
            currency: "USD".into(),
        }
    }

    fn booking(external_id: &str, status: BookingStatus) -> Booking {
        Booking {
            id: BookingId::new(),
            property_id: PropertyId::new(),
            source: Source::Channel(pms_core::Channel::Airbnb),
            external_id: Some(external_id.into()),
            check_in: d(2025, 6, 1),
            check_out: d(2025, 6, 5),
            guests: 2,
            status,
            total: Money::zero("USD"),
            payment_intent_id: None,
            lock_key: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn remote_only_booking_is_missing_locally() {
        let local = HashMap::new();
        let remote = vec![snapshot("ext-1", BookingStatus::Confirmed)];
        let diffs = diff_bookings(&local, &remote);
        assert_eq!(diffs, vec![BookingDiff::MissingLocally { external_id: "ext-1".into(), remote: remote[0].clone() }]);
    }

    #[test]
    fn local_only_booking_is_missing_remotely() {
        let mut local = HashMap::new();
        local.insert("ext-1".to_string(), booking("ext-1", BookingStatus::Confirmed));
        let diffs = diff_bookings(&local, &[]);
        assert!(matches!(diffs.as_slice(), [BookingDiff::MissingRemotely { external_id, .. }] if external_id == "ext-1"));
    }

    #[test]
    fn matching_status_on_both_sides_is_not_a_diff() {
        let mut local = HashMap::new();
        local.insert("ext-1".to_string(), booking("ext-1", BookingStatus::Confirmed));
        let remote = vec![snapshot("ext-1", BookingStatus::Confirmed)];
        assert!(diff_bookings(&local, &remote).is_empty());
    }

    #[test]
    fn differing_status_on_both_sides_is_a_status_mismatch() {
        let mut local = HashMap::new();
        local.insert("ext-1".to_string(), booking("ext-1", BookingStatus::Confirmed));
        let remote = vec![snapshot("ext-1", BookingStatus::Cancelled)];
        let diffs = diff_bookings(&local, &remote);
        assert!(matches!(diffs.as_slice(), [BookingDiff::StatusMismatch { remote_status: BookingStatus::Cancelled, .. }]));
    }

    #[test]
    fn availability_diff_flags_only_disagreeing_dates() {
        let property = PropertyId::new();
        let window = DateRange::new(d(2025, 6, 1), d(2025, 6, 5)).unwrap();
        let local_blocks = vec![AvailabilityBlock {
            id: BlockId::new(),
            property_id: property,
            start_date: d(2025, 6, 1),
            end_date: d(2025, 6, 2),
            kind: BlockKind::Blocked,
            source: Source::Direct,
        }];
        let remote_blocked = vec![DateRange::new(d(2025, 6, 3), d(2025, 6, 4)).unwrap()];

        let diffs = diff_availability(window, &local_blocks, &remote_blocked);
        let dates: Vec<CivilDate> = diffs.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![d(2025, 6, 1), d(2025, 6, 3)]);
    }

    #[test]
    fn group_consecutive_merges_adjacent_dates_and_splits_gaps() {
        let dates = vec![d(2025, 6, 1), d(2025, 6, 2), d(2025, 6, 3), d(2025, 6, 10)];
        let ranges = group_consecutive(dates);
        assert_eq!(ranges, vec![DateRange::new(d(2025, 6, 1), d(2025, 6, 4)).unwrap(), DateRange::new(d(2025, 6, 10), d(2025, 6, 11)).unwrap()]);
    }
}
