//! Core value types for the Stayline booking/availability domain.
//!
//! These are the types every other crate in the workspace builds on: opaque
//! 128-bit identifiers, integer-minor-unit money, half-open civil date
//! ranges, and the closed set of channel platforms.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Opaque identifiers ───────────────────────────────────────────────────────

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

opaque_id!(PropertyId);
opaque_id!(BookingId);
opaque_id!(BlockId);
opaque_id!(EventId);
opaque_id!(DeliveryId);

// ── Money ────────────────────────────────────────────────────────────────────

/// An integer minor-unit money value with a 3-letter ISO-4217 currency tag.
///
/// All arithmetic is on integer minor units (cents, pence, ...); no floating
/// point ever touches a price.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    pub minor: i64,
    pub currency: [u8; 3],
}

impl Money {
    pub fn new(minor: i64, currency: &str) -> Self {
        let bytes = currency.as_bytes();
        assert!(bytes.len() == 3, "currency must be a 3-letter ISO code");
        let mut tag = [0u8; 3];
        tag.copy_from_slice(bytes);
        Self { minor, currency: tag }
    }

    pub fn zero(currency: &str) -> Self {
        Self::new(0, currency)
    }

    pub fn currency_str(&self) -> &str {
        std::str::from_utf8(&self.currency).unwrap_or("???")
    }

    pub fn checked_add(&self, other: Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.minor.checked_add(other.minor).map(|minor| Money {
            minor,
            currency: self.currency,
        })
    }

    /// Half-up rounded percentage of this amount, e.g. 12.5% of 1000 -> 125.
    /// `basis_points` is hundredths of a percent (10_000 = 100%).
    pub fn percent_basis_points(&self, basis_points: i64) -> Money {
        let numerator = self.minor * basis_points;
        let minor = half_up_div(numerator, 10_000);
        Money { minor, currency: self.currency }
    }
}

/// Integer division with half-up rounding, correct for negative numerators
/// (money minor units are never negative in this domain but the helper stays
/// general so callers don't have to reason about sign).
pub fn half_up_div(numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    if numerator >= 0 {
        (numerator + denominator / 2) / denominator
    } else {
        -((-numerator + denominator / 2) / denominator)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} {}", self.minor / 100, (self.minor % 100).abs(), self.currency_str())
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({} {})", self.minor, self.currency_str())
    }
}

// ── Civil dates / half-open ranges ──────────────────────────────────────────

pub type CivilDate = NaiveDate;

/// A half-open date interval `[start, end)`. `start < end` is an invariant
/// enforced by every constructor.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct DateRange {
    pub start: CivilDate,
    pub end: CivilDate,
}

impl DateRange {
    pub fn new(start: CivilDate, end: CivilDate) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Two half-open ranges overlap iff `a.start < b.end && b.start < a.end`.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn dates(&self) -> impl Iterator<Item = CivilDate> + '_ {
        let mut d = self.start;
        std::iter::from_fn(move || {
            if d >= self.end {
                None
            } else {
                let cur = d;
                d = d.succ_opt().unwrap_or(d + chrono::Duration::days(1));
                Some(cur)
            }
        })
    }
}

// ── Source / channel ─────────────────────────────────────────────────────────

/// The origin of a booking or event: the direct-booking engine, or one of
/// the five channel platforms this system synchronizes with. This set is
/// closed at compile time (spec.md §9: "platform list is closed at compile
/// time").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Direct,
    Channel(Channel),
}

impl Source {
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Source::Direct => None,
            Source::Channel(c) => Some(*c),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Direct => write!(f, "direct"),
            Source::Channel(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Airbnb,
    BookingCom,
    Expedia,
    FewoDirekt,
    GoogleVr,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Airbnb,
        Channel::BookingCom,
        Channel::Expedia,
        Channel::FewoDirekt,
        Channel::GoogleVr,
    ];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Airbnb => "airbnb",
            Channel::BookingCom => "booking_com",
            Channel::Expedia => "expedia",
            Channel::FewoDirekt => "fewo_direkt",
            Channel::GoogleVr => "google_vr",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_half_open() {
        let a = DateRange::new(d(2025, 7, 1), d(2025, 7, 5)).unwrap();
        let b = DateRange::new(d(2025, 7, 5), d(2025, 7, 8)).unwrap();
        assert!(!a.overlaps(&b), "checkout day of a equals checkin day of b: no overlap");
    }

    #[test]
    fn overlap_detects_partial_overlap() {
        let a = DateRange::new(d(2025, 7, 1), d(2025, 7, 5)).unwrap();
        let b = DateRange::new(d(2025, 7, 4), d(2025, 7, 8)).unwrap();
        assert!(a.overlaps(&b));
    }

    #[test]
    fn half_up_rounding() {
        assert_eq!(half_up_div(125, 10), 13);
        assert_eq!(half_up_div(124, 10), 12);
        assert_eq!(half_up_div(115, 10), 12);
    }

    #[test]
    fn percent_of_money() {
        let m = Money::new(10_000, "USD");
        let fee = m.percent_basis_points(1_250); // 12.5%
        assert_eq!(fee.minor, 1_250);
    }

    fn d(y: i32, m: u32, day: u32) -> CivilDate {
        CivilDate::from_ymd_opt(y, m, day).unwrap()
    }
}
