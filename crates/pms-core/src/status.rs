//! The booking lifecycle state machine (spec.md §4.6.2).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Inquiry,
    Reserved,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    /// Statuses whose date interval participates in the exclusion constraint
    /// (spec.md GLOSSARY: "Active status").
    pub const ACTIVE: [BookingStatus; 4] = [
        BookingStatus::Reserved,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::CheckedOut,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::CheckedOut)
    }

    /// Relative restrictiveness used by the Conflict Resolution Policy
    /// (spec.md §4.11): lower rank = more restrictive. Ties are impossible
    /// since every variant maps to a distinct rank.
    ///
    /// `cancelled(0) < checked_out(1) < checked_in(2) < confirmed(3) <
    /// reserved(4) < inquiry(5)`
    pub fn restrictiveness_rank(&self) -> u8 {
        match self {
            BookingStatus::Cancelled => 0,
            BookingStatus::CheckedOut => 1,
            BookingStatus::CheckedIn => 2,
            BookingStatus::Confirmed => 3,
            BookingStatus::Reserved => 4,
            BookingStatus::Inquiry => 5,
        }
    }

    /// True iff `self` is at least as restrictive as `other` (lower or equal
    /// rank). Used to pick the "most restrictive wins" side of a conflict.
    pub fn at_least_as_restrictive_as(&self, other: &BookingStatus) -> bool {
        self.restrictiveness_rank() <= other.restrictiveness_rank()
    }

    /// Whether `self -> to` is a permitted transition per the state machine
    /// diagram in spec.md §4.6.2. Any non-terminal status may transition to
    /// `Cancelled`.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        if self.is_terminal() {
            return false;
        }
        if to == Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Inquiry, Reserved)
                | (Reserved, Confirmed)
                | (Confirmed, CheckedIn)
                | (CheckedIn, CheckedOut)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Inquiry => "inquiry",
            BookingStatus::Reserved => "reserved",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    #[test]
    fn any_nonterminal_can_cancel() {
        for s in [Inquiry, Reserved, Confirmed, CheckedIn] {
            assert!(s.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_states_cannot_transition() {
        assert!(!Cancelled.can_transition_to(Reserved));
        assert!(!CheckedOut.can_transition_to(Cancelled));
    }

    #[test]
    fn happy_path_direct_flow() {
        assert!(Reserved.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(CheckedOut));
        assert!(!Reserved.can_transition_to(CheckedIn), "cannot skip confirmation");
    }

    #[test]
    fn restrictiveness_ordering_matches_spec() {
        assert!(Cancelled.restrictiveness_rank() < CheckedOut.restrictiveness_rank());
        assert!(CheckedOut.restrictiveness_rank() < CheckedIn.restrictiveness_rank());
        assert!(CheckedIn.restrictiveness_rank() < Confirmed.restrictiveness_rank());
        assert!(Confirmed.restrictiveness_rank() < Reserved.restrictiveness_rank());
        assert!(Reserved.restrictiveness_rank() < Inquiry.restrictiveness_rank());
    }
}
