//! Deterministic server-side pricing (spec.md §4.6.4).
//!
//! Every adjustment is integer minor-unit arithmetic with half-up rounding at
//! each step (`pms_core::types::half_up_div`); the same `(property snapshot,
//! dates, guests, rule set, tax table)` must produce a byte-equal `Quote`
//! every time, since nothing here reads a clock or an RNG.

use std::collections::HashMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use pms_core::{CivilDate, DateRange, Money};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    Percentage(i64),
    FixedMinor(i64),
}

impl Adjustment {
    fn apply(&self, base: Money) -> Money {
        match self {
            Adjustment::Percentage(basis_points) => base.percent_basis_points(*basis_points),
            Adjustment::FixedMinor(minor) => Money::new(*minor, base.currency_str()),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub enum PricingRule {
    /// Matches a predicate window (e.g. a holiday season).
    Seasonal { window: DateRange, adjustment: Adjustment },
    /// Matches Saturday/Sunday nights in the property's local timezone.
    Weekend { adjustment: Adjustment },
    /// Applied once, after the nightly rate is already resolved, scaled by
    /// stay length.
    LengthOfStay { min_nights: i64, adjustment: Adjustment },
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PricingRuleSet {
    pub base_price: Money,
    /// Explicit per-date overrides, highest precedence.
    pub date_overrides: HashMap<CivilDate, Money>,
    pub rules: Vec<PricingRule>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug)]
pub struct TaxTable {
    /// Basis points (10_000 = 100%), resolved from the property's location.
    pub rate_basis_points: i64,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Quote {
    pub nightly: Vec<(CivilDate, Money)>,
    pub subtotal: Money,
    pub cleaning_fee: Money,
    pub service_fee: Money,
    pub taxes: Money,
    pub total: Money,
}

/// `true` for a civil date falling on Saturday or Sunday.
fn is_weekend(date: CivilDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

/// Resolve the per-night rate for a single date (spec.md §4.6.4 precedence
/// 1-3; length-of-stay is applied separately since it scales with the full
/// stay, not a single night).
fn nightly_rate(date: CivilDate, rules: &PricingRuleSet) -> Money {
    if let Some(price) = rules.date_overrides.get(&date) {
        return *price;
    }

    let mut rate = rules.base_price;
    for rule in &rules.rules {
        match rule {
            PricingRule::Seasonal { window, adjustment } if window.overlaps(&DateRange { start: date, end: date.succ_opt().unwrap() }) => {
                rate = adjust(rate, *adjustment);
            }
            _ => {}
        }
    }
    if is_weekend(date) {
        for rule in &rules.rules {
            if let PricingRule::Weekend { adjustment } = rule {
                rate = adjust(rate, *adjustment);
            }
        }
    }
    rate
}

fn adjust(base: Money, adjustment: Adjustment) -> Money {
    match adjustment {
        Adjustment::Percentage(basis_points) => {
            let delta = base.percent_basis_points(basis_points);
            Money::new(base.minor + delta.minor, base.currency_str())
        }
        Adjustment::FixedMinor(minor) => Money::new(base.minor + minor, base.currency_str()),
    }
}

/// Compute a full quote for a stay (spec.md §4.6.4, §4.6.3 step "computes
/// price deterministically from property, dates, guests, and pricing rules").
pub fn quote(stay: DateRange, rules: &PricingRuleSet, cleaning_fee: Money, service_fee_basis_points: i64, tax_table: TaxTable) -> Quote {
    let currency = rules.base_price.currency_str();
    let mut nightly = Vec::new();
    for date in stay.dates() {
        nightly.push((date, nightly_rate(date, rules)));
    }

    let nights = stay.nights();
    let length_of_stay_adjustment: Money = rules
        .rules
        .iter()
        .filter_map(|rule| match rule {
            PricingRule::LengthOfStay { min_nights, adjustment } if nights >= *min_nights => {
                let subtotal_before: i64 = nightly.iter().map(|(_, m)| m.minor).sum();
                Some(adjust(Money::new(subtotal_before, currency), *adjustment).minor - subtotal_before)
            }
            _ => None,
        })
        .fold(Money::zero(currency), |acc, delta| Money::new(acc.minor + delta, currency));

    let nightly_sum: i64 = nightly.iter().map(|(_, m)| m.minor).sum();
    let subtotal = Money::new(nightly_sum + length_of_stay_adjustment.minor, currency);

    let service_fee = subtotal.percent_basis_points(service_fee_basis_points);
    let pre_tax = subtotal.checked_add(cleaning_fee).and_then(|m| m.checked_add(service_fee)).expect("pricing components share a currency");
    let taxes = pre_tax.percent_basis_points(tax_table.rate_basis_points);
    let total = pre_tax.checked_add(taxes).expect("pricing components share a currency");

    Quote { nightly, subtotal, cleaning_fee, service_fee, taxes, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> CivilDate {
        CivilDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn base_rules(base_minor: i64) -> PricingRuleSet {
        PricingRuleSet {
            base_price: Money::new(base_minor, "USD"),
            date_overrides: HashMap::new(),
            rules: vec![],
        }
    }

    #[test]
    fn flat_rate_three_nights() {
        let stay = DateRange::new(d(2025, 7, 1), d(2025, 7, 4)).unwrap();
        let q = quote(stay, &base_rules(10_000), Money::new(5_000, "USD"), 1_000, TaxTable { rate_basis_points: 800 });
        assert_eq!(q.nightly.len(), 3);
        assert_eq!(q.subtotal.minor, 30_000);
    }

    #[test]
    fn date_override_beats_base_price() {
        let stay = DateRange::new(d(2025, 7, 1), d(2025, 7, 3)).unwrap();
        let mut rules = base_rules(10_000);
        rules.date_overrides.insert(d(2025, 7, 1), Money::new(20_000, "USD"));
        let q = quote(stay, &rules, Money::zero("USD"), 0, TaxTable { rate_basis_points: 0 });
        assert_eq!(q.nightly[0].1.minor, 20_000);
        assert_eq!(q.nightly[1].1.minor, 10_000);
    }

    #[test]
    fn weekend_surcharge_applies_only_to_weekend_nights() {
        // 2025-07-05 is a Saturday.
        let stay = DateRange::new(d(2025, 7, 4), d(2025, 7, 7)).unwrap();
        let mut rules = base_rules(10_000);
        rules.rules.push(PricingRule::Weekend { adjustment: Adjustment::Percentage(2_000) });
        let q = quote(stay, &rules, Money::zero("USD"), 0, TaxTable { rate_basis_points: 0 });
        assert_eq!(q.nightly[0].1.minor, 10_000, "Friday: no surcharge");
        assert_eq!(q.nightly[1].1.minor, 12_000, "Saturday: +20%");
        assert_eq!(q.nightly[2].1.minor, 12_000, "Sunday: +20%");
    }

    #[test]
    fn total_includes_fees_and_taxes_in_spec_order() {
        let stay = DateRange::new(d(2025, 7, 1), d(2025, 7, 2)).unwrap();
        let rules = base_rules(10_000);
        let q = quote(stay, &rules, Money::new(5_000, "USD"), 1_000, TaxTable { rate_basis_points: 1_000 });
        // subtotal 10000, service 1000 (10%), pre-tax = 10000+5000+1000=16000, tax 1600 (10%)
        assert_eq!(q.service_fee.minor, 1_000);
        assert_eq!(q.taxes.minor, 1_600);
        assert_eq!(q.total.minor, 17_600);
    }

    #[test]
    fn same_inputs_produce_byte_equal_quotes() {
        let stay = DateRange::new(d(2025, 8, 1), d(2025, 8, 10)).unwrap();
        let mut rules = base_rules(15_000);
        rules.rules.push(PricingRule::Weekend { adjustment: Adjustment::Percentage(1_500) });
        rules.rules.push(PricingRule::LengthOfStay { min_nights: 7, adjustment: Adjustment::Percentage(-1_000) });
        let a = quote(stay, &rules, Money::new(7_500, "USD"), 1_250, TaxTable { rate_basis_points: 875 });
        let b = quote(stay, &rules, Money::new(7_500, "USD"), 1_250, TaxTable { rate_basis_points: 875 });
        assert_eq!(a.total.minor, b.total.minor);
        assert_eq!(a.subtotal.minor, b.subtotal.minor);
    }
}
