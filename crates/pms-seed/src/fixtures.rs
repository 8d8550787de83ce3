//! The sample property, pricing rules, and channel connections
//! [`crate::apply_seed`] writes into a fresh store.
//!
//! Every id here is derived deterministically from a fixed label (the same
//! `BLAKE3(label)` scheme the workspace already uses for its other
//! content-addressed ids) so local bring-up and integration tests see the
//! same property across runs without persisting anything between them.

use std::collections::HashMap;

use pms_channels::credentials::{self, PlatformCredentials};
use pms_core::{Channel, ChannelConnection, Money, PropertyId};
use pms_store::{Adjustment, PricingRule, PricingRuleSet, TaxTable};

use crate::params::SeedParams;

fn deterministic_id(label: &[u8]) -> uuid::Uuid {
    let hash = pms_crypto::blake3_hash(label);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    uuid::Uuid::from_bytes(bytes)
}

/// The one property every local bring-up and integration test sees.
pub fn sample_property_id() -> PropertyId {
    PropertyId::from_bytes(*deterministic_id(b"stayline:sample-property").as_bytes())
}

pub const SAMPLE_CLEANING_FEE_MINOR: i64 = 6_000;
pub const SAMPLE_SERVICE_FEE_BASIS_POINTS: i64 = 1_200;

/// A two-bedroom coastal listing: a $140/night base rate, 20% off in the
/// off-season window, a weekend premium, and a length-of-stay discount for
/// week-long stays.
pub fn sample_pricing_rule_set() -> PricingRuleSet {
    PricingRuleSet {
        base_price: Money::new(14_000, "USD"),
        date_overrides: HashMap::new(),
        rules: vec![
            PricingRule::Weekend { adjustment: Adjustment::Percentage(1_500) },
            PricingRule::LengthOfStay { min_nights: 7, adjustment: Adjustment::Percentage(-1_000) },
        ],
    }
}

pub fn sample_tax_table() -> TaxTable {
    TaxTable { rate_basis_points: 875 }
}

fn external_property_id_for(channel: Channel) -> String {
    format!("sample-{}", match channel {
        Channel::Airbnb => "airbnb",
        Channel::BookingCom => "booking-com",
        Channel::Expedia => "expedia",
        Channel::FewoDirekt => "fewo-direkt",
        Channel::GoogleVr => "google-vr",
    })
}

/// One connection per supported platform, pre-enabled for sync, with a
/// placeholder API key and webhook secret sealed under `params`'s
/// deployment key. Real onboarding replaces both before the first live sync.
pub fn sample_connections(params: &SeedParams) -> Vec<ChannelConnection> {
    let property_id = sample_property_id();
    Channel::ALL
        .iter()
        .map(|&channel| {
            let credentials = PlatformCredentials { api_key: format!("sample-{channel}-api-key"), webhook_secret: format!("sample-{channel}-webhook-secret") };
            ChannelConnection {
                property_id,
                channel,
                external_property_id: external_property_id_for(channel),
                credentials_sealed: credentials::seal(&params.deployment_key, &credentials),
                sync_enabled: true,
                last_sync_at: None,
                last_error: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_property_id_is_stable_across_calls() {
        assert_eq!(sample_property_id(), sample_property_id());
    }

    #[test]
    fn sample_connections_cover_every_channel_exactly_once() {
        let params = SeedParams::test_default();
        let connections = sample_connections(&params);
        assert_eq!(connections.len(), Channel::ALL.len());
        let mut seen: Vec<Channel> = connections.iter().map(|c| c.channel).collect();
        seen.sort_by_key(|c| format!("{c}"));
        let mut expected: Vec<Channel> = Channel::ALL.to_vec();
        expected.sort_by_key(|c| format!("{c}"));
        assert_eq!(seen, expected);
    }

    #[test]
    fn sample_connections_credentials_unseal_back_to_the_same_values() {
        let params = SeedParams::test_default();
        let connection = &sample_connections(&params)[0];
        let opened = credentials::unseal(&params.deployment_key, &connection.credentials_sealed).unwrap();
        assert!(opened.api_key.starts_with("sample-"));
    }
}
