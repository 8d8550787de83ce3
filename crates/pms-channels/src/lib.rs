//! Channel Adapter Interface (C8, spec.md §4.7): one `ChannelAdapter`
//! implementation per platform (Airbnb, Booking.com, Expedia, FeWo-direkt,
//! Google Vacation Rentals), plus the registry the dispatcher and ingress
//! use to look one up by `Channel` without matching on it themselves.

pub mod adapter;
pub mod airbnb;
pub mod booking_com;
pub mod credentials;
pub mod expedia;
pub mod fewo_direkt;
pub mod google_vr;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

pub use adapter::{ChannelAdapter, ExternalBookingSnapshot, ParsedInboundEvent, PricePoint, WebhookHeaders};
pub use airbnb::AirbnbAdapter;
pub use booking_com::BookingComAdapter;
pub use credentials::PlatformCredentials;
pub use expedia::ExpediaAdapter;
pub use fewo_direkt::FewoDirektAdapter;
pub use google_vr::GoogleVrAdapter;

use pms_core::Channel;

/// Holds one boxed adapter per platform so callers look one up by `Channel`
/// rather than matching on it at every call site (spec.md §4.7: "the core
/// never references a platform's specifics directly").
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    /// Build the registry with the workspace's compile-time-closed set of
    /// five platforms (spec.md §9: "platform list is closed at compile
    /// time"), sharing one `reqwest::Client` across adapters.
    pub fn new(deployment_key: [u8; 32]) -> Self {
        Self::with_client(reqwest::Client::new(), deployment_key)
    }

    /// Build the registry sharing a caller-supplied `reqwest::Client`
    /// instead of the default one — tests use this to bound connect
    /// timeouts so an adapter call that unexpectedly reaches the network
    /// fails fast rather than hanging.
    pub fn with_client(client: reqwest::Client, deployment_key: [u8; 32]) -> Self {
        let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(Channel::Airbnb, Arc::new(AirbnbAdapter::new(client.clone(), deployment_key)));
        adapters.insert(Channel::BookingCom, Arc::new(BookingComAdapter::new(client.clone(), deployment_key)));
        adapters.insert(Channel::Expedia, Arc::new(ExpediaAdapter::new(client.clone(), deployment_key)));
        adapters.insert(Channel::FewoDirekt, Arc::new(FewoDirektAdapter::new(client.clone(), deployment_key)));
        adapters.insert(Channel::GoogleVr, Arc::new(GoogleVrAdapter::new(client, deployment_key)));
        Self { adapters }
    }

    pub fn get(&self, channel: Channel) -> Arc<dyn ChannelAdapter> {
        self.adapters.get(&channel).cloned().expect("AdapterRegistry::new registers every Channel variant")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_channel() {
        let registry = AdapterRegistry::new([0u8; 32]);
        for channel in Channel::ALL {
            assert_eq!(registry.get(channel).channel(), channel);
        }
    }
}
