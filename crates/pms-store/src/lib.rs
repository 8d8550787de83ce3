//! Inventory Store (C6), Booking Core (C7), and Event Log / Outbox (C5):
//! the sled-backed persistence and orchestration layer every other crate in
//! the workspace ultimately reads from or writes through.

pub mod db;
pub mod engine;
pub mod inventory;
pub mod model;
pub mod outbox;
pub mod pricing;

pub use db::PmsDb;
pub use engine::BookingEngine;
pub use inventory::Inventory;
pub use model::{CheckoutSession, ChannelConnection, Delivery, DeliveryState, IdempotencyRecord, Origin, OutboundEvent, OutboundEventKind};
pub use outbox::{Outbox, SettleOutcome};
pub use pricing::{quote, Adjustment, PricingRule, PricingRuleSet, Quote, TaxTable};
