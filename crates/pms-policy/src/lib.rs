//! Conflict Resolution Policy (C12): deterministic rules for status,
//! availability, and pricing conflicts between the local booking core and
//! a channel platform's view of the same entity.

pub mod conflict;

pub use conflict::{evaluate_new_inbound, resolve_availability_drift, resolve_status_conflict, InboundDecision, PricingResolution, StatusResolution};
