//! Inbound Webhook Ingress (C10, spec.md §4.9): the admission pipeline a
//! platform's webhook call is run through before it becomes a write against
//! the Booking Core.
//!
//! This crate stops exactly where the spec says it stops: it has no opinion
//! about HTTP framing, routing, or TLS. A transport binds to [`admit_webhook`]
//! by handing it a channel tag, a [`pms_channels::WebhookHeaders`] view, and
//! a body; everything downstream of "here is one already-routed webhook
//! call" lives here.

pub mod pipeline;

pub use pipeline::{admit_webhook, IngressError, IngressOutcome};
