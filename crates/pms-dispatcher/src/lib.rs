//! Outbound Sync Dispatcher (C9, spec.md §4.8).
//!
//! Drains `pms-store`'s outbox, running each claimed delivery through the
//! idempotency/circuit/rate-limit/adapter pipeline in [`pipeline`] and
//! partitioning work by entity for ordering in [`worker`].

pub mod config;
pub mod pipeline;
pub mod worker;

pub use config::DispatcherConfig;
pub use pipeline::dispatch_one;
pub use worker::Dispatcher;
