//! Distributed lock manager (C2): named, fenced, TTL-bounded locks with a
//! scoped `with_lock` guard. Used by the booking core to serialize a
//! property's calendar during checkout and by the inbound ingress to
//! serialize webhook-driven writes against the same property.

pub mod lock;

pub use lock::{LockError, LockHandle, LockManager};
