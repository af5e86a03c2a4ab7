//! Background Tasks Module
//!
//! Contains the deferred tasks the cache arms on behalf of its entries.
//!
//! # Tasks
//! - Expiry: fires once per TTL-bearing entry unless cancelled or replaced

mod expiry;

pub use expiry::{schedule_expiry, ScheduledExpiry};
