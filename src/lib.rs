//! Refetch Cache - A process-local keyed cache
//!
//! Stores serialized values under string keys with optional TTLs, derives or
//! regenerates values from source functions with single-flight refetching,
//! and notifies subscribers about expiries and refetches.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
mod lock;
pub mod tasks;

pub use cache::{Cache, CacheStats, SetOptions, SourceFn};
pub use config::{Config, EmitPolicy};
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventKind};
