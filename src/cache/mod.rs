//! Cache Module
//!
//! Provides the keyed cache: entries with TTL expiry, source functions with
//! single-flight refetching, and expiry/refetch notifications.

mod engine;
mod entry;
mod options;
mod refetch;
mod source;
mod stats;
mod store;


// Re-export public types
pub use engine::Cache;
pub use entry::{CacheEntry, Clock};
pub use options::SetOptions;
pub use source::SourceFn;
pub use stats::CacheStats;
pub use store::CacheStore;
