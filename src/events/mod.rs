//! Events Module
//!
//! Expiry and refetch notifications delivered to global and key-scoped subscribers.

mod bus;
mod event;

pub use bus::{handler, EventBus, EventHandler};
pub use event::{CacheEvent, EventKind};
