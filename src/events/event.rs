//! Event Types
//!
//! Event kinds and the payload delivered to subscribers.

use std::fmt;

use serde::Serialize;

// == Event Kind ==
/// Kinds of notifications the cache emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// An entry was found (or fired) past its TTL
    Expire,
    /// A refetch produced and stored a fresh value
    Refetch,
    /// A refetch failed; the prior value was kept
    RefetchFailure,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 3] = [
        EventKind::Expire,
        EventKind::Refetch,
        EventKind::RefetchFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Expire => "expire",
            EventKind::Refetch => "refetch",
            EventKind::RefetchFailure => "refetch-failure",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Cache Event ==
/// Snapshot of an entry at the moment an event is emitted.
///
/// `value` is the pre-refetch value for `expire` and `refetch-failure`,
/// and the freshly stored value for `refetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    pub key: String,
    pub value: String,
    /// TTL in milliseconds, if the entry has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Milliseconds since the cache's epoch
    pub created_at: u64,
    /// Milliseconds since the cache's epoch
    pub updated_at: u64,
}
