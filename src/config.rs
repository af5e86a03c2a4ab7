//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::str::FromStr;

// == Emit Policy ==
/// How the event bus runs subscription handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitPolicy {
    /// Handlers run in order and the emitting operation waits for each one.
    #[default]
    Await,
    /// Handlers run in order on a spawned task; the emitter does not wait.
    Detached,
}

impl FromStr for EmitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "await" | "awaited" => Ok(EmitPolicy::Await),
            "detached" | "fire-and-forget" => Ok(EmitPolicy::Detached),
            other => Err(format!("unknown emit policy: {}", other)),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether event handlers are awaited by the operation that emits them
    pub emit_policy: EmitPolicy,
    /// Whether a successful refetch arms a fresh expiry action for the entry's TTL
    pub rearm_on_refetch: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_EMIT_POLICY` - `await` or `detached` (default: await)
    /// - `CACHE_REARM_ON_REFETCH` - `true` or `false` (default: true)
    pub fn from_env() -> Self {
        Self {
            emit_policy: env::var("CACHE_EMIT_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            rearm_on_refetch: env::var("CACHE_REARM_ON_REFETCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emit_policy: EmitPolicy::Await,
            rearm_on_refetch: true,
        }
    }
}
