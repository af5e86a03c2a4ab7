//! Event Bus
//!
//! Typed publish/subscribe registry keyed by event kind and optional entry key.
//!
//! On emission, global subscribers run before key-scoped subscribers, each
//! group in subscription order. Handlers are asynchronous and, under
//! [`EmitPolicy::Await`], the emitter waits for every handler in turn.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::EmitPolicy;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventKind};
use crate::lock::mutex_lock;

const SOURCE: &str = "events::bus";

/// A subscription callback.
pub type EventHandler =
    Arc<dyn Fn(CacheEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wraps an async closure into an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

#[derive(Default)]
struct Registry {
    global: HashMap<EventKind, Vec<EventHandler>>,
    keyed: HashMap<EventKind, HashMap<String, Vec<EventHandler>>>,
}

impl Registry {
    fn is_empty(&self) -> bool {
        self.global.values().all(Vec::is_empty)
            && self
                .keyed
                .values()
                .all(|by_key| by_key.values().all(Vec::is_empty))
    }
}

// == Event Bus ==
/// Registry of subscribers for cache events.
pub struct EventBus {
    registry: Mutex<Registry>,
    policy: EmitPolicy,
}

impl EventBus {
    // == Constructor ==
    pub fn new(policy: EmitPolicy) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            policy,
        }
    }

    // == Subscribe ==
    /// Registers a handler fired for every key.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        mutex_lock(&self.registry, SOURCE, "subscribe")
            .global
            .entry(kind)
            .or_default()
            .push(handler);
        debug!(%kind, "Global listener registered");
    }

    /// Registers a handler fired only for `key`.
    pub fn subscribe_key(&self, kind: EventKind, key: &str, handler: EventHandler) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::Validation(
                "Listener key cannot be empty".to_string(),
            ));
        }

        mutex_lock(&self.registry, SOURCE, "subscribe_key")
            .keyed
            .entry(kind)
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(handler);
        debug!(%kind, key, "Key listener registered");
        Ok(())
    }

    // == Clear ==
    /// Removes listeners selected by `kind` and `key`.
    ///
    /// - neither: every listener
    /// - kind only: global and key-scoped listeners of that kind
    /// - kind and key: key-scoped listeners of that kind for that key
    /// - key only: rejected with [`CacheError::ListenerConfig`]
    ///
    /// Returns whether any listener was removed.
    pub fn clear(&self, kind: Option<EventKind>, key: Option<&str>) -> Result<bool> {
        match (kind, key) {
            (None, None) => Ok(self.clear_all()),
            (Some(kind), None) => Ok(self.clear_kind(kind)),
            (Some(kind), Some(key)) => {
                if key.is_empty() {
                    return Err(CacheError::Validation(
                        "Listener key cannot be empty".to_string(),
                    ));
                }
                Ok(self.clear_key(kind, key))
            }
            (None, Some(key)) => Err(CacheError::ListenerConfig(format!(
                "An event kind is required to clear listeners for key '{}'",
                key
            ))),
        }
    }

    pub fn clear_all(&self) -> bool {
        let mut registry = mutex_lock(&self.registry, SOURCE, "clear_all");
        let removed = !registry.is_empty();
        *registry = Registry::default();
        removed
    }

    pub fn clear_kind(&self, kind: EventKind) -> bool {
        let mut registry = mutex_lock(&self.registry, SOURCE, "clear_kind");
        let global = registry
            .global
            .remove(&kind)
            .is_some_and(|handlers| !handlers.is_empty());
        let keyed = registry
            .keyed
            .remove(&kind)
            .is_some_and(|by_key| by_key.values().any(|handlers| !handlers.is_empty()));
        global || keyed
    }

    pub fn clear_key(&self, kind: EventKind, key: &str) -> bool {
        let mut registry = mutex_lock(&self.registry, SOURCE, "clear_key");
        registry
            .keyed
            .get_mut(&kind)
            .and_then(|by_key| by_key.remove(key))
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Number of listeners registered for `kind`, globally or for `key`.
    pub fn listener_count(&self, kind: EventKind, key: Option<&str>) -> usize {
        let registry = mutex_lock(&self.registry, SOURCE, "listener_count");
        match key {
            None => registry.global.get(&kind).map_or(0, Vec::len),
            Some(key) => registry
                .keyed
                .get(&kind)
                .and_then(|by_key| by_key.get(key))
                .map_or(0, Vec::len),
        }
    }

    // == Emit ==
    /// Delivers `event` to the global then key-scoped listeners of `kind`.
    ///
    /// Under [`EmitPolicy::Await`] the first handler error stops delivery and
    /// is returned. Under [`EmitPolicy::Detached`] delivery happens on a
    /// spawned task and errors are only logged.
    pub async fn emit(&self, kind: EventKind, event: CacheEvent) -> Result<()> {
        let handlers = self.handlers_for(kind, &event.key);
        if handlers.is_empty() {
            return Ok(());
        }

        debug!(%kind, key = %event.key, listeners = handlers.len(), "Emitting cache event");

        match self.policy {
            EmitPolicy::Await => run_handlers(handlers, event)
                .await
                .map_err(CacheError::EventHandler),
            EmitPolicy::Detached => {
                tokio::spawn(async move {
                    let key = event.key.clone();
                    if let Err(err) = run_handlers(handlers, event).await {
                        warn!(%kind, key = %key, error = %err, "Detached event handler failed");
                    }
                });
                Ok(())
            }
        }
    }

    /// Snapshot of the handlers to run, so no lock is held while they execute.
    fn handlers_for(&self, kind: EventKind, key: &str) -> Vec<EventHandler> {
        let registry = mutex_lock(&self.registry, SOURCE, "handlers_for");
        let global = registry.global.get(&kind).into_iter().flatten();
        let keyed = registry
            .keyed
            .get(&kind)
            .and_then(|by_key| by_key.get(key))
            .into_iter()
            .flatten();
        global.chain(keyed).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EmitPolicy::default())
    }
}

async fn run_handlers(handlers: Vec<EventHandler>, event: CacheEvent) -> anyhow::Result<()> {
    for handler in handlers {
        handler(event.clone()).await?;
    }
    Ok(())
}
