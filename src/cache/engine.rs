//! Cache Engine
//!
//! The public [`Cache`] handle: entry lifecycle, expiry detection and event
//! subscriptions on top of the synchronous [`CacheStore`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::options::{InitialValue, ValidatedSet};
use crate::cache::{CacheEntry, CacheStats, CacheStore, Clock, SetOptions};
use crate::config::Config;
use crate::error::Result;
use crate::events::{handler, CacheEvent, EventBus, EventKind};
use crate::lock::mutex_lock;
use crate::tasks::{schedule_expiry, ScheduledExpiry};

const SOURCE: &str = "cache::engine";

// == Inner State ==
/// State shared by every clone of a [`Cache`] and by its expiry tasks.
pub(crate) struct Inner {
    store: Mutex<CacheStore>,
    pub(crate) events: EventBus,
    clock: Clock,
    pub(crate) config: Config,
}

impl Inner {
    pub(crate) fn lock(&self, op: &'static str) -> MutexGuard<'_, CacheStore> {
        mutex_lock(&self.store, SOURCE, op)
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Arms the expiry action for the write tagged `generation`.
    ///
    /// `snapshot` is the entry as of arming and becomes the `expire` payload.
    /// The action fires on the first millisecond past `updated_at + ttl`,
    /// the same instant [`CacheEntry::is_expired`] starts reporting true.
    pub(crate) fn arm_expiry(
        self: &Arc<Self>,
        key: &str,
        generation: u64,
        ttl: u64,
        snapshot: CacheEvent,
    ) -> ScheduledExpiry {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        debug!(key = %key, generation, ttl_ms = ttl, "Arming expiry action");
        schedule_expiry(Duration::from_millis(ttl.saturating_add(1)), move || {
            Inner::expiry_fired(weak, key, generation, snapshot).boxed()
        })
    }

    async fn expiry_fired(weak: Weak<Self>, key: String, generation: u64, snapshot: CacheEvent) {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let refetch = {
            let mut store = inner.lock("expiry_fired");
            let Some(entry) = store.get_current_mut(&key, generation) else {
                debug!(key = %key, generation, "Expiry fired for a replaced entry");
                return;
            };
            // Detach ourselves first: dropping the handle would abort this task.
            if let Some(expiry) = entry.expiry.take() {
                expiry.disarm();
            }
            let refetch = entry.refetches_on_expiry();
            if entry.mark_expired() {
                store.stats_mut().record_expiration();
            }
            refetch
        };

        inner.emit_shielded(EventKind::Expire, snapshot).await;

        if !refetch {
            // A handler may have overwritten the key; only the expired write goes.
            if inner.lock("expiry_reclaim").remove_current(&key, generation) {
                debug!(key = %key, generation, "Expired entry reclaimed");
            }
            return;
        }

        if let Err(err) = inner.refetch(&key).await {
            warn!(key = %key, error = %err, "Scheduled refetch failed");
        }
    }

    /// Emits an event, logging handler failures instead of returning them.
    pub(crate) async fn emit_shielded(&self, kind: EventKind, event: CacheEvent) {
        let key = event.key.clone();
        if let Err(err) = self.events.emit(kind, event).await {
            warn!(%kind, key = %key, error = %err, "Event handler failed");
        }
    }
}

// == Cache ==
/// A process-local keyed cache with TTLs, source functions and events.
///
/// Cloning is cheap and clones share the same entries and subscriptions.
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    // == Constructor ==
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(CacheStore::new()),
                events: EventBus::new(config.emit_policy),
                clock: Clock::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // == Set ==
    /// Stores an entry, overwriting any previous one for the key.
    ///
    /// Without a value, the source function is invoked to produce the
    /// initial one; if it fails nothing is written. Any previous expiry
    /// action for the key is cancelled and a new one armed when a TTL is given.
    pub async fn set(&self, options: SetOptions) -> Result<()> {
        let ValidatedSet {
            key,
            initial,
            ttl,
            auto_refetch,
            source,
        } = options.validate()?;

        let value = match initial {
            InitialValue::Literal(value) => value,
            InitialValue::Produce(producer) => producer.invoke(&key).await?,
        };

        let mut store = self.inner.lock("set");
        let now = self.inner.now();
        let generation = store.next_generation();

        let mut entry = CacheEntry::new(value, now, ttl);
        entry.created_at = store.get(&key).map_or(now, |previous| previous.created_at);
        entry.auto_refetch = auto_refetch;
        entry.source = source;
        entry.generation = generation;
        if let Some(ttl) = ttl {
            let snapshot = entry.snapshot(&key);
            entry.expiry = Some(self.inner.arm_expiry(&key, generation, ttl, snapshot));
        }

        debug!(key = %key, generation, ttl_ms = ?ttl, "Entry stored");
        store.insert(key, entry);
        Ok(())
    }

    // == Get ==
    /// Retrieves a live value by key.
    ///
    /// An expired entry emits `expire`; it is then deleted, or refetched when
    /// it has a source function and auto-refetch. After a refetch attempt the
    /// entry's current value is returned (the prior one if the refetch failed
    /// or another was already in flight).
    pub async fn get(&self, key: &str) -> Option<String> {
        let (snapshot, generation, refetch) = {
            let mut store = self.inner.lock("get");
            let now = self.inner.now();
            let Some(entry) = store.get_mut(key) else {
                store.stats_mut().record_miss();
                return None;
            };

            if !entry.is_expired(now) {
                let value = entry.value.clone();
                store.stats_mut().record_hit();
                return Some(value);
            }

            let found = (entry.snapshot(key), entry.generation, entry.refetches_on_expiry());
            if entry.mark_expired() {
                store.stats_mut().record_expiration();
            }
            found
        };

        debug!(key, generation, "Expired entry found by get");
        self.inner.emit_shielded(EventKind::Expire, snapshot).await;

        if !refetch {
            let mut store = self.inner.lock("get_expired");
            store.remove_current(key, generation);
            store.stats_mut().record_miss();
            return None;
        }

        if let Err(err) = self.inner.refetch(key).await {
            warn!(key, error = %err, "Refetch on read failed");
        }

        let mut store = self.inner.lock("get_refetched");
        let value = store.get(key).map(|entry| entry.value.clone());
        if value.is_some() {
            store.stats_mut().record_hit();
        } else {
            store.stats_mut().record_miss();
        }
        value
    }

    // == Has ==
    /// Reports whether a live entry exists for `key`.
    ///
    /// Unlike [`get`](Self::get), an expired entry is left in place: `expire`
    /// is emitted and `false` returned, and resolution is left to a later
    /// `get` or `refetch`.
    pub async fn has(&self, key: &str) -> bool {
        let snapshot = {
            let mut store = self.inner.lock("has");
            let now = self.inner.now();
            let (snapshot, first_seen) = match store.get_mut(key) {
                None => return false,
                Some(entry) if !entry.is_expired(now) => return true,
                Some(entry) => (entry.snapshot(key), entry.mark_expired()),
            };
            if first_seen {
                store.stats_mut().record_expiration();
            }
            snapshot
        };

        debug!(key, "Expired entry found by has");
        self.inner.emit_shielded(EventKind::Expire, snapshot).await;
        false
    }

    // == Delete ==
    /// Removes an entry, cancelling its expiry action.
    ///
    /// Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.lock("delete").remove(key);
        debug!(key, removed, "Delete");
        removed
    }

    // == Flush ==
    /// Cancels every expiry action and removes every entry.
    pub fn flush(&self) {
        let removed = self.inner.lock("flush").clear();
        info!(removed, "Cache flushed");
    }

    /// Flushes the cache and drops every event subscription.
    pub fn dispose(&self) {
        self.flush();
        self.inner.events.clear_all();
        info!("Cache disposed");
    }

    // == Refetch ==
    /// Regenerates the value for `key` from its source function.
    ///
    /// Returns `Ok(false)` without invoking anything when the key is unknown,
    /// has no source function, or already has a refetch in flight.
    pub async fn refetch(&self, key: &str) -> Result<bool> {
        self.inner.refetch(key).await
    }

    // == JSON Helpers ==
    /// Stores `value` encoded as JSON.
    pub async fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl_ms: Option<i64>,
    ) -> Result<()> {
        let mut options = SetOptions::new(key).value(serde_json::to_string(value)?);
        options.ttl_ms = ttl_ms;
        self.set(options).await
    }

    /// Retrieves and decodes a JSON value stored under `key`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // == Subscriptions ==
    pub fn on_expiry<F, Fut>(&self, f: F)
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.events.subscribe(EventKind::Expire, handler(f));
    }

    pub fn on_key_expiry<F, Fut>(&self, key: &str, f: F) -> Result<()>
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_key(EventKind::Expire, key, handler(f))
    }

    pub fn on_refetch<F, Fut>(&self, f: F)
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.events.subscribe(EventKind::Refetch, handler(f));
    }

    pub fn on_key_refetch<F, Fut>(&self, key: &str, f: F) -> Result<()>
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_key(EventKind::Refetch, key, handler(f))
    }

    pub fn on_refetch_failure<F, Fut>(&self, f: F)
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe(EventKind::RefetchFailure, handler(f));
    }

    pub fn on_key_refetch_failure<F, Fut>(&self, key: &str, f: F) -> Result<()>
    where
        F: Fn(CacheEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_key(EventKind::RefetchFailure, key, handler(f))
    }

    /// Removes listeners; see [`EventBus::clear`] for the selection rules.
    pub fn clear_event_listeners(
        &self,
        kind: Option<EventKind>,
        key: Option<&str>,
    ) -> Result<bool> {
        self.inner.events.clear(kind, key)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock("stats").stats()
    }

    pub fn len(&self) -> usize {
        self.inner.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock("is_empty").is_empty()
    }

    /// Whether a refetch is currently outstanding for `key`.
    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner
            .lock("is_fetching")
            .get(key)
            .is_some_and(CacheEntry::is_fetching)
    }

    /// Timestamps `(created_at, updated_at)` of the entry, without expiry checks.
    pub fn timestamps(&self, key: &str) -> Option<(u64, u64)> {
        self.inner
            .lock("timestamps")
            .get(key)
            .map(|entry| (entry.created_at, entry.updated_at))
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
