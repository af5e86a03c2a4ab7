//! Refetch Coordinator
//!
//! Single-flight regeneration of an entry from its source function.
//!
//! The `fetching` flag is checked and set inside the store's critical
//! section, before the producer is first polled, so concurrent callers on
//! any thread observe it and back off with `Ok(false)`. Results are written
//! back only if the entry is still the write the refetch started from.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::engine::Inner;
use crate::error::Result;
use crate::events::EventKind;

/// Clears `fetching` if the refetch future is dropped before completing.
struct FetchGuard<'a> {
    inner: &'a Inner,
    key: &'a str,
    generation: u64,
    armed: bool,
}

impl FetchGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut store = self.inner.lock("refetch_cancelled");
        if let Some(entry) = store.get_current_mut(self.key, self.generation) {
            entry.fetching = false;
        }
        debug!(key = self.key, "Refetch abandoned before completion");
    }
}

impl Inner {
    // == Refetch ==
    pub(crate) async fn refetch(self: &Arc<Self>, key: &str) -> Result<bool> {
        let (source, prior, generation) = {
            let mut store = self.lock("refetch");
            let Some(entry) = store.get_mut(key) else {
                debug!(key, "Refetch skipped: unknown key");
                return Ok(false);
            };
            let Some(source) = entry.source.clone() else {
                debug!(key, "Refetch skipped: no source function");
                return Ok(false);
            };
            if entry.fetching {
                debug!(key, "Refetch skipped: already in flight");
                return Ok(false);
            }
            entry.fetching = true;
            (source, entry.snapshot(key), entry.generation)
        };

        let guard = FetchGuard {
            inner: self,
            key,
            generation,
            armed: true,
        };
        debug!(key, generation, "Refetch started");

        match source.invoke(key).await {
            Ok(value) => {
                let refreshed = {
                    let mut store = self.lock("refetch_success");
                    let now = self.now();
                    match store.get_current_mut(key, generation) {
                        Some(entry) => {
                            entry.value = value;
                            entry.updated_at = now.max(entry.updated_at);
                            entry.fetching = false;
                            let event = entry.snapshot(key);
                            if self.config.rearm_on_refetch {
                                if let Some(ttl) = entry.ttl {
                                    entry.cancel_expiry();
                                    entry.expiry =
                                        Some(self.arm_expiry(key, generation, ttl, event.clone()));
                                }
                            }
                            store.stats_mut().record_refetch();
                            Some(event)
                        }
                        None => None,
                    }
                };
                guard.disarm();

                let Some(event) = refreshed else {
                    debug!(key, generation, "Refetch result discarded: entry replaced or removed");
                    return Ok(false);
                };

                info!(key, updated_at = event.updated_at, "Refetch succeeded");
                self.events.emit(EventKind::Refetch, event).await?;
                Ok(true)
            }
            Err(err) => {
                {
                    let mut store = self.lock("refetch_failure");
                    if let Some(entry) = store.get_current_mut(key, generation) {
                        entry.fetching = false;
                    }
                    store.stats_mut().record_refetch_failure();
                }
                guard.disarm();

                warn!(key, error = %err, "Refetch failed; prior value kept");
                self.emit_shielded(EventKind::RefetchFailure, prior).await;
                Err(err)
            }
        }
    }
}
