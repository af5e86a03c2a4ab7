//! Integration Tests for the Cache API
//!
//! Exercises the public surface end to end: TTL expiry, source functions,
//! auto-refetch, single-flight refetching and event delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use refetch_cache::{
    Cache, CacheError, CacheEvent, Config, EmitPolicy, EventKind, SetOptions, SourceFn,
};

// == Helper Functions ==

type EventLog = Arc<Mutex<Vec<(String, CacheEvent)>>>;

fn counting_source(calls: &Arc<AtomicUsize>) -> SourceFn {
    let calls = calls.clone();
    SourceFn::from_fn(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("v{}", n))
    })
}

/// Records every event of every kind, tagged with the kind name.
fn record_all(cache: &Cache) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    for (kind, label) in [
        (EventKind::Expire, "expire"),
        (EventKind::Refetch, "refetch"),
        (EventKind::RefetchFailure, "refetch-failure"),
    ] {
        let log = log.clone();
        let push = move |event: CacheEvent| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push((label.to_string(), event));
                Ok(())
            }
        };
        match kind {
            EventKind::Expire => cache.on_expiry(push),
            EventKind::Refetch => cache.on_refetch(push),
            EventKind::RefetchFailure => cache.on_refetch_failure(push),
        }
    }
    log
}

fn kinds(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(kind, _)| kind.clone()).collect()
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    // Let fired expiry tasks run to completion
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// == Set / Get ==

#[tokio::test]
async fn test_roundtrip_without_ttl() {
    let cache = Cache::default();

    cache.set(SetOptions::new("k").value("v")).await.unwrap();

    assert!(cache.has("k").await);
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_advances_updated_at_only() {
    let cache = Cache::default();

    cache.set(SetOptions::new("k").value("v1")).await.unwrap();
    let (created, updated) = cache.timestamps("k").unwrap();

    advance_ms(25).await;
    cache.set(SetOptions::new("k").value("v2")).await.unwrap();

    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
    let (created_after, updated_after) = cache.timestamps("k").unwrap();
    assert_eq!(created_after, created);
    assert_eq!(updated_after, updated + 25);
}

#[tokio::test]
async fn test_set_validation_errors() {
    let cache = Cache::default();

    let cases = [
        SetOptions::new("").value("v"),
        SetOptions::new("k"),
        SetOptions::new("k").value("v").ttl_ms(-1),
        SetOptions::new("k").value("v").auto_refetch(true),
    ];
    for options in cases {
        let result = cache.set(options).await;
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let cache = Cache::default();

    assert!(!cache.delete("ghost"));
    cache.set(SetOptions::new("k").value("v")).await.unwrap();
    assert!(cache.delete("k"));
    assert!(!cache.delete("k"));
}

// == TTL Expiry ==

#[tokio::test(start_paused = true)]
async fn test_ttl_never_expires_early() {
    let cache = Cache::default();
    cache
        .set(SetOptions::new("k").value("v").ttl_ms(100))
        .await
        .unwrap();

    advance_ms(100).await;
    assert!(cache.has("k").await);
    assert_eq!(cache.get("k").await.as_deref(), Some("v"));

    advance_ms(1).await;
    assert!(!cache.has("k").await);
    assert!(cache.get("k").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_source_entry_expires_without_reinvoking() {
    let cache = Cache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set(
            SetOptions::new("k")
                .source(counting_source(&calls))
                .ttl_ms(100),
        )
        .await
        .unwrap();

    assert_eq!(cache.get("k").await.as_deref(), Some("v1"));

    advance_ms(101).await;
    assert!(cache.get("k").await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expire_event_waits_until_entry_is_expired() {
    let cache = Cache::default();
    let log = record_all(&cache);
    cache
        .set(SetOptions::new("k").value("v").ttl_ms(100))
        .await
        .unwrap();

    // Exactly at the TTL the entry is still live and nobody is told otherwise
    advance_ms(100).await;
    assert!(kinds(&log).is_empty());
    assert!(cache.has("k").await);

    advance_ms(1).await;
    assert_eq!(kinds(&log), vec!["expire"]);
    assert!(!cache.has("k").await);
}

#[tokio::test(start_paused = true)]
async fn test_expire_events_carry_stale_entry() {
    let cache = Cache::default();
    let log = record_all(&cache);
    cache
        .set(SetOptions::new("k").value("v").ttl_ms(100))
        .await
        .unwrap();

    // The scheduled action fires one millisecond past the TTL and deletes
    advance_ms(101).await;
    assert_eq!(kinds(&log), vec!["expire"]);
    assert!(cache.is_empty());

    // Nothing left to detect
    assert!(cache.get("k").await.is_none());
    assert!(!cache.has("k").await);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let (_, event) = &log[0];
    assert_eq!(event.key, "k");
    assert_eq!(event.value, "v");
    assert_eq!(event.ttl, Some(100));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_reclaimed_without_reads() {
    let cache = Cache::default();
    for i in 0..200 {
        cache
            .set(SetOptions::new(format!("key{}", i)).value("v").ttl_ms(10))
            .await
            .unwrap();
    }
    assert_eq!(cache.len(), 200);

    advance_ms(60 * 60 * 1000).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expirations, 200);
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_spares_entry_rewritten_by_expire_handler() {
    let cache = Cache::default();
    let writer = cache.clone();
    cache
        .on_key_expiry("k", move |_| {
            let writer = writer.clone();
            async move {
                writer.set(SetOptions::new("k").value("fresh")).await?;
                Ok(())
            }
        })
        .unwrap();
    cache
        .set(SetOptions::new("k").value("stale").ttl_ms(10))
        .await
        .unwrap();

    advance_ms(11).await;

    assert_eq!(cache.get("k").await.as_deref(), Some("fresh"));
}

#[tokio::test(start_paused = true)]
async fn test_resetting_ttl_cancels_previous_action() {
    let cache = Cache::default();
    let log = record_all(&cache);

    cache
        .set(SetOptions::new("k").value("v1").ttl_ms(100))
        .await
        .unwrap();
    advance_ms(60).await;
    cache
        .set(SetOptions::new("k").value("v2").ttl_ms(100))
        .await
        .unwrap();

    advance_ms(60).await;
    assert!(kinds(&log).is_empty());
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));

    advance_ms(41).await;
    assert_eq!(kinds(&log), vec!["expire"]);
    assert_eq!(log.lock().unwrap()[0].1.value, "v2");
}

#[tokio::test(start_paused = true)]
async fn test_flush_cancels_scheduled_actions() {
    let cache = Cache::default();
    let log = record_all(&cache);

    for key in ["a", "b", "c"] {
        cache
            .set(SetOptions::new(key).value("v").ttl_ms(50))
            .await
            .unwrap();
    }
    cache.flush();

    advance_ms(100).await;
    assert!(kinds(&log).is_empty());
    assert!(cache.is_empty());
}

// == Auto-Refetch ==

#[tokio::test(start_paused = true)]
async fn test_scheduled_auto_refetch_regenerates_periodically() {
    let cache = Cache::default();
    let log = record_all(&cache);
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set(
            SetOptions::new("k")
                .source(counting_source(&calls))
                .ttl_ms(100)
                .auto_refetch(true),
        )
        .await
        .unwrap();

    advance_ms(101).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(kinds(&log), vec!["expire", "refetch"]);
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));

    advance_ms(101).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cache.get("k").await.as_deref(), Some("v3"));

    let log = log.lock().unwrap();
    assert_eq!(log[0].1.value, "v1");
    assert_eq!(log[1].1.value, "v2");
}

#[tokio::test(start_paused = true)]
async fn test_get_after_expiry_refetches_once() {
    let config = Config {
        rearm_on_refetch: false,
        ..Config::default()
    };
    let cache = Cache::new(config);
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set(
            SetOptions::new("k")
                .source(counting_source(&calls))
                .ttl_ms(100)
                .auto_refetch(true),
        )
        .await
        .unwrap();

    // The scheduled action refetches once just past the TTL; without
    // re-arming, the next expiry is only found lazily.
    advance_ms(101).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    advance_ms(101).await;
    assert_eq!(cache.get("k").await.as_deref(), Some("v3"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_returns_prior_value_when_auto_refetch_fails() {
    let cache = Cache::default();
    let failing = Arc::new(AtomicUsize::new(0));
    let flag = failing.clone();
    let source = SourceFn::from_fn(move || {
        if flag.load(Ordering::SeqCst) > 0 {
            Err(anyhow::anyhow!("upstream down"))
        } else {
            Ok("good".to_string())
        }
    });
    cache
        .set(SetOptions::new("k").source(source).ttl_ms(100).auto_refetch(true))
        .await
        .unwrap();

    failing.store(1, Ordering::SeqCst);
    advance_ms(150).await;

    assert_eq!(cache.get("k").await.as_deref(), Some("good"));
    assert!(cache.stats().refetch_failures >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_counted_once_across_timer_and_reads() {
    let cache = Cache::default();
    let source = SourceFn::from_fn(|| Err(anyhow::anyhow!("upstream down")));
    cache
        .set(
            SetOptions::new("k")
                .value("prior")
                .source(source)
                .ttl_ms(100)
                .auto_refetch(true),
        )
        .await
        .unwrap();

    // The timer sees the expiry first, then reads find the same one
    advance_ms(150).await;
    assert!(!cache.has("k").await);
    assert!(!cache.has("k").await);
    assert_eq!(cache.get("k").await.as_deref(), Some("prior"));

    let stats = cache.stats();
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.refetch_failures, 2);
}

// == Refetch ==

#[tokio::test]
async fn test_concurrent_refetch_single_flight() {
    let cache = Cache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let source = SourceFn::from_async(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("fresh".to_string())
        }
    });
    cache
        .set(SetOptions::new("k").value("stale").source(source))
        .await
        .unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refetch("k").await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k").await.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_refetch_failure_notifies_before_error_returns() {
    let cache = Cache::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let failing = Arc::new(AtomicUsize::new(0));
    let flag = failing.clone();
    let source = SourceFn::from_fn(move || {
        if flag.load(Ordering::SeqCst) > 0 {
            Err(anyhow::anyhow!("upstream down"))
        } else {
            Ok("prior".to_string())
        }
    });
    cache
        .set(SetOptions::new("k").source(source))
        .await
        .unwrap();
    cache
        .on_key_refetch_failure("k", move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event.value);
                Ok(())
            }
        })
        .unwrap();

    failing.store(1, Ordering::SeqCst);
    let err = cache.refetch("k").await.unwrap_err();

    assert_eq!(*seen.lock().unwrap(), vec!["prior".to_string()]);
    assert!(matches!(err, CacheError::SourceFunction { ref key, .. } if key == "k"));
    assert_eq!(cache.get("k").await.as_deref(), Some("prior"));
}

#[tokio::test]
async fn test_refetch_event_carries_new_value() {
    let cache = Cache::default();
    let log = record_all(&cache);
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set(SetOptions::new("k").source(counting_source(&calls)))
        .await
        .unwrap();

    assert!(cache.refetch("k").await.unwrap());

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, "refetch");
    assert_eq!(log[0].1.value, "v2");
}

// == Event Listeners ==

#[tokio::test]
async fn test_key_listeners_and_clearing() {
    let cache = Cache::default();
    let hits = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    for key in ["a", "b"] {
        cache
            .set(SetOptions::new(key).source(counting_source(&calls)))
            .await
            .unwrap();
    }
    let counter = hits.clone();
    cache
        .on_key_refetch("a", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    cache.refetch("b").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    cache.refetch("a").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(matches!(
        cache.clear_event_listeners(None, Some("a")),
        Err(CacheError::ListenerConfig(_))
    ));
    assert!(cache
        .clear_event_listeners(Some(EventKind::Refetch), Some("a"))
        .unwrap());

    cache.refetch("a").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_key_listener_rejects_empty_key() {
    let cache = Cache::default();

    let result = cache.on_key_expiry("", |_| async { Ok(()) });
    assert!(matches!(result, Err(CacheError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn test_handler_errors_do_not_reach_get() {
    let cache = Cache::default();
    cache.on_expiry(|_| async { Err(anyhow::anyhow!("listener broke")) });
    cache
        .set(SetOptions::new("k").value("v").ttl_ms(10))
        .await
        .unwrap();

    advance_ms(11).await;

    assert!(!cache.has("k").await);
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn test_detached_policy_still_delivers() {
    let cache = Cache::new(Config {
        emit_policy: EmitPolicy::Detached,
        ..Config::default()
    });
    let log = record_all(&cache);
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .set(SetOptions::new("k").source(counting_source(&calls)))
        .await
        .unwrap();

    assert!(cache.refetch("k").await.unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(kinds(&log), vec!["refetch"]);
}

#[tokio::test]
async fn test_stats_track_activity() {
    let cache = Cache::default();
    cache.set(SetOptions::new("k").value("v")).await.unwrap();

    cache.get("k").await;
    cache.get("k").await;
    cache.get("missing").await;

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_entries, 1);
}
