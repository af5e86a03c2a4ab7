//! Refetch Cache demo
//!
//! Runs a cache with one periodically regenerated entry and one static entry,
//! logging every expiry and refetch until interrupted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refetch_cache::{Cache, Config, SetOptions, SourceFn};

/// TTL of the regenerated demo entry, in milliseconds
const TICKER_TTL_MS: i64 = 3_000;

/// Main entry point for the demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache and register event listeners
/// 4. Store a static entry and an auto-refetching entry
/// 5. Poll both entries once per second
/// 6. Dispose of the cache on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refetch_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Refetch Cache demo");

    let config = Config::from_env();
    info!(
        "Configuration loaded: emit_policy={:?}, rearm_on_refetch={}",
        config.emit_policy, config.rearm_on_refetch
    );

    let cache = Cache::new(config);

    cache.on_expiry(|event| async move {
        info!(key = %event.key, value = %event.value, "Entry expired");
        Ok(())
    });
    cache.on_refetch(|event| async move {
        info!(key = %event.key, value = %event.value, updated_at = event.updated_at, "Entry refetched");
        Ok(())
    });
    cache.on_refetch_failure(|event| async move {
        warn!(key = %event.key, prior = %event.value, "Entry refetch failed");
        Ok(())
    });

    let ticks = Arc::new(AtomicU64::new(0));
    let counter = ticks.clone();
    let ticker = SourceFn::from_serialize(move || {
        let tick = counter.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "tick": tick }))
    });

    cache
        .set(SetOptions::new("greeting").value("hello"))
        .await?;
    cache
        .set(
            SetOptions::new("ticker")
                .source(ticker)
                .ttl_ms(TICKER_TTL_MS)
                .auto_refetch(true),
        )
        .await?;
    info!("Demo entries stored");

    let poller = {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let greeting = cache.get("greeting").await;
                let ticker = cache.get("ticker").await;
                info!(?greeting, ?ticker, stats = ?cache.stats(), "Poll");
            }
        })
    };

    shutdown_signal().await;

    poller.abort();
    cache.dispose();
    info!("Demo shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
