//! Source Functions
//!
//! Adapts user-supplied producers, synchronous or asynchronous, into a
//! uniform asynchronous call whose failures carry the originating key.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::Serialize;

use crate::error::{CacheError, Result};

type Producer = dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

// == Source Function ==
/// A producer of fresh serialized values for an entry.
///
/// Cloning is cheap; clones share the same producer.
#[derive(Clone)]
pub struct SourceFn(Arc<Producer>);

impl SourceFn {
    /// Wraps a synchronous producer.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self(Arc::new(move || future::ready(f()).boxed()))
    }

    /// Wraps an asynchronous producer.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    /// Wraps a synchronous producer of any serializable value, stored as JSON.
    pub fn from_serialize<F, T>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        Self::from_fn(move || Ok(serde_json::to_string(&f()?)?))
    }

    // == Invoke ==
    /// Runs the producer once, without retry or timeout.
    ///
    /// Errors and panics are reported as [`CacheError::SourceFunction`] for `key`.
    pub async fn invoke(&self, key: &str) -> Result<String> {
        let fut = catch_unwind(AssertUnwindSafe(|| (self.0)()))
            .map_err(|panic| CacheError::source_function(key, panic_error(panic)))?;

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::source_function(key, err)),
            Err(panic) => Err(CacheError::source_function(key, panic_error(panic))),
        }
    }
}

impl fmt::Debug for SourceFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SourceFn(..)")
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    anyhow::anyhow!("source function panicked: {}", message)
}
