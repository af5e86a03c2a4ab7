//! Set Options
//!
//! Arguments for [`Cache::set`](crate::cache::Cache::set).

use crate::cache::SourceFn;
use crate::error::{CacheError, Result};

/// Builder describing one `set` call.
///
/// # Example
/// ```ignore
/// let options = SetOptions::new("rates")
///     .source(SourceFn::from_fn(|| Ok(load_rates()?)))
///     .ttl_ms(60_000)
///     .auto_refetch(true);
/// cache.set(options).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SetOptions {
    pub key: String,
    pub value: Option<String>,
    /// TTL in milliseconds; signed so that negative input can be rejected
    pub ttl_ms: Option<i64>,
    pub auto_refetch: Option<bool>,
    pub source: Option<SourceFn>,
}

impl SetOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl_ms: None,
            auto_refetch: None,
            source: None,
        }
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn auto_refetch(mut self, auto_refetch: bool) -> Self {
        self.auto_refetch = Some(auto_refetch);
        self
    }

    pub fn source(mut self, source: SourceFn) -> Self {
        self.source = Some(source);
        self
    }

    /// Checks the arguments before anything is written.
    ///
    /// Consumes the options and splits them into what `set` needs: where the
    /// initial value comes from and the validated TTL in milliseconds.
    pub(crate) fn validate(self) -> Result<ValidatedSet> {
        if self.key.is_empty() {
            return Err(CacheError::Validation("Key cannot be empty".to_string()));
        }

        let initial = match (self.value, &self.source) {
            (Some(value), _) => InitialValue::Literal(value),
            (None, Some(source)) => InitialValue::Produce(source.clone()),
            (None, None) => {
                return Err(CacheError::Validation(format!(
                    "Either a value or a source function is required for key '{}'",
                    self.key
                )));
            }
        };

        let ttl = match self.ttl_ms {
            Some(ttl) if ttl < 0 => {
                return Err(CacheError::Validation(format!(
                    "TTL cannot be negative (got {} ms)",
                    ttl
                )));
            }
            Some(ttl) => Some(ttl as u64),
            None => None,
        };

        let auto_refetch = self.auto_refetch.unwrap_or(false);
        if auto_refetch && ttl.is_none() {
            return Err(CacheError::Validation(
                "Auto-refetch requires a TTL".to_string(),
            ));
        }

        Ok(ValidatedSet {
            key: self.key,
            initial,
            ttl,
            auto_refetch,
            source: self.source,
        })
    }
}

/// Where the value written by `set` comes from.
pub(crate) enum InitialValue {
    Literal(String),
    /// Invoke the entry's source function once
    Produce(SourceFn),
}

/// `SetOptions` that passed validation.
pub(crate) struct ValidatedSet {
    pub key: String,
    pub initial: InitialValue,
    pub ttl: Option<u64>,
    pub auto_refetch: bool,
    pub source: Option<SourceFn>,
}
