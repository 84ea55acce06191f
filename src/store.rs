//! Cached call store.
//!
//! [`CallStore`] owns the in-memory copy of the processed call collection
//! and rebuilds it from its [`RecordSource`] whenever the source reports
//! the cache as stale. The check-stale → reload → install sequence runs
//! under a single async mutex, so concurrent requests never reload twice
//! and the records and timestamp are always replaced together.
//!
//! # Failure behaviour
//!
//! | Failure | [`load_calls`](CallStore::load_calls) | [`refresh`](CallStore::refresh) |
//! |---------|------------|-----------|
//! | Backing blob unreadable | empty, cache untouched | `Err(StorageUnavailable)` |
//! | Blob is not a JSON array | empty, cache untouched | `Err(MalformedStore)` |
//! | Individual record invalid | record skipped | record skipped |

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;
use crate::error::CallError;
use crate::models::CallRecord;
use crate::processor;
use crate::source::{self, RecordSource};

struct CacheEntry {
    calls: Arc<Vec<CallRecord>>,
    cached_at: SystemTime,
    /// Sorted company list, computed on first use for this generation.
    companies: Option<Arc<Vec<String>>>,
}

pub struct CallStore {
    source: Arc<dyn RecordSource>,
    cache: Mutex<Option<CacheEntry>>,
}

impl CallStore {
    /// Create an empty store. Nothing is read until the first access.
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Create a store for the source selected by `config`.
    ///
    /// Fails fast with [`CallError::Configuration`] when running in
    /// local-file mode and the file is missing.
    pub fn from_config(config: &StorageConfig) -> Result<Self, CallError> {
        let source = source::from_config(config)?;
        info!(source = %source.describe(), "call store configured");
        Ok(Self::new(source))
    }

    pub fn describe_source(&self) -> String {
        self.source.describe()
    }

    /// Return the current call collection, reloading it first if stale.
    ///
    /// Load failures are logged and yield an empty collection for this call
    /// only; the next call retries.
    pub async fn load_calls(&self) -> Arc<Vec<CallRecord>> {
        let mut cache = self.cache.lock().await;
        match self.fresh_entry(&mut *cache).await {
            Some(entry) => entry.calls.clone(),
            None => Arc::new(Vec::new()),
        }
    }

    /// Drop the cache and reload synchronously.
    ///
    /// Returns the number of calls loaded.
    pub async fn refresh(&self) -> Result<usize, CallError> {
        let mut cache = self.cache.lock().await;
        *cache = None;
        self.reload(&mut *cache).await?;
        Ok(cache.as_ref().map(|e| e.calls.len()).unwrap_or(0))
    }

    /// Sorted, deduplicated union of every loaded call's companies.
    ///
    /// Memoised per cache generation: any reload discards the memo.
    pub async fn unique_companies(&self) -> Arc<Vec<String>> {
        let mut cache = self.cache.lock().await;
        let Some(entry) = self.fresh_entry(&mut *cache).await else {
            return Arc::new(Vec::new());
        };
        let calls = entry.calls.clone();
        entry
            .companies
            .get_or_insert_with(|| {
                let companies: BTreeSet<&str> = calls
                    .iter()
                    .flat_map(|call| call.companies.iter().map(String::as_str))
                    .collect();
                debug!(count = companies.len(), "computed unique companies");
                Arc::new(companies.into_iter().map(str::to_string).collect())
            })
            .clone()
    }

    async fn fresh_entry<'a>(
        &self,
        cache: &'a mut Option<CacheEntry>,
    ) -> Option<&'a mut CacheEntry> {
        let stale = match cache.as_ref() {
            Some(entry) => self.source.is_stale(entry.cached_at).await,
            None => true,
        };

        if stale {
            if let Err(e) = self.reload(cache).await {
                error!(source = %self.source.describe(), error = %e, "Error loading calls");
                return None;
            }
        } else {
            debug!("Using cached calls data");
        }
        cache.as_mut()
    }

    async fn reload(&self, cache: &mut Option<CacheEntry>) -> Result<(), CallError> {
        // Taken before reading so a write racing the read marks the new cache stale.
        let started_at = SystemTime::now();
        info!(source = %self.source.describe(), "Loading calls");

        let text = self.source.read_raw().await?;
        let values: Vec<Value> =
            serde_json::from_str(&text).map_err(|e| CallError::MalformedStore(e.to_string()))?;

        let total = values.len();
        let calls: Vec<CallRecord> = values
            .into_iter()
            .filter_map(|value| {
                let id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                match processor::process(value) {
                    Ok(call) => Some(call),
                    Err(e) => {
                        warn!(call_id = %id, error = %e, "Error processing call, skipping");
                        None
                    }
                }
            })
            .collect();

        info!(
            loaded = calls.len(),
            skipped = total - calls.len(),
            "Successfully loaded calls"
        );

        *cache = Some(CacheEntry {
            calls: Arc::new(calls),
            cached_at: started_at,
            companies: None,
        });
        Ok(())
    }
}
