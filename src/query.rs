//! Read-only queries over the loaded call collection.
//!
//! Used by both the HTTP handlers and the CLI. Every operation goes through
//! [`CallStore::load_calls`], so a stale cache is rebuilt before answering.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{CallRecord, CallSummary};
use crate::processor::parse_iso_datetime;
use crate::store::CallStore;

/// Optional filters for [`CallService::search`]. Empty strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    /// Case-insensitive substring of the title or transcript.
    #[serde(default)]
    pub query: Option<String>,
    /// Exact company token.
    #[serde(default)]
    pub company: Option<String>,
    /// Inclusive lower bound (ISO date or date-time).
    #[serde(default)]
    pub date_from: Option<String>,
    /// Inclusive upper bound (ISO date or date-time).
    #[serde(default)]
    pub date_to: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Clone)]
pub struct CallService {
    store: Arc<CallStore>,
}

impl CallService {
    pub fn new(store: Arc<CallStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CallStore> {
        &self.store
    }

    /// Find a call by exact id. Returns the first match.
    pub async fn get_by_id(&self, id: &str) -> Option<CallRecord> {
        if id.is_empty() {
            return None;
        }
        debug!(call_id = %id, "Fetching call");
        let calls = self.store.load_calls().await;
        let found = calls.iter().find(|c| c.id() == id).cloned();
        if found.is_none() {
            info!(call_id = %id, "Call not found");
        }
        found
    }

    /// Filter calls, preserving load order. Filters combine with AND.
    ///
    /// A malformed date bound is logged and the date filter is skipped for
    /// this call.
    pub async fn search(&self, params: &SearchParams) -> Vec<CallRecord> {
        info!(
            query = ?params.query,
            company = ?params.company,
            date_from = ?params.date_from,
            date_to = ?params.date_to,
            "Searching calls"
        );
        let calls = self.store.load_calls().await;

        let query = non_empty(&params.query).map(str::to_lowercase);
        let company = non_empty(&params.company);
        let range = date_range(non_empty(&params.date_from), non_empty(&params.date_to));

        let results: Vec<CallRecord> = calls
            .iter()
            .filter(|call| match &query {
                Some(q) => {
                    call.title().to_lowercase().contains(q.as_str())
                        || call.transcript_text().to_lowercase().contains(q.as_str())
                }
                None => true,
            })
            .filter(|call| company.map_or(true, |c| call.companies.contains(c)))
            .filter(|call| range.map_or(true, |r| r.contains(call.created_at)))
            .cloned()
            .collect();

        info!(count = results.len(), "Found matching calls");
        results
    }

    /// Summary projection of a single call.
    pub async fn get_summary(&self, id: &str) -> Option<CallSummary> {
        let call = self.get_by_id(id).await?;
        Some(CallSummary::from(&call))
    }

    /// Sorted, deduplicated companies across all calls.
    pub async fn unique_companies(&self) -> Arc<Vec<String>> {
        self.store.unique_companies().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DateRange {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl DateRange {
    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| instant >= from) && self.to.map_or(true, |to| instant <= to)
    }
}

/// Parse the optional bounds. `None` disables date filtering, either because
/// no bound was given or because one of them is malformed.
fn date_range(from: Option<&str>, to: Option<&str>) -> Option<DateRange> {
    if from.is_none() && to.is_none() {
        return None;
    }
    let parse = |raw: Option<&str>| -> Result<Option<DateTime<Utc>>, String> {
        match raw {
            None => Ok(None),
            Some(s) => parse_iso_datetime(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .ok_or_else(|| s.to_string()),
        }
    };
    match (parse(from), parse(to)) {
        (Ok(from), Ok(to)) => Some(DateRange { from, to }),
        (Err(bad), _) | (_, Err(bad)) => {
            warn!(value = %bad, "Invalid date format, skipping date filter");
            None
        }
    }
}
