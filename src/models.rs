//! Core data models used throughout CalPilot.
//!
//! [`RawCallRecord`] is the strict schema validated at the ingestion
//! boundary. [`CallRecord`] is the enriched, immutable record served by the
//! query layer. Unknown fields are carried through untouched so the API
//! returns a superset of what was ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Call record as stored in the backing blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCallRecord {
    pub id: String,
    pub created_at_utc: String,
    pub call_metadata: CallMetadata,
    pub transcript: Transcript,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_results: Option<InferenceResults>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Length of the call in seconds, kept as the original JSON number.
    pub duration: serde_json::Number,
    pub title: String,
    pub parties: Vec<Party>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_summary: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalized call record with derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    #[serde(flatten)]
    pub raw: RawCallRecord,
    /// `"January 05, 2024"` style date.
    pub formatted_date: String,
    /// Compact duration such as `"1h 1m"` or `"90s"`.
    pub duration_label: String,
    /// Company tokens taken from party email domains.
    pub companies: BTreeSet<String>,
    /// Vocabulary term → transcript sentence fragments mentioning it.
    pub keywords: BTreeMap<String, Vec<String>>,
    /// Parsed `created_at_utc`, used for date-range filtering.
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn title(&self) -> &str {
        &self.raw.call_metadata.title
    }

    pub fn transcript_text(&self) -> &str {
        &self.raw.transcript.text
    }

    pub fn participant_count(&self) -> usize {
        self.raw.call_metadata.parties.len()
    }

    /// The AI-generated call summary, or an empty string when absent.
    pub fn call_summary(&self) -> &str {
        self.raw
            .inference_results
            .as_ref()
            .and_then(|r| r.call_summary.as_deref())
            .unwrap_or("")
    }
}

/// Projection returned by `GET /api/call/{id}/summary`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallSummary {
    pub duration_label: String,
    pub participant_count: usize,
    pub companies: BTreeSet<String>,
    pub keywords: BTreeMap<String, Vec<String>>,
    pub summary: String,
}

impl From<&CallRecord> for CallSummary {
    fn from(call: &CallRecord) -> Self {
        Self {
            duration_label: call.duration_label.clone(),
            participant_count: call.participant_count(),
            companies: call.companies.clone(),
            keywords: call.keywords.clone(),
            summary: call.call_summary().to_string(),
        }
    }
}
