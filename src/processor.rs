//! Call record validation and enrichment.
//!
//! [`process`] turns one raw JSON value from the backing blob into a
//! [`CallRecord`]. It either returns a fully enriched record or an error;
//! a record is never installed half-processed.
//!
//! # Derived fields
//!
//! | Field | Source |
//! |-------|--------|
//! | `formatted_date` | `created_at_utc`, formatted `"%B %d, %Y"` |
//! | `duration_label` | `call_metadata.duration` via [`format_duration`] |
//! | `companies` | domain token of every party email |
//! | `keywords` | fixed vocabulary scan of the transcript ([`extract_keywords`]) |

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::error::CallError;
use crate::models::{CallRecord, Party, RawCallRecord};

/// Top-level fields every raw record must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["id", "created_at_utc", "call_metadata", "transcript"];

/// Field names produced by enrichment. Stripped from incoming records so a
/// re-ingested export cannot shadow them.
const DERIVED_FIELDS: [&str; 4] = ["formatted_date", "duration_label", "companies", "keywords"];

/// Vocabulary scanned by [`extract_keywords`].
pub const KEYWORD_TERMS: [&str; 15] = [
    "pricing",
    "budget",
    "timeline",
    "implementation",
    "integration",
    "decision",
    "approval",
    "concerns",
    "requirements",
    "next steps",
    "follow up",
    "demo",
    "trial",
    "features",
    "competition",
];

static KEYWORD_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    KEYWORD_TERMS
        .iter()
        .map(|term| {
            let pattern = format!(r"[^.]*{}[^.]*\.", regex::escape(term));
            (*term, Regex::new(&pattern).expect("keyword pattern is valid"))
        })
        .collect()
});

/// Validate and enrich a single raw record.
///
/// # Errors
///
/// - [`CallError::MissingFields`] when any of [`REQUIRED_FIELDS`] is absent.
/// - [`CallError::Validation`] when a field has the wrong shape, the id is
///   empty, the timestamp does not parse, or the duration is negative.
pub fn process(value: Value) -> Result<CallRecord, CallError> {
    let object = value
        .as_object()
        .ok_or_else(|| CallError::Validation("record is not a JSON object".to_string()))?;

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !object.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CallError::MissingFields(missing));
    }

    let raw: RawCallRecord =
        serde_json::from_value(value).map_err(|e| CallError::Validation(e.to_string()))?;
    enrich(raw)
}

fn enrich(mut raw: RawCallRecord) -> Result<CallRecord, CallError> {
    if raw.id.trim().is_empty() {
        return Err(CallError::Validation("id must not be empty".to_string()));
    }
    for field in DERIVED_FIELDS {
        raw.extra.remove(field);
    }

    let created = parse_iso_datetime(&raw.created_at_utc).ok_or_else(|| {
        CallError::Validation(format!(
            "created_at_utc is not an ISO-8601 timestamp: '{}'",
            raw.created_at_utc
        ))
    })?;

    let seconds = raw
        .call_metadata
        .duration
        .as_f64()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| {
            CallError::Validation(format!(
                "call_metadata.duration must be a non-negative number, got {}",
                raw.call_metadata.duration
            ))
        })?;

    let companies = extract_companies(&raw.call_metadata.parties)?;
    let keywords = extract_keywords(&raw.transcript.text);

    Ok(CallRecord {
        raw,
        formatted_date: created.format("%B %d, %Y").to_string(),
        duration_label: format_duration(seconds),
        companies,
        keywords,
        created_at: created.with_timezone(&Utc),
    })
}

/// Parse an ISO-8601 timestamp or date.
///
/// Accepts RFC 3339 (including a `Z` suffix), offset date-times without
/// seconds (`2024-01-05T14:30Z`), naive date-times, and bare dates. Naive
/// values are taken as UTC; bare dates as midnight UTC.
pub fn parse_iso_datetime(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt);
    }
    let with_offset = match input.strip_suffix(['Z', 'z']) {
        Some(rest) => format!("{}+00:00", rest),
        None => input.to_string(),
    };
    for fmt in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Format a duration in seconds as a compact label.
///
/// ```
/// use calpilot::processor::format_duration;
/// assert_eq!(format_duration(3600.0), "1h");
/// assert_eq!(format_duration(3661.0), "1h 1m 1s");
/// assert_eq!(format_duration(90.0), "1m 30s");
/// ```
pub fn format_duration(seconds: f64) -> String {
    let hours = (seconds / 3600.0).floor() as u64;
    let remaining = seconds % 3600.0;
    let minutes = (remaining / 60.0).floor() as u64;
    let secs = (remaining % 60.0).floor() as u64;

    if hours > 0 {
        if minutes == 0 {
            return format!("{}h", hours);
        }
        if secs == 0 {
            return format!("{}h {}m", hours, minutes);
        }
        return format!("{}h {}m {}s", hours, minutes, secs);
    }
    if minutes > 0 {
        if secs == 0 {
            return format!("{}m", minutes);
        }
        return format!("{}m {}s", minutes, secs);
    }
    format!("{}s", secs)
}

/// Collect the domain token (between `@` and the first `.`) of each party email.
pub fn extract_companies(parties: &[Party]) -> Result<BTreeSet<String>, CallError> {
    let mut companies = BTreeSet::new();
    for email in parties.iter().filter_map(|p| p.email.as_deref()) {
        if email.is_empty() {
            continue;
        }
        let domain = email.split('@').nth(1).ok_or_else(|| {
            CallError::Validation(format!("party email has no domain: '{}'", email))
        })?;
        let company = domain.split('.').next().unwrap_or(domain);
        if !company.is_empty() {
            companies.insert(company.to_string());
        }
    }
    Ok(companies)
}

/// Find the sentence fragments of `text` that mention each vocabulary term.
///
/// A fragment runs from the previous `.` (or the start of the text) through
/// the next `.`. Matching is done on the lowercased text and fragments are
/// returned trimmed, in order of appearance. Terms without a match are
/// omitted.
pub fn extract_keywords(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut keywords = BTreeMap::new();
    if text.is_empty() {
        return keywords;
    }

    let lowered = text.to_lowercase();
    for (term, pattern) in KEYWORD_PATTERNS.iter() {
        let fragments: Vec<String> = pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().trim().to_string())
            .collect();
        if !fragments.is_empty() {
            keywords.insert(term.to_string(), fragments);
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "id": "call-1",
            "created_at_utc": "2024-01-05T14:30:00Z",
            "call_metadata": {
                "duration": 3660,
                "title": "Discovery call",
                "parties": [
                    {"name": "Ann", "email": "ann@acme.com"},
                    {"name": "Bob", "email": "bob@globex.co.uk"},
                    {"name": "Cy", "email": "cy@acme.io"},
                    {"name": "Dial-in"}
                ]
            },
            "transcript": {
                "text": "Hello. Our Pricing is flexible. What is your budget? We need a demo. Next steps are clear."
            },
            "inference_results": {"call_summary": "Intro call"},
            "source": "gong"
        })
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3600.0), "1h");
        assert_eq!(format_duration(3660.0), "1h 1m");
        assert_eq!(format_duration(60.0), "1m");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
        assert_eq!(format_duration(900.0), "15m");
        assert_eq!(format_duration(45.9), "45s");
    }

    #[test]
    fn test_format_duration_drops_seconds_on_whole_hours() {
        // No minutes means the hour label stands alone.
        assert_eq!(format_duration(3605.0), "1h");
        assert_eq!(format_duration(7325.0), "2h 2m 5s");
    }

    #[test]
    fn test_process_derives_fields() {
        let call = process(sample()).unwrap();
        assert_eq!(call.id(), "call-1");
        assert_eq!(call.formatted_date, "January 05, 2024");
        assert_eq!(call.duration_label, "1h 1m");
        assert_eq!(
            call.companies.iter().cloned().collect::<Vec<_>>(),
            vec!["acme".to_string(), "globex".to_string()]
        );
        assert_eq!(call.keywords["pricing"], vec!["our pricing is flexible."]);
        assert_eq!(call.keywords["next steps"], vec!["next steps are clear."]);
        assert!(!call.keywords.contains_key("timeline"));
        assert_eq!(call.call_summary(), "Intro call");
    }

    #[test]
    fn test_question_mark_does_not_terminate_fragment() {
        let call = process(sample()).unwrap();
        assert_eq!(
            call.keywords["budget"],
            vec!["what is your budget? we need a demo."]
        );
        assert_eq!(call.keywords["demo"], call.keywords["budget"]);
    }

    #[test]
    fn test_keywords_multiple_fragments_in_order() {
        let kw = extract_keywords("Trial one. Nothing here. Second trial ends\nsoon. Trial without period");
        assert_eq!(kw["trial"], vec!["trial one.", "second trial ends\nsoon."]);
    }

    #[test]
    fn test_keywords_empty_text() {
        assert!(extract_keywords("").is_empty());
    }

    #[test]
    fn test_process_is_deterministic() {
        let a = process(sample()).unwrap();
        let b = process(sample()).unwrap();
        assert_eq!(a.formatted_date, b.formatted_date);
        assert_eq!(a.duration_label, b.duration_label);
        assert_eq!(a.companies, b.companies);
        assert_eq!(a.keywords, b.keywords);
        assert_eq!(a.created_at, b.created_at);
    }

    #[test]
    fn test_missing_fields_reported() {
        let mut value = sample();
        let obj = value.as_object_mut().unwrap();
        obj.remove("transcript");
        obj.remove("id");
        match process(value) {
            Err(CallError::MissingFields(fields)) => {
                assert_eq!(fields, vec!["id".to_string(), "transcript".to_string()]);
            }
            other => panic!("expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsable_date_rejected() {
        let mut value = sample();
        value["created_at_utc"] = json!("last tuesday");
        assert!(matches!(process(value), Err(CallError::Validation(_))));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut value = sample();
        value["call_metadata"]["duration"] = json!(-5);
        assert!(matches!(process(value), Err(CallError::Validation(_))));
    }

    #[test]
    fn test_missing_nested_field_rejected() {
        let mut value = sample();
        value["call_metadata"].as_object_mut().unwrap().remove("parties");
        assert!(matches!(process(value), Err(CallError::Validation(_))));
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut value = sample();
        value["id"] = json!("");
        assert!(matches!(process(value), Err(CallError::Validation(_))));
    }

    #[test]
    fn test_email_without_domain_rejected() {
        let mut value = sample();
        value["call_metadata"]["parties"] = json!([{"email": "not-an-email"}]);
        assert!(matches!(process(value), Err(CallError::Validation(_))));
    }

    #[test]
    fn test_serialized_record_keeps_unknown_fields() {
        let mut value = sample();
        value["formatted_date"] = json!("stale");
        let call = process(value).unwrap();
        let out = serde_json::to_value(&call).unwrap();
        assert_eq!(out["source"], "gong");
        assert_eq!(out["call_metadata"]["duration"], 3660);
        assert_eq!(out["call_metadata"]["parties"][0]["name"], "Ann");
        assert_eq!(out["formatted_date"], "January 05, 2024");
        assert_eq!(out["duration_label"], "1h 1m");
        assert!(out.get("created_at").is_none());
    }

    #[test]
    fn test_parse_iso_datetime_variants() {
        assert!(parse_iso_datetime("2024-01-05T14:30:00Z").is_some());
        assert!(parse_iso_datetime("2024-01-05T14:30:00+02:00").is_some());
        assert!(parse_iso_datetime("2024-01-05T14:30:00.123").is_some());
        let midnight = parse_iso_datetime("2024-01-05").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2024-01-05T00:00:00+00:00");
        assert!(parse_iso_datetime("05/01/2024").is_none());
    }

    #[test]
    fn test_parse_iso_datetime_without_seconds() {
        let utc = parse_iso_datetime("2024-01-05T14:30Z").unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-01-05T14:30:00+00:00");
        let offset = parse_iso_datetime("2024-01-05T14:30+02:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2024-01-05T14:30:00+02:00");
        let naive = parse_iso_datetime("2024-01-05T14:30").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-01-05T14:30:00+00:00");
    }

    #[test]
    fn test_minute_precision_record_is_kept() {
        let mut value = sample();
        value["created_at_utc"] = json!("2024-01-05T14:30Z");
        let call = process(value).unwrap();
        assert_eq!(call.formatted_date, "January 05, 2024");
        assert_eq!(call.created_at.to_rfc3339(), "2024-01-05T14:30:00+00:00");
    }

    #[test]
    fn test_formatted_date_uses_record_offset() {
        let mut value = sample();
        value["created_at_utc"] = json!("2024-01-05T23:00:00-05:00");
        let call = process(value).unwrap();
        assert_eq!(call.formatted_date, "January 05, 2024");
        assert_eq!(call.created_at.to_rfc3339(), "2024-01-06T04:00:00+00:00");
    }
}
