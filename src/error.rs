//! Error taxonomy shared by the loader, query service, and QA gateway.

use thiserror::Error;

/// Failure kinds surfaced by the completion provider boundary.
///
/// Each kind carries a fixed, user-safe message. Provider detail is logged
/// where the error is classified and never travels further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Timeout,
    Unreachable,
    ProviderError,
    Unknown,
}

impl ProviderErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "Too many requests. Please try again later.",
            ProviderErrorKind::Timeout => "Request timed out. Please try again.",
            ProviderErrorKind::Unreachable => {
                "Unable to connect to AI service. Please try again later."
            }
            ProviderErrorKind::ProviderError => "AI service error. Please try again later.",
            ProviderErrorKind::Unknown => "An unexpected error occurred. Please try again later.",
        }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Unreachable => "unreachable",
            ProviderErrorKind::ProviderError => "provider_error",
            ProviderErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("invalid call record: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("malformed call store: {0}")]
    MalformedStore(String),

    #[error("missing required parameters: {}", .0.join(", "))]
    InvalidArgument(Vec<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{}", .0.user_message())]
    Provider(ProviderErrorKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_lists_names() {
        let err = CallError::MissingFields(vec!["id".into(), "transcript".into()]);
        assert_eq!(err.to_string(), "missing required fields: id, transcript");
    }

    #[test]
    fn test_provider_message_is_user_safe() {
        let err = CallError::Provider(ProviderErrorKind::RateLimited);
        assert_eq!(err.to_string(), "Too many requests. Please try again later.");
    }

    #[test]
    fn test_not_found_names_the_resource() {
        assert_eq!(CallError::NotFound("Call".into()).to_string(), "Call not found");
    }
}
