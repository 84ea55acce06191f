//! Transcript question answering via an external completion API.
//!
//! [`AnswerGateway`] validates the request, builds the prompt, and forwards
//! it to a [`CompletionClient`]. Two clients are built in:
//!
//! - **[`AnthropicClient`]** calls the Anthropic Messages API.
//! - **[`DryRunClient`]** returns a canned answer without network access;
//!   selected automatically in the `testing` environment.
//!
//! # Error mapping
//!
//! Provider failures are collapsed to a [`ProviderErrorKind`] at a single
//! boundary ([`CompletionError::kind`]). The provider detail is logged there
//! and only the kind's fixed message reaches the caller.
//!
//! | Provider failure | Kind |
//! |------------------|------|
//! | HTTP 429 | `RateLimited` |
//! | client or caller-side timeout, HTTP 408 | `Timeout` |
//! | connection failure | `Unreachable` |
//! | any other HTTP error status | `ProviderError` |
//! | malformed response, anything else | `Unknown` |

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{Config, QaConfig};
use crate::error::{CallError, ProviderErrorKind};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant analyzing sales call transcripts. \
Provide concise, focused answers based only on the information in the transcript.";

/// Answer returned by [`DryRunClient`].
pub const DRY_RUN_ANSWER: &str = "This is a test response from the dry-run completion client";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Extra time the gateway waits beyond the HTTP client's own timeout.
const CALLER_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// A single-turn completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Failure reported by a [`CompletionClient`].
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl CompletionError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            CompletionError::Status { status: 429, .. } => ProviderErrorKind::RateLimited,
            CompletionError::Status { status: 408, .. } => ProviderErrorKind::Timeout,
            CompletionError::Status { .. } => ProviderErrorKind::ProviderError,
            CompletionError::Timeout => ProviderErrorKind::Timeout,
            CompletionError::Connect(_) => ProviderErrorKind::Unreachable,
            CompletionError::InvalidResponse(_) | CompletionError::Other(_) => {
                ProviderErrorKind::Unknown
            }
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout
        } else if e.is_connect() {
            CompletionError::Connect(e.to_string())
        } else if e.is_decode() {
            CompletionError::InvalidResponse(e.to_string())
        } else {
            CompletionError::Other(e.to_string())
        }
    }
}

/// Backend that turns a prompt into answer text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

// ============ Anthropic ============

pub struct AnthropicClient {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, qa: &QaConfig) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(qa.timeout_secs))
            .build()
            .map_err(|e| CallError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            api_url: qa.api_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [
                {"role": "user", "content": request.prompt}
            ],
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(500).collect(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_messages_response(&json)
    }
}

/// Extract the first text block of a Messages API response.
fn parse_messages_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    json.get("content")
        .and_then(|c| c.as_array())
        .and_then(|blocks| blocks.first())
        .and_then(|block| block.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| CompletionError::InvalidResponse("missing content[0].text".to_string()))
}

// ============ Dry run ============

/// Returns [`DRY_RUN_ANSWER`] for every request.
pub struct DryRunClient;

#[async_trait]
impl CompletionClient for DryRunClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Ok(DRY_RUN_ANSWER.to_string())
    }
}

// ============ Gateway ============

pub struct AnswerGateway {
    client: Arc<dyn CompletionClient>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl AnswerGateway {
    pub fn new(client: Arc<dyn CompletionClient>, qa: &QaConfig) -> Self {
        Self {
            client,
            model: qa.model.clone(),
            max_tokens: qa.max_tokens,
            timeout: Duration::from_secs(qa.timeout_secs) + CALLER_TIMEOUT_GRACE,
        }
    }

    /// Pick the client for the configured environment.
    ///
    /// # Errors
    ///
    /// [`CallError::Configuration`] when no API key is configured outside
    /// the testing environment.
    pub fn from_config(config: &Config) -> Result<Self, CallError> {
        if config.environment.is_dry_run() {
            info!("QA gateway in dry-run mode");
            return Ok(Self::new(Arc::new(DryRunClient), &config.qa));
        }
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CallError::Configuration("ANTHROPIC_API_KEY not configured".into()))?;
        let client = AnthropicClient::new(api_key, &config.qa)?;
        info!(model = %config.qa.model, "QA gateway initialized");
        Ok(Self::new(Arc::new(client), &config.qa))
    }

    /// Answer `question` about the call transcript.
    ///
    /// # Errors
    ///
    /// - [`CallError::InvalidArgument`] naming every empty argument; no
    ///   request is sent in that case.
    /// - [`CallError::Provider`] when the completion call fails.
    pub async fn answer(
        &self,
        call_id: &str,
        question: &str,
        transcript: &str,
    ) -> Result<String, CallError> {
        let missing: Vec<String> = [
            ("call_id", call_id),
            ("question", question),
            ("transcript", transcript),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect();
        if !missing.is_empty() {
            error!(missing = ?missing, "Missing required parameters");
            return Err(CallError::InvalidArgument(missing));
        }

        let preview: String = question.chars().take(100).collect();
        info!(call_id = %call_id, question = %preview, "Processing question");

        let request = CompletionRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(transcript, question),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let result = match tokio::time::timeout(self.timeout, self.client.complete(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout),
        };

        match result {
            Ok(answer) => {
                info!(call_id = %call_id, "Answered question");
                debug!(call_id = %call_id, length = answer.len(), "Answer length");
                Ok(answer)
            }
            Err(e) => {
                let kind = e.kind();
                error!(call_id = %call_id, kind = ?kind, error = %e, "Completion request failed");
                Err(CallError::Provider(kind))
            }
        }
    }
}

/// User prompt embedding the transcript and question verbatim.
pub fn build_prompt(transcript: &str, question: &str) -> String {
    format!(
        "Given this sales call transcript:\n\n{}\n\nPlease answer this question about the call: {}\n\n\
Keep your answer concise and focused on the specific question asked.\n\
If you can't find a clear answer in the transcript, please say so.",
        transcript, question
    )
}
