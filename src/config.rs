//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables. The completion-API credential is only ever read
//! from the environment.
//!
//! ```toml
//! environment = "development"
//!
//! [storage]
//! calls_file = "data/calls.json"
//! # bucket = "calpilot-data"        # switches to remote-bucket mode
//! # endpoint_url = "http://localhost:9000"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//!
//! [qa]
//! model = "claude-3-5-haiku-20241022"
//! max_tokens = 300
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `CALPILOT_ENV` | `environment` |
//! | `CALLS_FILE` | `storage.calls_file` |
//! | `CALLS_BUCKET` | `storage.bucket` |
//! | `CALPILOT_BIND` | `server.bind` |
//! | `ANTHROPIC_API_KEY` | completion-API credential |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Deployment environment. Controls log verbosity and QA dry-run behaviour.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Debug-level logging is on everywhere except production.
    pub fn is_debug(&self) -> bool {
        !matches!(self, Environment::Production)
    }

    /// The testing environment answers questions with a canned string.
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Environment::Testing)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "default" => Ok(Environment::Development),
            "testing" => Ok(Environment::Testing),
            "production" => Ok(Environment::Production),
            other => bail!(
                "Unknown environment: '{}'. Must be development, testing, or production.",
                other
            ),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Completion-API credential. Never deserialized from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_calls_file")]
    pub calls_file: PathBuf,
    /// Remote bucket name. When set, the local file is ignored.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_object_key")]
    pub object_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound on a single bucket fetch.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            calls_file: default_calls_file(),
            bucket: None,
            object_key: default_object_key(),
            region: default_region(),
            endpoint_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_calls_file() -> PathBuf {
    PathBuf::from("data/calls.json")
}
fn default_object_key() -> String {
    "calls.json".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QaConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_url: default_api_url(),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_max_tokens() -> u32 {
    300
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily-rolling log file. Stderr only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn is_remote(&self) -> bool {
        self.bucket.as_deref().is_some_and(|b| !b.is_empty())
    }
}

impl Config {
    /// Defaults for the testing environment with the given backing file.
    pub fn for_testing(calls_file: impl Into<PathBuf>) -> Self {
        Self {
            environment: Environment::Testing,
            storage: StorageConfig {
                calls_file: calls_file.into(),
                ..StorageConfig::default()
            },
            api_key: Some("test-key".to_string()),
            ..Config::default()
        }
    }
}

/// Load configuration from `path` (if it exists) and the process environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` as the variable source.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(env) = lookup("CALPILOT_ENV") {
        config.environment = env.parse()?;
    }
    if let Some(file) = lookup("CALLS_FILE") {
        config.storage.calls_file = PathBuf::from(file);
    }
    if let Some(bucket) = lookup("CALLS_BUCKET") {
        config.storage.bucket = (!bucket.is_empty()).then_some(bucket);
    }
    if let Some(bind) = lookup("CALPILOT_BIND") {
        config.server.bind = bind;
    }
    if let Some(key) = lookup("ANTHROPIC_API_KEY") {
        config.api_key = (!key.is_empty()).then_some(key);
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.qa.max_tokens == 0 {
        bail!("qa.max_tokens must be > 0");
    }
    if config.qa.timeout_secs == 0 {
        bail!("qa.timeout_secs must be > 0");
    }
    if config.storage.cache_ttl_secs == 0 {
        bail!("storage.cache_ttl_secs must be > 0");
    }
    if config.storage.request_timeout_secs == 0 {
        bail!("storage.request_timeout_secs must be > 0");
    }
    if config.storage.is_remote() && config.storage.object_key.is_empty() {
        bail!("storage.object_key must not be empty in bucket mode");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.storage.object_key, "calls.json");
        assert_eq!(config.storage.cache_ttl_secs, 300);
        assert_eq!(config.storage.request_timeout_secs, 30);
        assert_eq!(config.qa.max_tokens, 300);
        assert!(!config.storage.is_remote());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
environment = "production"

[storage]
calls_file = "/srv/calls.json"
bucket = "calpilot-data"

[qa]
model = "some-model"
"#,
        )
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.storage.is_remote());
        assert_eq!(config.qa.model, "some-model");
        assert_eq!(config.qa.max_tokens, 300);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CALPILOT_ENV", "testing"),
                ("CALLS_FILE", "/tmp/x.json"),
                ("ANTHROPIC_API_KEY", "sk-test"),
            ]),
        )
        .unwrap();
        assert_eq!(config.environment, Environment::Testing);
        assert_eq!(config.storage.calls_file, PathBuf::from("/tmp/x.json"));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_empty_bucket_means_local_mode() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("CALLS_BUCKET", "")])).unwrap();
        assert!(!config.storage.is_remote());
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("CALPILOT_ENV", "staging")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let mut config = Config::default();
        config.qa.max_tokens = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let mut config = Config::default();
        config.storage.request_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_environment_flags() {
        assert!(Environment::Testing.is_dry_run());
        assert!(!Environment::Production.is_dry_run());
        assert!(!Environment::Production.is_debug());
        assert!(Environment::Development.is_debug());
    }
}
