//! Backing-blob sources for the call store.
//!
//! A [`RecordSource`] knows how to fetch the raw JSON text of the call
//! collection and how to decide whether a cached copy is stale. Two sources
//! are built in:
//!
//! - **[`LocalFileSource`]** reads a file from disk. The cache is stale once
//!   the file's modification time is newer than the cache timestamp.
//! - **[`S3Source`]** fetches a single object from an S3-compatible bucket
//!   with an AWS Signature V4 signed `GET`. The cache is stale after a fixed
//!   TTL.
//!
//! # Environment Variables
//!
//! The S3 source reads credentials from:
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`: when both are unset the
//!   request is sent unsigned (public buckets)
//! - `AWS_SESSION_TOKEN`: optional, for temporary credentials

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::CallError;

/// Where the raw call collection lives and when a cached copy expires.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable location used in logs (e.g. `s3://bucket/calls.json`).
    fn describe(&self) -> String;

    /// Read the whole backing blob as text.
    async fn read_raw(&self) -> Result<String, CallError>;

    /// Whether a cache populated at `cached_at` must be rebuilt.
    async fn is_stale(&self, cached_at: SystemTime) -> bool;
}

/// Build the source selected by `config`: the bucket when one is set,
/// otherwise the local file.
///
/// # Errors
///
/// Returns [`CallError::Configuration`] in local-file mode when the file
/// does not exist, or when the bucket HTTP client cannot be built.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn RecordSource>, CallError> {
    match config.bucket.as_deref().filter(|b| !b.is_empty()) {
        Some(bucket) => Ok(Arc::new(S3Source::new(
            S3Location {
                bucket: bucket.to_string(),
                key: config.object_key.clone(),
                region: config.region.clone(),
                endpoint_url: config.endpoint_url.clone(),
            },
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_secs(config.request_timeout_secs),
        )?)),
        None => Ok(Arc::new(LocalFileSource::new(&config.calls_file)?)),
    }
}

// ============ Local file ============

pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CallError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CallError::Configuration(format!(
                "calls file not found: {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl RecordSource for LocalFileSource {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn read_raw(&self) -> Result<String, CallError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CallError::StorageUnavailable(format!("failed to read {}: {}", self.path.display(), e))
        })
    }

    async fn is_stale(&self, cached_at: SystemTime) -> bool {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified());
        match modified {
            Ok(modified) => modified > cached_at,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "cannot read mtime, treating cache as stale");
                true
            }
        }
    }
}

// ============ S3 bucket ============

/// Bucket coordinates of the backing object.
#[derive(Debug, Clone)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub region: String,
    /// Custom S3-compatible endpoint. Requests use path-style addressing.
    pub endpoint_url: Option<String>,
}

pub struct S3Source {
    location: S3Location,
    ttl: Duration,
    client: reqwest::Client,
}

impl S3Source {
    /// `request_timeout` bounds each fetch, from connect to the last body byte.
    pub fn new(
        location: S3Location,
        ttl: Duration,
        request_timeout: Duration,
    ) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CallError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            location,
            ttl,
            client,
        })
    }
}

#[async_trait]
impl RecordSource for S3Source {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.location.bucket, self.location.key)
    }

    async fn read_raw(&self) -> Result<String, CallError> {
        let creds = AwsCredentials::from_env();
        if creds.is_none() {
            debug!("AWS credentials not set, sending unsigned request");
        }
        download_object(&self.location, creds.as_ref(), &self.client)
            .await
            .map_err(|e| CallError::StorageUnavailable(format!("{}: {}", self.describe(), e)))
    }

    async fn is_stale(&self, cached_at: SystemTime) -> bool {
        // A cache timestamp in the future (clock skew) counts as fresh.
        SystemTime::now()
            .duration_since(cached_at)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Request target for an object: `(url, host, canonical_uri)`.
fn object_target(location: &S3Location) -> (String, String, String) {
    let encoded_key = location
        .key
        .split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/");

    match location.endpoint_url {
        Some(ref endpoint) => {
            let endpoint = endpoint.trim_end_matches('/');
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string();
            let canonical_uri = format!("/{}/{}", uri_encode(&location.bucket), encoded_key);
            (format!("{}{}", endpoint, canonical_uri), host, canonical_uri)
        }
        None => {
            let host = format!("{}.s3.{}.amazonaws.com", location.bucket, location.region);
            let canonical_uri = format!("/{}", encoded_key);
            (format!("https://{}{}", host, canonical_uri), host, canonical_uri)
        }
    }
}

/// Download the object's content, signing the request when credentials exist.
async fn download_object(
    location: &S3Location,
    creds: Option<&AwsCredentials>,
    client: &reqwest::Client,
) -> anyhow::Result<String> {
    let (url, host, canonical_uri) = object_target(location);
    let mut req_builder = client.get(&url);

    if let Some(creds) = creds {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n\n{}\n{}\n{}",
            canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, location.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&creds.secret_access_key, &date_stamp, &location.region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        req_builder = req_builder
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }
    }

    let resp = req_builder
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("request failed: {}", e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        warn!(%status, "S3 GetObject failed");
        anyhow::bail!(
            "GetObject failed (HTTP {}): {}",
            status,
            body.chars().take(500).collect::<String>()
        );
    }

    let bytes = resp.bytes().await?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
