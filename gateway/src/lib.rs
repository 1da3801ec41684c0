//! Request gateway: one logical call against the remote API.
//!
//! # Architecture
//!
//! ```text
//! read(path) -> cache hit? ──yes──> value
//!                   │no
//!                   v
//!          run_with_retry ──> HTTP attempt ──> classify on failure
//!                   │
//!                   v
//!            cache.set(value)
//! ```
//!
//! - [`classify`] - turns transport failures into [`DomainError`]
//! - [`retry`] - [`RetryStrategy`] and the single-call retry loop
//! - [`RequestGateway`] - read/create/update/delete verbs
//!
//! Writes (`create`, `update`, `delete`) are never served from cache and
//! invalidate the cached read of the same path once they succeed. Write
//! attempts share one `Idempotency-Key` so a retried create is safe to
//! deduplicate server-side.
//!
//! The per-call timeout is enforced by the HTTP client and applies to each
//! attempt.

pub mod classify;
pub mod retry;

use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

pub use classify::{TransportFailure, classify};
pub use fanout_cache::Cache;
pub use fanout_types::DomainError;
pub use retry::{RetryConfig, RetryDecision, RetryStrategy, run_with_retry};

use classify::MAX_ERROR_BODY_BYTES;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

pub const DEFAULT_USER_AGENT: &str = concat!("fanout/", env!("CARGO_PKG_VERSION"));

/// Resolved gateway settings.
#[derive(Clone)]
pub struct GatewaySettings {
    pub base_url: Url,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl GatewaySettings {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            bearer_token: None,
            headers: Vec::new(),
        }
    }
}

// Manual Debug impl to prevent leaking the token in logs.
impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("headers", &self.headers.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Performs single logical calls with caching, retry and classification.
pub struct RequestGateway {
    client: reqwest::Client,
    base_url: Url,
    cache: Cache<Value>,
    retry: RetryStrategy,
}

impl fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("base_url", &self.base_url.as_str())
            .field("cache_enabled", &self.cache.is_enabled())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RequestGateway {
    pub fn new(
        settings: &GatewaySettings,
        retry: RetryStrategy,
        cache: Cache<Value>,
    ) -> Result<Self, GatewayError> {
        let client = build_client(settings)?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            cache,
            retry,
        })
    }

    #[must_use]
    pub fn cache(&self) -> &Cache<Value> {
        &self.cache
    }

    #[must_use]
    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry
    }

    /// Read-through GET.
    pub async fn read(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, DomainError> {
        let url = self.url(path, query)?;
        let key = cache_key(&url);

        if let Some(value) = self.cache.get(&key) {
            tracing::debug!(url = %url, "Served from cache");
            return Ok(value);
        }

        self.fetch_and_store(url, key).await
    }

    /// GET that skips the cache lookup but refreshes the cached entry.
    pub async fn read_fresh(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, DomainError> {
        let url = self.url(path, query)?;
        let key = cache_key(&url);
        self.fetch_and_store(url, key).await
    }

    /// POST a new resource.
    pub async fn create(&self, path: &str, body: &Value) -> Result<Value, DomainError> {
        let url = self.url(path, &[])?;
        let value = self.send(Method::POST, &url, Some(body)).await?;
        self.invalidate(&url);
        Ok(value)
    }

    /// PATCH an existing resource.
    pub async fn update(&self, path: &str, body: &Value) -> Result<Value, DomainError> {
        let url = self.url(path, &[])?;
        let value = self.send(Method::PATCH, &url, Some(body)).await?;
        self.invalidate(&url);
        Ok(value)
    }

    /// DELETE a resource. Any response body is discarded.
    pub async fn delete(&self, path: &str) -> Result<(), DomainError> {
        let url = self.url(path, &[])?;
        self.send(Method::DELETE, &url, None).await?;
        self.invalidate(&url);
        Ok(())
    }

    /// Resolve `path` against the base URL, keeping any base path prefix.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, DomainError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|e| {
            DomainError::transport(format!("invalid request path {path:?}: {e}"))
        })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn fetch_and_store(&self, url: Url, key: String) -> Result<Value, DomainError> {
        let value = self.send(Method::GET, &url, None).await?;
        if !value.is_null() {
            self.cache.set(key, value.clone(), None);
        }
        Ok(value)
    }

    fn invalidate(&self, url: &Url) {
        if self.cache.delete(&cache_key(url)) {
            tracing::debug!(url = %url, "Invalidated cached read");
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<Value, DomainError> {
        let idempotency_key = (method == Method::POST || method == Method::PATCH)
            .then(generate_idempotency_key);
        let label = format!("{method} {}", url.path());

        run_with_retry(&self.retry, &label, |attempt| {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(key) = &idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            tracing::trace!(label = %label, attempt, "Sending request");
            execute(request)
        })
        .await
    }
}

async fn execute(request: RequestBuilder) -> Result<Value, DomainError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify(&TransportFailure::Network(e)))?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify(&TransportFailure::Network(e)))?;

    if !status.is_success() {
        let end = bytes.len().min(MAX_ERROR_BODY_BYTES);
        let body = String::from_utf8_lossy(&bytes[..end]).into_owned();
        return Err(classify(&TransportFailure::Status {
            status,
            headers,
            body,
        }));
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        classify(&TransportFailure::Decode {
            status,
            message: e.to_string(),
        })
    })
}

fn build_client(settings: &GatewaySettings) -> Result<reqwest::Client, GatewayError> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("application/json"),
    );
    default_headers.insert(USER_AGENT, header_value("user-agent", &settings.user_agent)?);

    if let Some(token) = settings.bearer_token.as_deref() {
        let mut value = header_value("authorization", &format!("Bearer {token}"))?;
        value.set_sensitive(true);
        default_headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &settings.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| GatewayError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        default_headers.insert(header_name, header_value(name, value)?);
    }

    let client = reqwest::Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(settings.timeout))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
        .build()?;
    Ok(client)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|e| GatewayError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Cache key for a GET of `url`: SHA-256 of `GET\n<url>`, hex-encoded.
#[must_use]
pub fn cache_key(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"GET\n");
    hasher.update(url.as_str().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("fanout-{}", Uuid::new_v4())
}
