//! Process configuration for fanout.
//!
//! Read from `$FANOUT_CONFIG` or `~/.fanout/config.toml`:
//!
//! ```toml
//! [executor]
//! max_batch_size = 50
//! max_concurrent_requests = 5
//!
//! [retry]
//! attempts = 3
//! min_delay_ms = 1000
//! max_delay_ms = 10000
//!
//! [cache]
//! enabled = true
//! ttl_seconds = 60
//!
//! [api]
//! base_url = "https://api.example.com/v1"
//! token = "${EXAMPLE_API_TOKEN}"
//! ```
//!
//! Every field is optional. `FANOUT_*` environment variables override the
//! file, and [`FanoutConfig::resolve`] turns the result into validated
//! settings for the executor, retry strategy, cache and gateway.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, fs, io};

use fanout_cache::{CachePolicy, CacheSettings};
use fanout_gateway::{GatewaySettings, RetryConfig, RetryStrategy};
use fanout_types::ExecutorConfig;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const CONFIG_PATH_ENV: &str = "FANOUT_CONFIG";

pub const ENV_BASE_URL: &str = "FANOUT_BASE_URL";
pub const ENV_API_TOKEN: &str = "FANOUT_API_TOKEN";
pub const ENV_MAX_BATCH_SIZE: &str = "FANOUT_MAX_BATCH_SIZE";
pub const ENV_MAX_CONCURRENT_REQUESTS: &str = "FANOUT_MAX_CONCURRENT_REQUESTS";
pub const ENV_RETRY_ATTEMPTS: &str = "FANOUT_RETRY_ATTEMPTS";
pub const ENV_CACHE_TTL_SECS: &str = "FANOUT_CACHE_TTL_SECS";
pub const ENV_CACHE_ENABLED: &str = "FANOUT_CACHE_ENABLED";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    /// The config file involved, for read and parse failures.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Invalid { .. } => None,
        }
    }

    fn invalid(field: &str, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// File schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct FanoutConfig {
    pub executor: Option<ExecutorSection>,
    pub retry: Option<RetrySection>,
    pub cache: Option<CacheSection>,
    pub api: Option<ApiSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutorSection {
    pub max_batch_size: Option<usize>,
    pub max_concurrent_requests: Option<usize>,
}

impl ExecutorSection {
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
            .unwrap_or(ExecutorConfig::DEFAULT_MAX_BATCH_SIZE)
    }

    #[must_use]
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
            .unwrap_or(ExecutorConfig::DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrySection {
    /// Total attempts per call, first attempt included.
    pub attempts: Option<u32>,
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// Fraction in `[0, 1]` by which each delay may be shortened at random.
    pub jitter_factor: Option<f64>,
    /// Server retry-after hints above this are not waited on.
    pub max_retry_after_secs: Option<u64>,
}

impl RetrySection {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_MIN_DELAY_MS: u64 = 1000;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
    pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;
    pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 60;

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.unwrap_or(Self::DEFAULT_ATTEMPTS)
    }

    #[must_use]
    pub fn min_delay_ms(&self) -> u64 {
        self.min_delay_ms.unwrap_or(Self::DEFAULT_MIN_DELAY_MS)
    }

    #[must_use]
    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms.unwrap_or(Self::DEFAULT_MAX_DELAY_MS)
    }

    #[must_use]
    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor.unwrap_or(Self::DEFAULT_JITTER_FACTOR)
    }

    #[must_use]
    pub fn max_retry_after_secs(&self) -> u64 {
        self.max_retry_after_secs
            .unwrap_or(Self::DEFAULT_MAX_RETRY_AFTER_SECS)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheSection {
    pub enabled: Option<bool>,
    /// `0` disables caching.
    pub ttl_seconds: Option<u64>,
    pub max_entries: Option<usize>,
}

impl CacheSection {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
            .unwrap_or(CacheSettings::DEFAULT_TTL.as_secs())
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
            .unwrap_or(CacheSettings::DEFAULT_MAX_ENTRIES)
    }
}

#[derive(Default, Deserialize)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// Manual Debug impl to prevent leaking the token in logs.
impl fmt::Debug for ApiSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSection")
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field(
                "token",
                &if self.token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApiSection {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
            .map_or(GatewaySettings::DEFAULT_TIMEOUT, Duration::from_secs)
    }
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Validated settings for every component.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub executor: ExecutorConfig,
    pub retry: RetryStrategy,
    pub cache: CachePolicy,
    pub gateway: GatewaySettings,
}

// ============================================================================
// Loading
// ============================================================================

impl FanoutConfig {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// A missing file is not an error: defaults and environment apply.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Parse the file at `path`. Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// `$FANOUT_CONFIG` if set, else `~/.fanout/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        match env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => dirs::home_dir().map(|home| home.join(".fanout").join("config.toml")),
        }
    }

    /// Override file values with `FANOUT_*` variables looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_BASE_URL) {
            self.api.get_or_insert_default().base_url = Some(value);
        }
        if let Some(value) = get(ENV_API_TOKEN) {
            self.api.get_or_insert_default().token = Some(value);
        }
        if let Some(value) = get(ENV_MAX_BATCH_SIZE) {
            self.executor.get_or_insert_default().max_batch_size =
                Some(parse_env(ENV_MAX_BATCH_SIZE, &value)?);
        }
        if let Some(value) = get(ENV_MAX_CONCURRENT_REQUESTS) {
            self.executor.get_or_insert_default().max_concurrent_requests =
                Some(parse_env(ENV_MAX_CONCURRENT_REQUESTS, &value)?);
        }
        if let Some(value) = get(ENV_RETRY_ATTEMPTS) {
            self.retry.get_or_insert_default().attempts =
                Some(parse_env(ENV_RETRY_ATTEMPTS, &value)?);
        }
        if let Some(value) = get(ENV_CACHE_TTL_SECS) {
            self.cache.get_or_insert_default().ttl_seconds =
                Some(parse_env(ENV_CACHE_TTL_SECS, &value)?);
        }
        if let Some(value) = get(ENV_CACHE_ENABLED) {
            self.cache.get_or_insert_default().enabled = Some(parse_bool(ENV_CACHE_ENABLED, &value)?);
        }
        Ok(())
    }

    /// Validate and convert into component settings.
    ///
    /// `${VAR}` references in `[api]` string values are expanded here.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        Ok(ResolvedConfig {
            executor: self.resolve_executor()?,
            retry: self.resolve_retry()?,
            cache: self.resolve_cache(),
            gateway: self.resolve_gateway()?,
        })
    }

    fn resolve_executor(&self) -> Result<ExecutorConfig, ConfigError> {
        let section = self.executor.as_ref();
        let max_batch_size = section.map_or(
            ExecutorConfig::DEFAULT_MAX_BATCH_SIZE,
            ExecutorSection::max_batch_size,
        );
        let max_concurrent = section.map_or(
            ExecutorConfig::DEFAULT_MAX_CONCURRENT_REQUESTS,
            ExecutorSection::max_concurrent_requests,
        );
        ExecutorConfig::new(max_batch_size, max_concurrent)
            .map_err(|e| ConfigError::invalid("executor", e))
    }

    fn resolve_retry(&self) -> Result<RetryStrategy, ConfigError> {
        let default = RetrySection::default();
        let section = self.retry.as_ref().unwrap_or(&default);

        let attempts = section.attempts();
        if attempts == 0 {
            return Err(ConfigError::invalid("retry.attempts", "must be at least 1"));
        }
        let (min, max) = (section.min_delay_ms(), section.max_delay_ms());
        if min > max {
            return Err(ConfigError::invalid(
                "retry.min_delay_ms",
                format!("{min} exceeds max_delay_ms {max}"),
            ));
        }
        let jitter = section.jitter_factor();
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid(
                "retry.jitter_factor",
                format!("{jitter} is outside [0, 1]"),
            ));
        }

        if attempts == 1 {
            return Ok(RetryStrategy::Never);
        }
        Ok(RetryStrategy::Exponential(RetryConfig {
            max_attempts: attempts,
            min_delay: Duration::from_millis(min),
            max_delay: Duration::from_millis(max),
            jitter_factor: jitter,
            max_retry_after: Duration::from_secs(section.max_retry_after_secs()),
        }))
    }

    fn resolve_cache(&self) -> CachePolicy {
        let default = CacheSection::default();
        let section = self.cache.as_ref().unwrap_or(&default);

        if !section.enabled() || section.ttl_seconds() == 0 {
            return CachePolicy::Disabled;
        }
        CachePolicy::Enabled(CacheSettings {
            ttl: Duration::from_secs(section.ttl_seconds()),
            max_entries: section.max_entries(),
        })
    }

    fn resolve_gateway(&self) -> Result<GatewaySettings, ConfigError> {
        let default = ApiSection::default();
        let section = self.api.as_ref().unwrap_or(&default);

        let raw = section
            .base_url
            .as_deref()
            .map(expand_env_vars)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::invalid("api.base_url", format!("not set (use [api] or {ENV_BASE_URL})"))
            })?;
        let base_url =
            Url::parse(raw.trim()).map_err(|e| ConfigError::invalid("api.base_url", e))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "api.base_url",
                format!("unsupported scheme {:?}", base_url.scheme()),
            ));
        }

        let timeout = section.timeout();
        if timeout.is_zero() {
            return Err(ConfigError::invalid("api.timeout_seconds", "must be at least 1"));
        }

        let mut settings = GatewaySettings::new(base_url);
        settings.timeout = timeout;
        settings.bearer_token = section
            .token
            .as_deref()
            .map(expand_env_vars)
            .filter(|token| !token.is_empty());
        if let Some(user_agent) = section.user_agent.as_deref() {
            settings.user_agent = expand_env_vars(user_agent);
        }
        settings.headers = section
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), expand_env_vars(value)))
            .collect();
        Ok(settings)
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid(name, format!("{value:?}: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(name, format!("{other:?} is not a boolean"))),
    }
}

/// Replace `${VAR}` with the value of `VAR`, or nothing if it is unset.
/// An unclosed `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}
