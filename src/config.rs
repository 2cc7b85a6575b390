use crate::retry::{BackoffStrategy, RetryConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// API key values that ship in sample `.env` files and mean "not configured".
const PLACEHOLDER_KEYS: [&str; 6] = [
    "demo",
    "your-api-key",
    "your_api_key_here",
    "changeme",
    "placeholder",
    "xxx",
];

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub campaign_api_key: Option<String>,
    pub campaign_api_base_url: Option<String>,
    pub cache_ttl_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff: BackoffStrategy,
    pub request_timeout_secs: u64,
    pub export_concurrency: usize,
    pub default_phone_region: String,
    pub error_log_capacity: usize,
}

/// True when `key` is absent in practice: empty or a known placeholder.
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty()
        || PLACEHOLDER_KEYS
            .iter()
            .any(|placeholder| key.eq_ignore_ascii_case(placeholder))
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

impl Default for Config {
    /// Demo-mode configuration with the documented defaults.
    fn default() -> Self {
        Self {
            port: 3000,
            campaign_api_key: None,
            campaign_api_base_url: None,
            cache_ttl_secs: 300,
            rate_limit_window_secs: 60,
            rate_limit_max_requests: 100,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            retry_backoff: BackoffStrategy::Exponential,
            request_timeout_secs: 30,
            export_concurrency: 4,
            default_phone_region: "US".to_string(),
            error_log_capacity: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let campaign_api_key = std::env::var("CAMPAIGN_API_KEY")
            .ok()
            .filter(|key| !is_placeholder_key(key));

        let campaign_api_base_url = std::env::var("CAMPAIGN_API_BASE_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .map(|url| -> anyhow::Result<String> {
                let parsed = url::Url::parse(&url)
                    .map_err(|e| anyhow::anyhow!("CAMPAIGN_API_BASE_URL is not a valid URL: {}", e))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    anyhow::bail!("CAMPAIGN_API_BASE_URL must start with http:// or https://");
                }
                Ok(url)
            })
            .transpose()?;

        if campaign_api_key.is_some() && campaign_api_base_url.is_none() {
            anyhow::bail!("CAMPAIGN_API_BASE_URL is required when CAMPAIGN_API_KEY is set");
        }

        let retry_max_attempts = env_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?;
        if retry_max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }

        let rate_limit_window_secs =
            env_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?;
        if rate_limit_window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS must be at least 1");
        }

        let retry_backoff = match std::env::var("RETRY_BACKOFF") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .parse::<BackoffStrategy>()
                .map_err(|e| anyhow::anyhow!("RETRY_BACKOFF: {}", e))?,
            _ => defaults.retry_backoff,
        };

        let config = Self {
            port: env_or("PORT", defaults.port)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            campaign_api_key,
            campaign_api_base_url,
            cache_ttl_secs: env_or("CAMPAIGN_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            rate_limit_window_secs,
            rate_limit_max_requests: env_or(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            retry_max_attempts,
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms)?,
            retry_backoff,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            export_concurrency: env_or("EXPORT_CONCURRENCY", defaults.export_concurrency)?.max(1),
            default_phone_region: env_or(
                "DEFAULT_PHONE_REGION",
                defaults.default_phone_region.clone(),
            )?,
            error_log_capacity: env_or("ERROR_LOG_CAPACITY", defaults.error_log_capacity)?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if config.has_live_credentials() {
            tracing::info!(
                "Campaign API configured: {}",
                config.campaign_api_base_url.as_deref().unwrap_or_default()
            );
        } else {
            tracing::info!("No campaign API key configured, running in demo mode");
        }
        tracing::debug!(
            "Rate limit: {} requests / {}s",
            config.rate_limit_max_requests,
            config.rate_limit_window_secs
        );
        tracing::debug!(
            "Retry: {} attempts, {:?} from {}ms",
            config.retry_max_attempts,
            config.retry_backoff,
            config.retry_base_delay_ms
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Live mode needs both a real key and a base URL.
    pub fn has_live_credentials(&self) -> bool {
        self.campaign_api_base_url.is_some()
            && self
                .campaign_api_key
                .as_deref()
                .is_some_and(|key| !is_placeholder_key(key))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for remote reads, built from the configured values.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_backoff,
        )
        .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field(
                "campaign_api_key",
                &self.campaign_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("campaign_api_base_url", &self.campaign_api_base_url)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("export_concurrency", &self.export_concurrency)
            .finish_non_exhaustive()
    }
}
