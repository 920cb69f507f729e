//! Configuration management.
//!
//! Service settings are read from environment variables at startup:
//!
//! - `HOST` / `PORT` - listen address (default `127.0.0.1:3000`)
//! - `BROWSER_USE_API_KEY` - required, provider API key
//! - `BROWSER_USE_BASE_URL` - optional, provider base URL override
//! - `PUBLIC_WEBHOOK_URL` - optional, URL the provider pushes status updates to
//! - `WEBHOOK_SECRET` - optional, shared secret expected in `x-webhook-secret`
//! - `POLL_INTERVAL_MS` - optional, poll period (default 2000)
//! - `DATABASE_PATH` - optional, SQLite file; unset keeps records in memory

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Engine timings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Delay between the terminal event and closing subscriber streams.
    pub close_delay: Duration,
    /// How long a finished task with no subscribers stays in memory.
    pub eviction_grace: Duration,
    /// Idle time after which a subscriber gets a heartbeat.
    pub heartbeat_interval: Duration,
    /// Frames buffered per subscriber before it is considered too slow.
    pub subscriber_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            close_delay: Duration::from_secs(5),
            eviction_grace: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(30),
            subscriber_buffer: 256,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub provider_base_url: Option<String>,
    /// Webhook URL handed to the provider on task creation.
    pub public_webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub poll_interval: Duration,
    pub database_path: Option<PathBuf>,
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = var("BROWSER_USE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("BROWSER_USE_API_KEY".to_string()))?;

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match var("PORT") {
            Some(p) => p
                .parse()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?,
            None => 3000,
        };

        let public_webhook_url = match var("PUBLIC_WEBHOOK_URL") {
            Some(raw) => {
                let parsed = url::Url::parse(&raw).map_err(|e| {
                    ConfigError::InvalidValue("PUBLIC_WEBHOOK_URL".to_string(), format!("{}", e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidValue(
                        "PUBLIC_WEBHOOK_URL".to_string(),
                        format!("unsupported scheme {}", parsed.scheme()),
                    ));
                }
                Some(raw)
            }
            None => None,
        };

        let poll_interval = match var("POLL_INTERVAL_MS") {
            Some(ms) => {
                let ms: u64 = ms.parse().map_err(|e| {
                    ConfigError::InvalidValue("POLL_INTERVAL_MS".to_string(), format!("{}", e))
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue(
                        "POLL_INTERVAL_MS".to_string(),
                        "must be greater than zero".to_string(),
                    ));
                }
                Duration::from_millis(ms)
            }
            None => Duration::from_secs(2),
        };

        let webhook_secret = var("WEBHOOK_SECRET");
        if webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set; webhook requests will not be authenticated");
        }
        if public_webhook_url.is_none() {
            tracing::info!("PUBLIC_WEBHOOK_URL not set; task status comes from polling only");
        }

        Ok(Self {
            host,
            port,
            api_key,
            provider_base_url: var("BROWSER_USE_BASE_URL"),
            public_webhook_url,
            webhook_secret,
            poll_interval,
            database_path: var("DATABASE_PATH").map(PathBuf::from),
            registry: RegistryConfig::default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("BROWSER_USE_API_KEY", "bu_key")]).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.public_webhook_url.is_none());
        assert!(config.database_path.is_none());
        assert_eq!(config.registry.eviction_grace, Duration::from_secs(300));
    }

    #[test]
    fn test_api_key_is_required() {
        let err = load(&[("BROWSER_USE_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "BROWSER_USE_API_KEY"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("BROWSER_USE_API_KEY", "k"), ("PORT", "http")]).is_err());
        assert!(load(&[("BROWSER_USE_API_KEY", "k"), ("POLL_INTERVAL_MS", "0")]).is_err());
        let webhook =
            |url: &str| load(&[("BROWSER_USE_API_KEY", "k"), ("PUBLIC_WEBHOOK_URL", url)]);
        assert!(webhook("not a url").is_err());
        assert!(webhook("ftp://x/hook").is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BROWSER_USE_API_KEY", "k"),
            ("PORT", "8080"),
            ("PUBLIC_WEBHOOK_URL", "https://relay.example.com/api/webhooks/browser-use"),
            ("POLL_INTERVAL_MS", "500"),
            ("DATABASE_PATH", "/tmp/tasks.db"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/tasks.db")));
    }
}
