//! Application configuration loaded from environment variables.

use std::time::Duration;

use payments::{MpesaConfig, SANDBOX_BASE_URL};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; absent means the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `LOW_STOCK_THRESHOLD`: inclusive low-stock level (default: `5`)
/// - `MPESA_BASE_URL`, `MPESA_CONSUMER_KEY`, `MPESA_CONSUMER_SECRET`,
///   `MPESA_SHORTCODE`, `MPESA_PASSKEY`, `MPESA_CALLBACK_URL`,
///   `MPESA_TIMEOUT_SECS` (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub low_stock_threshold: u32,
    pub mpesa: MpesaSettings,
}

/// Provider settings as read from the environment.
#[derive(Clone, Default)]
pub struct MpesaSettings {
    pub base_url: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for MpesaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaSettings")
            .field("base_url", &self.base_url)
            .field("has_credentials", &self.has_credentials())
            .field("shortcode", &self.shortcode)
            .field("callback_url", &self.callback_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MpesaSettings {
    pub fn has_credentials(&self) -> bool {
        self.consumer_key.is_some() && self.consumer_secret.is_some()
    }

    /// Gateway configuration, or `None` when consumer credentials are missing.
    pub fn gateway_config(&self) -> Option<MpesaConfig> {
        Some(MpesaConfig {
            base_url: self.base_url.clone(),
            consumer_key: self.consumer_key.clone()?,
            consumer_secret: self.consumer_secret.clone()?,
            shortcode: self.shortcode.clone(),
            passkey: self.passkey.clone(),
            callback_url: self.callback_url.clone(),
            timeout: self.timeout,
        })
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(&var, "PORT").unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parsed(&var, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            low_stock_threshold: parsed(&var, "LOW_STOCK_THRESHOLD")
                .unwrap_or(defaults.low_stock_threshold),
            mpesa: MpesaSettings {
                base_url: var("MPESA_BASE_URL").unwrap_or(defaults.mpesa.base_url),
                consumer_key: non_empty("MPESA_CONSUMER_KEY"),
                consumer_secret: non_empty("MPESA_CONSUMER_SECRET"),
                shortcode: var("MPESA_SHORTCODE").unwrap_or(defaults.mpesa.shortcode),
                passkey: var("MPESA_PASSKEY").unwrap_or_default(),
                callback_url: var("MPESA_CALLBACK_URL").unwrap_or(defaults.mpesa.callback_url),
                timeout: parsed(&var, "MPESA_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.mpesa.timeout),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 5,
            low_stock_threshold: 5,
            mpesa: MpesaSettings {
                base_url: SANDBOX_BASE_URL.to_string(),
                consumer_key: None,
                consumer_secret: None,
                shortcode: "174379".to_string(),
                passkey: String::new(),
                callback_url: "http://localhost:3000/mpesa/callback".to_string(),
                timeout: Duration::from_secs(30),
            },
        }
    }
}
