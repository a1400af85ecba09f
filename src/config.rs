use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::ledger::{ActionType, PointsCatalog};
use crate::notify::HttpNotifierSettings;

/// Configuration for the civic ledger server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CivicConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Outbound email configuration
    pub notifier: NotifierConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Default points per action type
    pub points: PointsCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Require an API key on /admin and /clerk routes
    pub enable_auth: bool,
    /// Accepted API keys (never serialized)
    #[serde(skip_serializing, default)]
    pub api_keys: Vec<String>,
    /// Rate limit per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://civic.db` or `sqlite::memory:`
    pub url: String,
    /// Pool size for file databases
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Transactional email endpoint; emails are only logged when unset
    pub endpoint: Option<String>,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Mask secrets in start-up logs
    pub sanitize_logs: bool,
    /// Enable request/response logging
    pub log_requests: bool,
}

impl Default for CivicConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            security: SecurityConfig {
                enable_auth: true,
                api_keys: Vec::new(),
                rate_limit_per_minute: 120,
                max_request_size: 64 * 1024, // 64KB
            },
            database: DatabaseConfig {
                url: "sqlite://civic.db".to_string(),
                max_connections: 8,
            },
            notifier: NotifierConfig {
                endpoint: None,
                api_key: String::new(),
                sender_email: String::new(),
                sender_name: None,
                timeout_secs: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                sanitize_logs: true,
                log_requests: false,
            },
            points: PointsCatalog::default(),
        }
    }
}

impl CivicConfig {
    /// Load configuration from `CIVIC_*` environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        // Server configuration
        if let Some(host) = lookup("CIVIC_HOST") {
            config.server.host = host;
        }
        set_parsed(&lookup, "CIVIC_PORT", &mut config.server.port)?;

        // Security configuration
        set_parsed(&lookup, "CIVIC_ENABLE_AUTH", &mut config.security.enable_auth)?;
        set_parsed(
            &lookup,
            "CIVIC_RATE_LIMIT_PER_MINUTE",
            &mut config.security.rate_limit_per_minute,
        )?;
        set_parsed(&lookup, "CIVIC_MAX_REQUEST_SIZE", &mut config.security.max_request_size)?;
        config.security.api_keys = api_keys(&lookup);

        // Database configuration
        if let Some(url) = lookup("CIVIC_DATABASE_URL") {
            config.database.url = url;
        }
        set_parsed(
            &lookup,
            "CIVIC_DATABASE_MAX_CONNECTIONS",
            &mut config.database.max_connections,
        )?;

        // Notifier configuration
        config.notifier.endpoint = lookup("CIVIC_EMAIL_ENDPOINT").filter(|v| !v.trim().is_empty());
        if let Some(key) = lookup("CIVIC_EMAIL_API_KEY") {
            config.notifier.api_key = key;
        }
        if let Some(sender) = lookup("CIVIC_EMAIL_SENDER") {
            config.notifier.sender_email = sender;
        }
        config.notifier.sender_name = lookup("CIVIC_EMAIL_SENDER_NAME");
        set_parsed(&lookup, "CIVIC_EMAIL_TIMEOUT_SECS", &mut config.notifier.timeout_secs)?;

        // Logging configuration
        if let Some(level) = lookup("CIVIC_LOG_LEVEL") {
            config.logging.level = level;
        }
        set_parsed(&lookup, "CIVIC_SANITIZE_LOGS", &mut config.logging.sanitize_logs)?;
        set_parsed(&lookup, "CIVIC_LOG_REQUESTS", &mut config.logging.log_requests)?;

        // Points catalog: CIVIC_POINTS_PAGE_VISIT, CIVIC_POINTS_VOTE_CAST, ...
        for action in ActionType::ALL {
            let key = format!("CIVIC_POINTS_{}", action.as_str().to_uppercase());
            set_parsed(&lookup, &key, config.points.points_mut(action))?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }

        if self.security.enable_auth {
            if self.security.api_keys.is_empty() {
                return Err(anyhow::anyhow!(
                    "Authentication is enabled but no API key is configured (CIVIC_API_KEY)"
                ));
            }
            if let Some(short) = self.security.api_keys.iter().find(|k| k.len() < 32) {
                return Err(anyhow::anyhow!(
                    "API key {} is too short (minimum 32 characters)",
                    sanitize_for_logging(short)
                ));
            }
        }

        if self.security.max_request_size == 0 {
            return Err(anyhow::anyhow!("Maximum request size must be non-zero"));
        }

        if let Some(endpoint) = &self.notifier.endpoint {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid CIVIC_EMAIL_ENDPOINT: {}", endpoint))?;
            if self.notifier.api_key.is_empty() || self.notifier.sender_email.is_empty() {
                return Err(anyhow::anyhow!(
                    "CIVIC_EMAIL_API_KEY and CIVIC_EMAIL_SENDER are required with an email endpoint"
                ));
            }
        }

        self.points
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid points catalog: {}", e))?;

        Ok(())
    }

    /// Settings for the HTTP notifier, if one is configured
    pub fn http_notifier(&self) -> Option<HttpNotifierSettings> {
        self.notifier.endpoint.as_ref().map(|endpoint| HttpNotifierSettings {
            endpoint: endpoint.clone(),
            api_key: self.notifier.api_key.clone(),
            sender_email: self.notifier.sender_email.clone(),
            sender_name: self.notifier.sender_name.clone(),
            timeout_secs: self.notifier.timeout_secs,
        })
    }
}

fn set_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value", key))?;
    }
    Ok(())
}

/// Primary key from CIVIC_API_KEY plus comma-separated CIVIC_API_KEYS
fn api_keys(lookup: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut keys = Vec::new();

    if let Some(key) = lookup("CIVIC_API_KEY") {
        if !key.is_empty() {
            keys.push(key);
        }
    }

    if let Some(extra_keys) = lookup("CIVIC_API_KEYS") {
        for key in extra_keys.split(',') {
            let key = key.trim();
            if !key.is_empty() {
                keys.push(key.to_string());
            }
        }
    }

    if keys.is_empty() {
        warn!("No API keys configured - authentication will fail if enabled");
    } else {
        info!("Loaded {} API key(s) for authentication", keys.len());
    }

    keys
}

/// Sanitize sensitive data for logging
pub fn sanitize_for_logging(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let keep = if chars.len() > 20 { 6 } else { 2 };
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}***{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const KEY: &str = "k3y-0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("my_authenticator_123"), "my***23");
        assert_eq!(sanitize_for_logging("short"), "***");
        assert_eq!(sanitize_for_logging(KEY), "k3y-01***abcdef");
    }

    #[test]
    fn test_auth_requires_key() {
        let err = CivicConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("no API key"));

        let config = CivicConfig::from_lookup(lookup(&[("CIVIC_ENABLE_AUTH", "false")])).unwrap();
        assert!(!config.security.enable_auth);
    }

    #[test]
    fn test_overrides_and_points() {
        let config = CivicConfig::from_lookup(lookup(&[
            ("CIVIC_API_KEY", KEY),
            ("CIVIC_PORT", "9090"),
            ("CIVIC_DATABASE_URL", "sqlite::memory:"),
            ("CIVIC_POINTS_VOTE_CAST", "7"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.points.points_for(ActionType::VoteCast), 7);
        assert!(config.http_notifier().is_none());
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = CivicConfig::from_lookup(lookup(&[("CIVIC_API_KEY", KEY), ("CIVIC_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("CIVIC_PORT"));

        let err = CivicConfig::from_lookup(lookup(&[
            ("CIVIC_API_KEY", KEY),
            ("CIVIC_POINTS_PAGE_VISIT", "-3"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("points"));
    }

    #[test]
    fn test_email_endpoint_requires_credentials() {
        let err = CivicConfig::from_lookup(lookup(&[
            ("CIVIC_API_KEY", KEY),
            ("CIVIC_EMAIL_ENDPOINT", "https://api.brevo.com/v3/smtp/email"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CIVIC_EMAIL_SENDER"));
    }
}
