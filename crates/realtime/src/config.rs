use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub credential_url: String,
    pub signaling_url: String,
    pub model: String,
    pub ice_servers: Vec<String>,
    pub subscribe_webhook: Option<String>,
    pub contact_webhook: Option<String>,
    pub source_tag: String,
    pub negotiation_timeout: Duration,
    pub webhook_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let credential_url = std::env::var("CREDENTIAL_URL")
            .map_err(|_| ConfigError::MissingVar("CREDENTIAL_URL".to_string()))?;

        let signaling_url = std::env::var("SIGNALING_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/realtime".to_string());

        let model = std::env::var("REALTIME_MODEL").unwrap_or_else(|_| "gpt-realtime".to_string());

        let ice_servers_str = std::env::var("ICE_SERVERS")
            .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string());
        let ice_servers: Vec<String> = ice_servers_str
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if ice_servers.is_empty() {
            return Err(ConfigError::InvalidValue(
                "ICE_SERVERS".to_string(),
                "at least one server is required".to_string(),
            ));
        }

        let subscribe_webhook = non_empty_var("SUBSCRIBE_WEBHOOK");
        let contact_webhook = non_empty_var("CONTACT_WEBHOOK");

        let source_tag = std::env::var("TOOL_SOURCE_TAG")
            .unwrap_or_else(|_| voicebridge_core::DEFAULT_SOURCE_TAG.to_string());

        let negotiation_timeout = duration_ms_var("NEGOTIATION_TIMEOUT_MS", 10_000)?;
        let webhook_timeout = duration_ms_var("WEBHOOK_TIMEOUT_MS", 8_000)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            credential_url,
            signaling_url,
            model,
            ice_servers,
            subscribe_webhook,
            contact_webhook,
            source_tag,
            negotiation_timeout,
            webhook_timeout,
            log_level,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn duration_ms_var(name: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_millis(default_ms)),
        Ok(raw) => match raw.parse::<u64>() {
            Ok(0) => Err(ConfigError::InvalidValue(
                name.to_string(),
                "timeout must be greater than zero".to_string(),
            )),
            Ok(ms) => Ok(Duration::from_millis(ms)),
            Err(e) => Err(ConfigError::InvalidValue(name.to_string(), e.to_string())),
        },
    }
}
