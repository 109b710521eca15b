//! Console configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;

use comanda_session::EngineConfig;
use comanda_types::SessionMode;

/// Top-level console configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// External endpoint URLs.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Session identity.
    #[serde(default)]
    pub session: SessionConfig,

    /// Engine tuning, passed through to the session engine.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External collaborator endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    /// Credential (token) endpoint URL.
    #[serde(default = "default_credential_url")]
    pub credential_url: String,

    /// Offer/answer signaling endpoint URL.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Order collaborator base URL.
    #[serde(default = "default_order_url")]
    pub order_url: String,
}

/// Which session to open.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Restaurant identifier.
    #[serde(default = "default_restaurant_id")]
    pub restaurant_id: String,

    /// Operating mode.
    #[serde(default = "default_mode")]
    pub mode: SessionMode,

    /// Microphone capture backend: `parec` or `silence`.
    #[serde(default = "default_capture")]
    pub capture: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "comanda_session=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_credential_url() -> String {
    "http://127.0.0.1:8080/voice/token".to_string()
}

fn default_signaling_url() -> String {
    "http://127.0.0.1:8080/voice/offer".to_string()
}

fn default_order_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_restaurant_id() -> String {
    "demo".to_string()
}

fn default_mode() -> SessionMode {
    SessionMode::Employee
}

fn default_capture() -> String {
    "parec".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            credential_url: default_credential_url(),
            signaling_url: default_signaling_url(),
            order_url: default_order_url(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restaurant_id: default_restaurant_id(),
            mode: default_mode(),
            capture: default_capture(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `COMANDA_CREDENTIAL_URL` overrides `endpoints.credential_url`
/// - `COMANDA_SIGNALING_URL` overrides `endpoints.signaling_url`
/// - `COMANDA_ORDER_URL` overrides `endpoints.order_url`
/// - `COMANDA_RESTAURANT_ID` overrides `session.restaurant_id`
/// - `COMANDA_LOG_LEVEL` overrides `logging.level`
/// - `COMANDA_LOG_JSON` overrides `logging.json` (set to "true")
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(url) = std::env::var("COMANDA_CREDENTIAL_URL") {
        config.endpoints.credential_url = url;
    }
    if let Ok(url) = std::env::var("COMANDA_SIGNALING_URL") {
        config.endpoints.signaling_url = url;
    }
    if let Ok(url) = std::env::var("COMANDA_ORDER_URL") {
        config.endpoints.order_url = url;
    }
    if let Ok(id) = std::env::var("COMANDA_RESTAURANT_ID") {
        config.session.restaurant_id = id;
    }
    if let Ok(level) = std::env::var("COMANDA_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("COMANDA_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
