//! Application Configuration Module
//!
//! Settings for the voicenav service, loaded from the environment (and a local
//! `.env` file) into a single struct passed to the rest of the application.

use std::env;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const DEFAULT_VOICE: &str = "Puck";
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 100;
/// Capacity of the client's broadcast channel of server events.
pub const SERVER_EVENT_CAPACITY: usize = 1024;
/// Capacity of the per-session channel of classified inbound messages.
pub const INBOUND_CAPACITY: usize = 256;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: String,
    pub voice: String,
    pub capture_interval: Duration,
    pub log_level: Level,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Secret key for the Gemini Live API. Required.
    // *   `GEMINI_MODEL`: (Optional) Live model to use. Defaults to `models/gemini-2.0-flash-live-001`.
    // *   `VOICENAV_VOICE`: (Optional) Prebuilt voice name. Defaults to "Puck".
    // *   `VOICENAV_CAPTURE_INTERVAL_MS`: (Optional) Microphone send interval. Defaults to 100.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let voice = lookup("VOICENAV_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let capture_interval = match lookup("VOICENAV_CAPTURE_INTERVAL_MS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "VOICENAV_CAPTURE_INTERVAL_MS".to_string(),
                        value,
                    });
                }
            },
            None => Duration::from_millis(DEFAULT_CAPTURE_INTERVAL_MS),
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key,
            model,
            voice,
            capture_interval,
            log_level,
        })
    }
}
