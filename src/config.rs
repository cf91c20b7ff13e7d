use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "demo.ncompass.tech";
pub const DEFAULT_PORT: u16 = 12347;
pub const DEFAULT_CHUNK_DURATION_MS: u32 = 65;

pub const API_KEY_VAR: &str = "DENOISE_API_KEY";
pub const HOST_VAR: &str = "DENOISE_HOST";
pub const PORT_VAR: &str = "DENOISE_PORT";
pub const SCHEME_VAR: &str = "DENOISE_SCHEME";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key: {reason}")]
    InvalidKeyFormat { reason: String },
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// WebSocket scheme of the denoising endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Scheme {
    Ws,
    Wss,
}

/// Where the denoising service lives and how to authenticate against it
#[derive(Debug)]
pub struct EndpointConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    api_key: SecretBox<String>,
}

impl EndpointConfig {
    pub fn new(
        scheme: Scheme,
        host: impl Into<String>,
        port: u16,
        api_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: HOST_VAR.to_string(),
                reason: "host cannot be empty".to_string(),
            });
        }
        if port == 0 {
            return Err(ConfigError::InvalidValue {
                name: PORT_VAR.to_string(),
                reason: "port cannot be 0".to_string(),
            });
        }

        let api_key = api_key.into();
        Self::validate_key_format(&api_key)?;

        Ok(Self {
            scheme,
            host,
            port,
            api_key: SecretBox::new(Box::new(api_key)),
        })
    }

    /// Load endpoint configuration from environment variables (and `.env` if present)
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist
        Self::from_env()
    }

    /// Build the configuration from the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            env::var(API_KEY_VAR).map_err(|_| ConfigError::MissingEnvVar(API_KEY_VAR.to_string()))?;
        let host = env::var(HOST_VAR).unwrap_or_else(|_| DEFAULT_HOST.to_string());

        let port = match env::var(PORT_VAR) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                name: PORT_VAR.to_string(),
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let scheme = match env::var(SCHEME_VAR) {
            Ok(raw) => raw
                .trim()
                .to_ascii_lowercase()
                .parse::<Scheme>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: SCHEME_VAR.to_string(),
                    reason: format!("expected 'ws' or 'wss', got '{}'", raw),
                })?,
            Err(_) => Scheme::Wss,
        };

        Self::new(scheme, host, port, api_key)
    }

    /// The key is embedded as a URL path segment, so it must not contain separators
    fn validate_key_format(key: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "API key cannot be empty".to_string(),
            });
        }
        if let Some(c) = key
            .chars()
            .find(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace())
        {
            return Err(ConfigError::InvalidKeyFormat {
                reason: format!("API key contains forbidden character {:?}", c),
            });
        }
        Ok(())
    }

    /// Get the API key (use only when building the connection target)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Network tuning for one streaming run
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long to wait for the response to a single chunk
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(10000),
            connect_timeout: Duration::from_millis(10000),
        }
    }
}
