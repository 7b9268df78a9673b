//! Configuration management for the registrar
//!
//! Settings come from `REGISTRAR_*` environment variables, optionally
//! overridden by command-line flags; there is no configuration file.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process memory only; registrations are lost on restart
    Ephemeral,

    /// Normalized sqlite schema; the file is recreated at startup
    Relational,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ephemeral" => Ok(Self::Ephemeral),
            "relational" => Ok(Self::Relational),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                reason: format!("'{other}' is not one of: ephemeral, relational"),
            }),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ephemeral => write!(f, "ephemeral"),
            Self::Relational => write!(f, "relational"),
        }
    }
}

/// Configuration for one registrar instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host and port this instance binds
    pub bind_endpoint: SocketAddr,

    /// Base URLs of the other registrars in the local cloud, in poll order
    pub peer_endpoints: Vec<String>,

    /// Store backend
    pub backend: Backend,

    /// Database file path (relational backend only)
    pub database_file: PathBuf,

    /// Coordinator tick in seconds
    pub poll_interval_seconds: u64,

    /// Outbound peer status poll deadline in seconds
    pub peer_status_timeout_seconds: u64,

    /// Emit a trace span per HTTP request
    pub enable_request_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_endpoint: "0.0.0.0:8443".parse().unwrap(),
            peer_endpoints: Vec::new(),
            backend: Backend::Ephemeral,
            database_file: PathBuf::from("serviceRegistry.db"),
            poll_interval_seconds: 5,
            peer_status_timeout_seconds: 2,
            enable_request_logging: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Ok(bind) = std::env::var("REGISTRAR_BIND") {
            builder = builder.bind_endpoint_str(&bind)?;
        }
        if let Ok(peers) = std::env::var("REGISTRAR_PEERS") {
            builder = builder.peer_endpoints(
                peers
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Ok(backend) = std::env::var("REGISTRAR_BACKEND") {
            builder = builder.backend(backend.parse()?);
        }
        if let Ok(path) = std::env::var("REGISTRAR_DATABASE_FILE") {
            builder = builder.database_file(path);
        }
        if let Ok(secs) = std::env::var("REGISTRAR_POLL_INTERVAL") {
            builder = builder.poll_interval_seconds(parse_seconds("poll_interval_seconds", &secs)?);
        }
        if let Ok(secs) = std::env::var("REGISTRAR_STATUS_TIMEOUT") {
            builder = builder
                .peer_status_timeout_seconds(parse_seconds("peer_status_timeout_seconds", &secs)?);
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_seconds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.peer_status_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "peer_status_timeout_seconds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for peer in &self.peer_endpoints {
            if !peer.starts_with("http://") && !peer.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    field: "peer_endpoints".to_string(),
                    reason: format!("'{peer}' must be an http(s) base URL"),
                });
            }
        }
        if self.backend == Backend::Relational && self.database_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database_file".to_string(),
            });
        }
        Ok(())
    }

    /// Coordinator tick as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Outbound status poll deadline as a duration
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_status_timeout_seconds)
    }
}

fn parse_seconds(field: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{value}' is not a number of seconds"),
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    bind_endpoint: Option<SocketAddr>,
    peer_endpoints: Option<Vec<String>>,
    backend: Option<Backend>,
    database_file: Option<PathBuf>,
    poll_interval_seconds: Option<u64>,
    peer_status_timeout_seconds: Option<u64>,
    enable_request_logging: Option<bool>,
}

impl ConfigBuilder {
    /// Set bind endpoint
    pub fn bind_endpoint(mut self, addr: SocketAddr) -> Self {
        self.bind_endpoint = Some(addr);
        self
    }

    /// Set bind endpoint from string
    pub fn bind_endpoint_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_endpoint = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_endpoint".to_string(),
            reason: format!("invalid address: {addr}"),
        })?);
        Ok(self)
    }

    /// Set peer endpoints
    pub fn peer_endpoints(mut self, peers: Vec<String>) -> Self {
        self.peer_endpoints = Some(peers);
        self
    }

    /// Set store backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set database file path
    pub fn database_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_file = Some(path.into());
        self
    }

    /// Set coordinator tick
    pub fn poll_interval_seconds(mut self, secs: u64) -> Self {
        self.poll_interval_seconds = Some(secs);
        self
    }

    /// Set peer status poll deadline
    pub fn peer_status_timeout_seconds(mut self, secs: u64) -> Self {
        self.peer_status_timeout_seconds = Some(secs);
        self
    }

    /// Enable/disable per-request tracing
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let config = Config {
            bind_endpoint: self.bind_endpoint.unwrap_or(defaults.bind_endpoint),
            peer_endpoints: self.peer_endpoints.unwrap_or(defaults.peer_endpoints),
            backend: self.backend.unwrap_or(defaults.backend),
            database_file: self.database_file.unwrap_or(defaults.database_file),
            poll_interval_seconds: self
                .poll_interval_seconds
                .unwrap_or(defaults.poll_interval_seconds),
            peer_status_timeout_seconds: self
                .peer_status_timeout_seconds
                .unwrap_or(defaults.peer_status_timeout_seconds),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{field}': {reason}")
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {field}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.peer_status_timeout_seconds, 2);
        assert_eq!(config.backend, Backend::Ephemeral);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .bind_endpoint_str("127.0.0.1:9443")
            .unwrap()
            .backend(Backend::Relational)
            .database_file("/tmp/reg.db")
            .peer_endpoints(vec!["http://other:8443".to_string()])
            .poll_interval_seconds(1)
            .build()
            .unwrap();

        assert_eq!(config.bind_endpoint.port(), 9443);
        assert_eq!(config.backend, Backend::Relational);
        assert_eq!(config.peer_endpoints.len(), 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = Config::builder().poll_interval_seconds(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_non_http_peer_rejected() {
        let result = Config::builder()
            .peer_endpoints(vec!["ftp://peer:21".to_string()])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("ephemeral".parse::<Backend>().unwrap(), Backend::Ephemeral);
        assert_eq!("Relational".parse::<Backend>().unwrap(), Backend::Relational);
        assert!("postgres".parse::<Backend>().is_err());
    }
}
