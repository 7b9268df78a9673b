//! Unified error handling for the registrar crate
//!
//! Each subsystem keeps its own error enum; this module consolidates them
//! into a single [`Error`] usable across module boundaries, with a coarse
//! [`ErrorCategory`] classification for handling strategies.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::config::ConfigError;
pub use crate::coordinator::CoordinatorError;
pub use crate::registrar::server::ServerError;
pub use crate::registrar::RegistryError;
pub use crate::store::StoreError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request-level refusals (leadership, preconditions, missing records)
    Registry,
    /// Store and persistence errors
    Storage,
    /// Peer polling and HTTP client errors
    Network,
    /// Configuration and validation errors
    Config,
    /// Server assembly and serving errors
    Server,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the registrar crate
#[derive(Error, Debug)]
pub enum Error {
    /// Request-level registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Coordinator errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Registry(_) => ErrorCategory::Registry,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Coordinator(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Server,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Check if this error is recoverable by retrying later
    pub fn is_recoverable(&self) -> bool {
        match self {
            // A standby instance may lead on the next coordinator tick
            Self::Registry(RegistryError::NotLeader { .. }) => true,
            Self::Registry(_) => false,
            Self::Store(StoreError::Database(_)) => false,
            Self::Store(_) => false,
            // Peer and transport faults heal on the next tick
            Self::Coordinator(_) | Self::Http(_) => true,
            Self::Io(_) => true,
            Self::Json(_) | Self::Config(_) | Self::Server(_) | Self::Other { .. } => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
