//! registrar - Service Registry for a service-oriented local cloud
//!
//! A highly-available directory of ephemeral service endpoints: providers
//! register with a lifetime, renew before expiry, and are evicted by a
//! deadline scheduler when they go silent. Consumers discover services by
//! definition and attributes. Replicated instances elect a single leader
//! through periodic peer status polling; standbys reject writes and point
//! at the current leader.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Wire contracts and core data structures
//! - [`scheduler`] - Deadline-driven expiration scheduler
//! - [`store`] - Record persistence (ephemeral and relational backends)
//! - [`registrar`] - Request-level service, HTTP API, and server shell
//! - [`coordinator`] - Leader election among peer registrars
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use registrar::config::Config;
//! use registrar::registrar::server::RegistrarServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = RegistrarServer::new(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod registrar;
pub mod scheduler;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Backend, Config};
    pub use crate::coordinator::{PeerView, Role};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{ServiceQuest, ServiceRecord, ServiceRecordList, SystemRecordList};
    pub use crate::registrar::server::RegistrarServer;
    pub use crate::registrar::{Registrar, RegistryError};
    pub use crate::scheduler::Scheduler;
    pub use crate::store::{EphemeralStore, RelationalStore, ServiceStore};
}

// Direct re-exports for convenience
pub use models::{ServiceQuest, ServiceRecord, ServiceRecordList, SystemRecord, SystemRecordList};
