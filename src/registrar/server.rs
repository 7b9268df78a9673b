//! Registrar server assembly
//!
//! Wires the chosen store backend, the expiration scheduler, the leader
//! coordinator, and the HTTP shell into one runnable instance with graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::{Backend, Config};
use crate::coordinator::{new_peer_view, Coordinator, SharedPeerView};
use crate::scheduler::Scheduler;
use crate::store::{EphemeralStore, RelationalStore, ServiceStore};

use super::api::create_router;
use super::Registrar;

/// Grace period for draining in-flight work at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// ============================================================================
// App State
// ============================================================================

/// Shared application state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    /// The registrar service
    pub registrar: Arc<Registrar>,
}

// ============================================================================
// Registrar Server
// ============================================================================

/// One runnable registrar instance
pub struct RegistrarServer {
    config: Config,
    state: AppState,
    view: SharedPeerView,
    scheduler: Scheduler,
    shutdown_tx: watch::Sender<bool>,
}

impl RegistrarServer {
    /// Assemble a server from configuration.
    ///
    /// Must be called inside a tokio runtime; the scheduler worker is
    /// spawned here. The relational backend recreates its database file.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let store: Arc<dyn ServiceStore> = match config.backend {
            Backend::Ephemeral => Arc::new(EphemeralStore::new()),
            Backend::Relational => Arc::new(
                RelationalStore::open(&config.database_file)
                    .map_err(|e| ServerError::InitError(e.to_string()))?,
            ),
        };

        let scheduler = Scheduler::spawn();
        let view = new_peer_view();
        let registrar = Arc::new(Registrar::new(store, scheduler.clone(), view.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        let state = AppState { registrar };

        Ok(Self {
            config,
            state,
            view,
            scheduler,
            shutdown_tx,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }

    /// Start the coordinator and the HTTP server; returns after a graceful
    /// shutdown completes
    pub async fn start(&self) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_endpoint;

        self.start_coordinator()
            .map_err(|e| ServerError::InitError(e.to_string()))?;

        tracing::info!(%addr, backend = %self.config.backend, "starting service registrar");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Fires on shutdown() or when the server is dropped
                let _ = shutdown_rx.changed().await;
            })
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        // Handlers drained; discard pending expirations within the grace
        if tokio::time::timeout(SHUTDOWN_GRACE, self.scheduler.stop())
            .await
            .is_err()
        {
            tracing::warn!("scheduler did not stop within the shutdown grace period");
        }

        tracing::info!("service registrar shutdown complete");
        Ok(())
    }

    /// Signal every loop to wind down
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A sender that can trigger shutdown from another task
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Spawn the leader-election loop
    fn start_coordinator(&self) -> Result<(), crate::coordinator::CoordinatorError> {
        let coordinator = Coordinator::new(
            self.config.peer_endpoints.clone(),
            self.config.poll_interval(),
            self.config.status_timeout(),
            self.view.clone(),
            self.shutdown_tx.subscribe(),
        )?;
        tokio::spawn(coordinator.run());
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::BindError(msg) => write!(f, "Failed to bind: {msg}"),
            Self::ServeError(msg) => write!(f, "Server error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================
