//! Leader coordination among peer registrars
//!
//! Every `poll_interval` the coordinator walks the configured peer list in
//! order and probes each peer's `/status` endpoint. The first peer answering
//! 200 is adopted as the leader and the local instance stands by; when no
//! peer claims the lead, the local instance promotes itself.
//!
//! The protocol is best-effort: two instances may both believe they lead for
//! one tick under partition, and one of them steps down on its next tick.
//! Coordinator failures only degrade the peer view; they never fail a user
//! request.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

// ============================================================================
// Peer View
// ============================================================================

/// Local snapshot of the leadership state.
///
/// Written only by the coordinator loop; read by the registrar on every
/// write request.
#[derive(Debug, Clone, Default)]
pub struct PeerView {
    /// Whether this instance currently leads
    pub leading: bool,

    /// When this instance took the lead
    pub leading_since: Option<DateTime<Utc>>,

    /// Base URL of the known leader when standing by
    pub leading_peer: Option<String>,
}

impl PeerView {
    /// Summarize the view as a stable role
    pub fn role(&self) -> Role {
        if self.leading {
            match self.leading_since {
                Some(since) => Role::Leading { since },
                None => Role::Unknown,
            }
        } else if let Some(leader) = &self.leading_peer {
            Role::Standby {
                leader: leader.clone(),
            }
        } else {
            Role::Unknown
        }
    }
}

/// Shared, coordinator-owned leadership state
pub type SharedPeerView = Arc<RwLock<PeerView>>;

/// Create a fresh peer view; no role until the first coordinator tick
pub fn new_peer_view() -> SharedPeerView {
    Arc::new(RwLock::new(PeerView::default()))
}

/// The stable roles a registrar may occupy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// This instance is authoritative for writes
    Leading { since: DateTime<Utc> },

    /// Another instance leads
    Standby { leader: String },

    /// No peer reachable yet and not promoted; transient
    Unknown,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Peer-polling loop maintaining the shared [`PeerView`]
pub struct Coordinator {
    peers: Vec<String>,
    poll_interval: Duration,
    client: reqwest::Client,
    view: SharedPeerView,
    shutdown: watch::Receiver<bool>,
}

impl Coordinator {
    pub fn new(
        peers: Vec<String>,
        poll_interval: Duration,
        status_timeout: Duration,
        view: SharedPeerView,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CoordinatorError> {
        let client = reqwest::Client::builder()
            .timeout(status_timeout)
            .build()
            .map_err(|e| CoordinatorError::InitError(e.to_string()))?;

        Ok(Self {
            peers,
            poll_interval,
            client,
            view,
            shutdown,
        })
    }

    /// Run until the shutdown signal flips; the first tick fires
    /// immediately so a lone instance takes the lead without waiting a full
    /// interval
    pub async fn run(self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                // Fires on shutdown() or when the server side is dropped
                _ = shutdown.changed() => {
                    tracing::debug!("coordinator stopping");
                    return;
                }
            }
        }
    }

    /// One election tick: scan peers in order, adopt the first leader found,
    /// otherwise promote self
    pub async fn poll_once(&self) {
        let mut found_leader: Option<&str> = None;

        for peer in &self.peers {
            let url = format!("{}/status", peer.trim_end_matches('/'));
            match self.client.get(&url).send().await {
                Ok(resp) => match resp.status() {
                    StatusCode::OK => {
                        found_leader = Some(peer);
                        break;
                    }
                    StatusCode::SERVICE_UNAVAILABLE => {
                        // Alive but on standby; keep scanning
                    }
                    other => {
                        tracing::warn!(peer = %peer, status = %other, "unexpected peer status");
                    }
                },
                Err(err) => {
                    tracing::debug!(peer = %peer, "peer unreachable: {err}");
                }
            }
        }

        let mut view = self.view.write().await;
        match found_leader {
            Some(peer) => {
                if view.leading {
                    tracing::info!(leader = %peer, "standing down; another registrar leads");
                }
                view.leading = false;
                view.leading_since = None;
                view.leading_peer = Some(peer.to_string());
            }
            None => {
                if !view.leading {
                    let now = Utc::now();
                    view.leading = true;
                    view.leading_since = Some(now);
                    view.leading_peer = None;
                    tracing::info!("taking the service registry lead at {now}");
                }
            }
        }
    }
}

/// Coordinator setup errors
#[derive(Debug, Clone)]
pub enum CoordinatorError {
    /// HTTP client could not be built
    InitError(String),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

// ============================================================================
// Tests
// ============================================================================
