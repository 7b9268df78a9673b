//! REST API handlers for the registrar
//!
//! One axum binding of the transport-agnostic contract: JSON bodies, RFC-3339
//! timestamps, and the bit-exact `/status` text consumed by peer registrars
//! during leader election.

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::coordinator::Role;
use crate::models::{ServiceQuest, ServiceRecord, ServiceRecordList, SystemRecordList};

use super::server::AppState;
use super::RegistryError;

// ============================================================================
// API Response Types
// ============================================================================

/// Error body returned alongside non-2xx statuses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,

    /// Known leader endpoint, set on `NotLeader` so callers can redirect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            leader: None,
        }
    }
}

/// Map a registry error onto its wire status and body
fn error_response(err: &RegistryError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        RegistryError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::Stale { .. } => StatusCode::PRECONDITION_FAILED,
        RegistryError::Conflict { .. } => StatusCode::CONFLICT,
        RegistryError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = ErrorResponse::new(err.to_string());
    if let RegistryError::NotLeader { leader } = err {
        body.leader = leader.clone();
    }
    (status, Json(body))
}

// ============================================================================
// Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register_service).put(register_service))
        .route("/query", get(list_services).post(discover_services))
        .route("/unregister/:id", delete(unregister_service))
        .route("/status", get(role_status))
        .route("/syslist", get(system_list))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new service record (`id == 0`) or renew an existing one
/// (`id > 0`). POST and PUT are equivalent.
async fn register_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceRecord>, JsonRejection>,
) -> axum::response::Response {
    let Json(record) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            let err = RegistryError::MalformedPayload(rejection.body_text());
            return error_response(&err).into_response();
        }
    };

    let result = if record.id == 0 {
        state.registrar.register(record).await
    } else {
        state.registrar.renew(record).await
    };

    match result {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Snapshot of every currently registered service
async fn list_services(State(state): State<AppState>) -> axum::response::Response {
    match state.registrar.list().await {
        Ok(records) => (StatusCode::OK, Json(ServiceRecordList::new(records))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Attribute-filtered discovery, driven by the Orchestrator
async fn discover_services(
    State(state): State<AppState>,
    payload: Result<Json<ServiceQuest>, JsonRejection>,
) -> axum::response::Response {
    let Json(quest) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            let err = RegistryError::MalformedPayload(rejection.body_text());
            return error_response(&err).into_response();
        }
    };

    match state.registrar.discover(&quest).await {
        Ok(records) => (StatusCode::OK, Json(ServiceRecordList::new(records))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Remove a record by id, e.g. when a provider system shuts down
async fn unregister_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    match state.registrar.unregister(id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Report the registrar's role; peers parse this during election, so the
/// leading body prefix and status codes are contractual
async fn role_status(State(state): State<AppState>) -> axum::response::Response {
    match state.registrar.role().await {
        Role::Leading { since } => (
            StatusCode::OK,
            format!("lead Service Registrar since {}", since.to_rfc3339()),
        )
            .into_response(),
        Role::Standby { leader } => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("On standby, leading registrar is {leader}"),
        )
            .into_response(),
        Role::Unknown => {
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable".to_string()).into_response()
        }
    }
}

/// Distinct provider systems currently in the registry
async fn system_list(State(state): State<AppState>) -> axum::response::Response {
    match state.registrar.systems().await {
        Ok(systems) => (StatusCode::OK, Json(SystemRecordList::new(systems))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
