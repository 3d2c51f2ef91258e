//! API request handlers

use crate::events::{codec, ChangeBus};
use crate::pipeline::{MutationWatcher, WatcherState};
use crate::store::{Document, MemoryStore, RecordStore, StoreError};
use crate::stream::SessionManager;
use crate::Config;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<ChangeBus>,
    pub sessions: Arc<SessionManager>,
    pub watcher: Arc<MutationWatcher>,
}

impl ServerState {
    /// Wire the store, bus, session manager and watcher together.
    /// The watcher is created stopped.
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(MemoryStore::new(config.store.clone()));
        let bus = Arc::new(ChangeBus::new());
        let sessions = Arc::new(SessionManager::new(bus.clone(), config.stream.clone()));
        let watcher = Arc::new(MutationWatcher::new(
            store.clone(),
            bus.clone(),
            config.lookup_timeout,
            config.watcher_backoff,
        ));

        Self {
            store,
            bus,
            sessions,
            watcher,
        }
    }
}

pub type FeedState = Arc<ServerState>;

// ============================================================================
// Health check
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub watcher: WatcherState,
    pub subscribers: usize,
    pub sessions: usize,
}

/// Health check handler.
///
/// Returns:
/// - 200 + `"ok"` if the store is reachable and the watcher is active
/// - 200 + `"degraded"` if the store is reachable but the watcher is restarting
/// - 503 + `"unhealthy"` if the store health check fails
pub async fn health(State(state): State<FeedState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.store.health_check().await.unwrap_or(false);
    let watcher = state.watcher.state();

    let (http_status, status) = match (store_ok, watcher) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (true, WatcherState::Active) => (StatusCode::OK, "ok"),
        (true, _) => (StatusCode::OK, "degraded"),
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            watcher,
            subscribers: state.bus.subscriber_count(),
            sessions: state.sessions.active_sessions(),
        }),
    )
}

// ============================================================================
// Companies
// ============================================================================

/// Insert a company. The stored record reaches stream clients through the
/// mutation log, like any other write.
pub async fn create_company(
    State(state): State<FeedState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let Value::Object(fields) = body else {
        return Err(AppError::BadRequest(
            "Company must be a JSON object".to_string(),
        ));
    };

    let stored = state.store.insert(fields).await?;
    tracing::debug!(record_id = ?stored.get("_id"), "Company created");
    Ok((StatusCode::CREATED, Json(codec::normalize_record(stored))))
}

// ============================================================================
// Error handling
// ============================================================================

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(_) => AppError::Conflict(err.to_string()),
            StoreError::InvalidId(_) => AppError::BadRequest(err.to_string()),
        }
    }
}
