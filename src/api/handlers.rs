use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::{AlertCatalogCache, CatalogStats};
use crate::data::AlertId;
use crate::dispatch::{EvaluationStatsSnapshot, HistoryEntry, NotificationDispatcher};
use crate::refresh::RefreshStats;
use crate::schedule::{Scheduler, SchedulerStatus};
use crate::state::NotificationStateCache;
use crate::worker::{EvaluationWorkerPool, WorkerStats};

/// Application state shared across handlers
pub struct AppState {
    pub catalog: Arc<AlertCatalogCache>,
    pub state_cache: Arc<NotificationStateCache>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub scheduler: Arc<dyn Scheduler>,
    pub workers: Option<Arc<EvaluationWorkerPool>>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub catalog_initialized: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        catalog_initialized: state.catalog.is_initialized(),
    })
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub evaluation: EvaluationStatsSnapshot,
    pub catalog: CatalogStats,
    pub notification_state: RefreshStats,
    pub scheduler: SchedulerStatus,
    pub workers: Option<WorkerStats>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        evaluation: state.dispatcher.stats(),
        catalog: state.catalog.stats(),
        notification_state: state.state_cache.stats(),
        scheduler: state.scheduler.status(),
        workers: state.workers.as_ref().map(|w| w.stats()),
    })
}

// ============================================================================
// History
// ============================================================================

#[derive(Deserialize)]
pub struct HistoryParams {
    pub alert_id: Option<AlertId>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(100);
    if limit == 0 || limit > 1000 {
        return Err(ApiError::BadRequest(
            "limit must be between 1 and 1000".to_string(),
        ));
    }

    let log = state.dispatcher.history();
    let entries = match params.alert_id {
        Some(id) => log.for_alert(id).into_iter().take(limit).collect(),
        None => log.recent(limit),
    };
    Ok(Json(HistoryResponse { entries }))
}

// ============================================================================
// Scheduling switch
// ============================================================================

#[derive(Deserialize)]
pub struct SchedulingRequest {
    pub enabled: bool,
}

pub async fn set_scheduling(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SchedulingRequest>,
) -> Json<SchedulerStatus> {
    state.scheduler.set_enabled(request.enabled);
    Json(state.scheduler.status())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
