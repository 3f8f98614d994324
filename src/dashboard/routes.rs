//! Control API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ScanScheduler>`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::scheduler::ScanScheduler;
use crate::types::{ControlError, MarketData, ScanParameters};

pub type AppState = Arc<ScanScheduler>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub active: bool,
    pub countdown_secs: u64,
    pub last_error: Option<String>,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub auto_notify: bool,
    pub notifications: Option<NotificationStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationStats {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyResponse {
    pub auto_notify: bool,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match self {
            ControlError::AlreadyActive
            | ControlError::NotActive
            | ControlError::ParametersLocked => StatusCode::CONFLICT,
            ControlError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(scheduler): State<AppState>) -> Json<StatusResponse> {
    let state = scheduler.state().await;
    let notifications = scheduler.dispatcher().map(|d| NotificationStats {
        sent: d.sent(),
        failed: d.failed(),
        skipped: d.skipped(),
    });

    Json(StatusResponse {
        status: state.phase.to_string(),
        active: state.is_active(),
        countdown_secs: state.countdown_secs,
        last_error: state.last_error.as_ref().map(ToString::to_string),
        scans_completed: state.scans_completed,
        scans_failed: state.scans_failed,
        last_scan_at: state.last_scan_at,
        auto_notify: scheduler.auto_notify(),
        notifications,
    })
}

/// GET /api/market
pub async fn get_market(State(scheduler): State<AppState>) -> Result<Json<MarketData>, StatusCode> {
    scheduler
        .latest_market_data()
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/scan/start
pub async fn start_scan(State(scheduler): State<AppState>) -> Result<StatusCode, ControlError> {
    scheduler.start().await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/scan/stop
pub async fn stop_scan(State(scheduler): State<AppState>) -> Result<StatusCode, ControlError> {
    scheduler.stop().await?;
    Ok(StatusCode::OK)
}

/// GET /api/parameters
pub async fn get_parameters(State(scheduler): State<AppState>) -> Json<ScanParameters> {
    Json(scheduler.parameters().await)
}

/// PUT /api/parameters
pub async fn put_parameters(
    State(scheduler): State<AppState>,
    Json(params): Json<ScanParameters>,
) -> Result<Json<ScanParameters>, ControlError> {
    scheduler.set_parameters(params).await?;
    Ok(Json(scheduler.parameters().await))
}

/// PUT /api/notify
pub async fn put_notify(
    State(scheduler): State<AppState>,
    Json(req): Json<NotifyRequest>,
) -> Json<NotifyResponse> {
    scheduler.set_auto_notify(req.enabled);
    Json(NotifyResponse { auto_notify: scheduler.auto_notify() })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
