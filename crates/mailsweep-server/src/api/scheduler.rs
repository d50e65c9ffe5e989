//! Scheduler control endpoints.
//!
//! - GET /api/scheduler - Current status
//! - POST /api/scheduler - Pause, resume or change the interval
//! - POST /api/scheduler/run - Request an immediate run

use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use mailsweep_core::{SchedulerHandle, SchedulerStatus};

use super::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status).post(update))
        .route("/run", post(run_now))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSchedulerRequest {
    pub paused: Option<bool>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RunNowResponse {
    /// False when a run was already in progress.
    pub accepted: bool,
}

fn handle(state: &AppState) -> Result<&SchedulerHandle, ApiError> {
    state
        .scheduler
        .as_ref()
        .ok_or_else(|| ApiError::not_found("scheduler is disabled"))
}

async fn status(State(state): State<AppState>) -> Result<Json<SchedulerStatus>, ApiError> {
    Ok(Json(handle(&state)?.status()))
}

/// POST /api/scheduler
///
/// Validates the interval before touching the pause state so a rejected
/// request changes nothing.
async fn update(
    State(state): State<AppState>,
    Json(body): Json<UpdateSchedulerRequest>,
) -> Result<Json<SchedulerStatus>, ApiError> {
    let scheduler = handle(&state)?;

    let mut current = scheduler.status();
    if let Some(secs) = body.interval_secs {
        current = scheduler.set_interval(Duration::from_secs(secs))?;
    }
    match body.paused {
        Some(true) => current = scheduler.pause(),
        Some(false) => current = scheduler.resume(),
        None => {}
    }

    Ok(Json(current))
}

async fn run_now(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunNowResponse>), ApiError> {
    let accepted = handle(&state)?.run_now();
    Ok((StatusCode::ACCEPTED, Json(RunNowResponse { accepted })))
}
