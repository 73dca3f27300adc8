//! Scheduler endpoints: `POST /scheduler/pm/run` and `GET /scheduler/pm/status`.
//!
//! Only a setup failure (due rules cannot be selected at all) yields a 500;
//! per-rule failures are reported inside a 200 summary.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};
use upkeep_core::UpkeepError;
use upkeep_scheduler::RunOptions;

use crate::app::AppState;
use crate::auth::authorize;

type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    pub dry_run: Option<bool>,
    pub batch_size: Option<usize>,
    pub org_id: Option<String>,
}

/// POST /scheduler/pm/run?dry_run=&batch_size=&org_id=
pub async fn run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RunQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.gateway.auth, &headers).map_err(|e| auth_error(&e))?;

    let batch_size = state
        .config
        .scheduler
        .resolve_batch_size(query.batch_size)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "error": "batch_size must be at least 1"})),
            )
        })?;

    let options = RunOptions {
        org_id: query.org_id.filter(|id| !id.is_empty()),
        batch_size,
        dry_run: query.dry_run.unwrap_or(false),
    };

    match state.runner.run(&options).await {
        Ok(summary) => Ok(Json(json!({"status": "ok", "summary": summary}))),
        Err(e) => {
            error!(error = %e, org_id = ?options.org_id, "PM scheduler pass failed to start");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()})),
            ))
        }
    }
}

/// GET /scheduler/pm/status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.gateway.auth, &headers).map_err(|e| auth_error(&e))?;

    let now = Utc::now();
    let status = state.runner.status(now).await.map_err(|e| {
        error!(error = %e, "PM scheduler status query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "error": e.to_string()})),
        )
    })?;

    Ok(Json(json!({
        "status": "ok",
        "total_active_rules": status.total_active_rules,
        "recent_evaluations": status.recent_evaluations,
        "last_evaluation": status.last_evaluation,
        "timestamp": now,
    })))
}

fn auth_error(e: &UpkeepError) -> ApiError {
    warn!(reason = %e, "scheduler request rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"status": "error", "error": e.to_string(), "code": e.code()})),
    )
}
