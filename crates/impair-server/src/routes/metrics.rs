use axum::extract::State;
use axum::Json;
use chrono::Utc;
use impair_core::MetricsSnapshot;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/metrics: dashboard aggregates.
pub async fn get_metrics(
    State(app): State<AppState>,
) -> Result<Json<MetricsSnapshot>, AppError> {
    let orchestrator = app.orchestrator.clone();
    Ok(Json(
        blocking(move || orchestrator.metrics(Utc::now())).await?,
    ))
}

/// GET /api/status: the active run, if any.
pub async fn get_status(State(app): State<AppState>) -> Json<serde_json::Value> {
    let running = app.orchestrator.status();
    Json(serde_json::json!({
        "busy": running.is_some(),
        "running": running,
    }))
}
