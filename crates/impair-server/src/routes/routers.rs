use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use impair_core::router::RouterNode;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/routers: all routers, sorted by id.
pub async fn list_routers(
    State(app): State<AppState>,
) -> Result<Json<Vec<RouterNode>>, AppError> {
    let routers = app.orchestrator.routers().clone();
    Ok(Json(blocking(move || routers.list()).await?))
}

/// POST /api/routers: register a router.
pub async fn create_router(
    State(app): State<AppState>,
    Json(router): Json<RouterNode>,
) -> Result<(StatusCode, Json<RouterNode>), AppError> {
    let routers = app.orchestrator.routers().clone();
    let created = blocking(move || {
        routers.create(&router)?;
        Ok(router)
    })
    .await?;
    tracing::info!(router = %created.id, "router created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/routers/{id}
pub async fn get_router(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RouterNode>, AppError> {
    let routers = app.orchestrator.routers().clone();
    Ok(Json(blocking(move || routers.get(&id)).await?))
}

/// PUT /api/routers/{id}: replace a router definition.
pub async fn put_router(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(router): Json<RouterNode>,
) -> Result<Json<RouterNode>, AppError> {
    if router.id != id {
        return Err(AppError::bad_request(format!(
            "body id '{}' does not match path id '{id}'",
            router.id
        )));
    }
    let routers = app.orchestrator.routers().clone();
    let updated = blocking(move || routers.update(&router)).await?;
    Ok(Json(updated))
}

/// DELETE /api/routers/{id}
pub async fn delete_router(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let routers = app.orchestrator.routers().clone();
    let deleted = id.clone();
    blocking(move || routers.delete(&id)).await?;
    tracing::info!(router = %deleted, "router deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/routers/{id}/probe: read version and interfaces from the device.
pub async fn probe_router(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (router, device) = app.orchestrator.probe_router(&id).await?;
    Ok(Json(serde_json::json!({
        "router": router,
        "device": device,
    })))
}
