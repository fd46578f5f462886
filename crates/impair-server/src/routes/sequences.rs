use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use impair_core::cycle::{cycle_position, CyclePosition};
use impair_core::executor::RunTicket;
use impair_core::sequence::Sequence;
use serde::Serialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// A sequence together with its current countdown.
#[derive(Debug, Serialize)]
pub struct SequenceView {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub position: CyclePosition,
}

impl From<Sequence> for SequenceView {
    fn from(sequence: Sequence) -> Self {
        let position = cycle_position(Utc::now(), sequence.last_run, sequence.cycle_duration);
        Self { sequence, position }
    }
}

/// GET /api/sequences
pub async fn list_sequences(
    State(app): State<AppState>,
) -> Result<Json<Vec<SequenceView>>, AppError> {
    let store = app.orchestrator.sequences().clone();
    let list = blocking(move || store.list()).await?;
    Ok(Json(list.into_iter().map(SequenceView::from).collect()))
}

/// POST /api/sequences: validated before anything is written.
pub async fn create_sequence(
    State(app): State<AppState>,
    Json(sequence): Json<Sequence>,
) -> Result<(StatusCode, Json<SequenceView>), AppError> {
    let store = app.orchestrator.sequences().clone();
    let routers = app.orchestrator.routers().clone();
    let created = blocking(move || store.create(sequence, &routers)).await?;
    tracing::info!(sequence_id = %created.id, actions = created.actions.len(), "sequence created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /api/sequences/{id}
pub async fn get_sequence(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SequenceView>, AppError> {
    let store = app.orchestrator.sequences().clone();
    Ok(Json(blocking(move || store.get(&id)).await?.into()))
}

/// PUT /api/sequences/{id}: replace a definition; a shorter cycle clamps
/// offsets.
pub async fn put_sequence(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(sequence): Json<Sequence>,
) -> Result<Json<SequenceView>, AppError> {
    if sequence.id != id {
        return Err(AppError::bad_request(format!(
            "body id '{}' does not match path id '{id}'",
            sequence.id
        )));
    }
    let store = app.orchestrator.sequences().clone();
    let routers = app.orchestrator.routers().clone();
    let updated = blocking(move || store.update(sequence, &routers)).await?;
    Ok(Json(updated.into()))
}

/// DELETE /api/sequences/{id}
pub async fn delete_sequence(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let store = app.orchestrator.sequences().clone();
    blocking(move || store.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sequences/{id}/position: cycle countdown.
pub async fn get_position(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CyclePosition>, AppError> {
    let orchestrator = app.orchestrator.clone();
    Ok(Json(
        blocking(move || orchestrator.position(&id, Utc::now())).await?,
    ))
}

/// POST /api/sequences/{id}/run: start now; 409 while another run is active.
pub async fn run_sequence(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunTicket>), AppError> {
    let ticket = app.orchestrator.trigger(&id).await?;
    tracing::info!(sequence_id = %id, run_id = %ticket.run_id, "manual run started");
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}
