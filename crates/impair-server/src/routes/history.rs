use axum::extract::{Query, State};
use axum::Json;
use impair_core::ledger::{group_runs, HistoryPage, HistoryQuery, RunGroup};
use impair_core::types::{CommandKind, OutcomeStatus};
use serde::{Deserialize, Serialize};

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

const MAX_LIMIT: usize = 500;

/// Raw query string parameters. Empty values are treated as absent.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub search: Option<String>,
    pub status: Option<String>,
    pub command: Option<String>,
    pub sequence: Option<String>,
    pub router: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl HistoryParams {
    fn into_query(self) -> Result<HistoryQuery, AppError> {
        let defaults = HistoryQuery::default();
        let status = non_empty(self.status)
            .map(|s| s.parse::<OutcomeStatus>())
            .transpose()?;
        let command = non_empty(self.command)
            .map(|s| s.parse::<CommandKind>())
            .transpose()?;
        Ok(HistoryQuery {
            search: non_empty(self.search),
            status,
            command,
            sequence: non_empty(self.sequence),
            router: non_empty(self.router),
            limit: self.limit.unwrap_or(defaults.limit).min(MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
        })
    }
}

/// GET /api/history: filtered, newest-first page plus total match count.
pub async fn list_history(
    State(app): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, AppError> {
    let query = params.into_query()?;
    let orchestrator = app.orchestrator.clone();
    Ok(Json(
        blocking(move || orchestrator.ledger().query(&query)).await?,
    ))
}

#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    pub groups: Vec<RunGroup>,
    pub total: usize,
}

/// GET /api/history/groups: the current page clustered into runs.
pub async fn history_groups(
    State(app): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<GroupsResponse>, AppError> {
    let query = params.into_query()?;
    let orchestrator = app.orchestrator.clone();
    let window = orchestrator.config().history.group_window_ms;
    let page = blocking(move || orchestrator.ledger().query(&query)).await?;
    Ok(Json(GroupsResponse {
        groups: group_runs(&page.items, window),
        total: page.total,
    }))
}

/// DELETE /api/history: remove every recorded outcome.
pub async fn purge_history(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let orchestrator = app.orchestrator.clone();
    let removed = blocking(move || orchestrator.ledger().purge()).await?;
    tracing::info!(removed, "history purged");
    Ok(Json(serde_json::json!({ "removed": removed })))
}
