pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use impair_core::Orchestrator;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router around an orchestrator handle.
///
/// The caller owns the orchestrator's control loop; without it running,
/// `POST /api/sequences/{id}/run` answers 503.
pub fn build_router(orchestrator: Orchestrator) -> Router {
    let app_state = state::AppState::new(orchestrator);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/events", get(routes::events::sse_events))
        .route("/api/status", get(routes::metrics::get_status))
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .route(
            "/api/routers",
            get(routes::routers::list_routers).post(routes::routers::create_router),
        )
        .route(
            "/api/routers/{id}",
            get(routes::routers::get_router)
                .put(routes::routers::put_router)
                .delete(routes::routers::delete_router),
        )
        .route(
            "/api/routers/{id}/probe",
            post(routes::routers::probe_router),
        )
        .route(
            "/api/sequences",
            get(routes::sequences::list_sequences).post(routes::sequences::create_sequence),
        )
        .route(
            "/api/sequences/{id}",
            get(routes::sequences::get_sequence)
                .put(routes::sequences::put_sequence)
                .delete(routes::sequences::delete_sequence),
        )
        .route(
            "/api/sequences/{id}/position",
            get(routes::sequences::get_position),
        )
        .route(
            "/api/sequences/{id}/run",
            post(routes::sequences::run_sequence),
        )
        .route(
            "/api/history",
            get(routes::history::list_history).delete(routes::history::purge_history),
        )
        .route("/api/history/groups", get(routes::history::history_groups))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Serve on an already-bound listener, running the scheduler alongside until
/// ctrl-c.
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let (orchestrator, control) = Orchestrator::open(&root)?;
    let app = build_router(orchestrator);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let scheduler = tokio::spawn(control.run(async {
        let _ = stop_rx.await;
    }));

    tracing::info!("impair API listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    let _ = stop_tx.send(());
    scheduler.await?;
    Ok(())
}
