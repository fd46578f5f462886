pub mod events;
pub mod history;
pub mod metrics;
pub mod routers;
pub mod sequences;

use crate::error::AppError;

/// Run store and ledger I/O on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> impair_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?
        .map_err(AppError::from)
}
