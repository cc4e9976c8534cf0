use axum::http::StatusCode;
use tracing::error;

use kindred_core::CoreError;

pub fn status_for(err: CoreError) -> StatusCode {
    match err {
        CoreError::SelfPair => StatusCode::BAD_REQUEST,
        CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        CoreError::Storage(e) => {
            error!("Storage failure: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Run a blocking core call off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(status_for)
}
