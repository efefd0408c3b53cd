use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use tally_engine::{PollError, PollService};
use tally_types::api::ErrorResponse;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Poll(PollError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Poll(PollError::InvalidState(_)) => StatusCode::CONFLICT,
            Self::Poll(PollError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Poll(PollError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Self::Poll(PollError::Conflict) => StatusCode::CONFLICT,
            Self::Poll(PollError::Storage(_)) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Poll(e) => e.kind(),
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Join(_) => "STORAGE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {:#}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Run an engine call on the blocking pool; SQLite work must stay off the
/// async workers.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&PollService) -> tally_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    Ok(tokio::task::spawn_blocking(move || f(&service)).await??)
}
