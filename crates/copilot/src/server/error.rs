use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use copilot_core::ActorDeadError;
use copilot_core::store::StoreError;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The model provider is not configured.
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    /// The agent name can't be used as a conversation id.
    #[error("invalid agent name: {0:?}")]
    InvalidName(String),
    /// The agent stopped running.
    #[error(transparent)]
    AgentStopped(#[from] ActorDeadError),
    /// The history could not be restored.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidName(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingApiKey
            | ApiError::AgentStopped(_)
            | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}
