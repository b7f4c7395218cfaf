use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use campuslink_shared::EngineError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Missing or invalid X-User-Id header")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Engine(err) => match err {
                EngineError::InvalidOperation(_) | EngineError::SelfRequest => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::AlreadyPending
                | EngineError::AlreadyConnected
                | EngineError::Blocked => StatusCode::CONFLICT,
                EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Engine(EngineError::Unavailable(detail)) => {
                tracing::warn!(%detail, "Dependency unavailable");
                "Service temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
