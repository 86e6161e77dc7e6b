//! Proxy error type and its mapping to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use mcphub_conn::ManagerError;

/// HTTP-facing error for every proxy endpoint.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Invalid input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unknown server id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server exists but has no live session.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The upstream server misbehaved.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<ManagerError> for ProxyError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Validation(msg) => Self::BadRequest(msg),
            ManagerError::NotFound(id) => Self::NotFound(format!("server '{id}'")),
            ManagerError::NotConnected(id) => Self::NotConnected(format!("server '{id}'")),
            ManagerError::Transport(msg) | ManagerError::Protocol(msg) => Self::Upstream(msg),
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotConnected(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
