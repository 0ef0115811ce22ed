use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication failed")]
    Auth,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to reach InfluxDB")]
    BackendUnreachable(#[source] reqwest::Error),

    #[error("InfluxDB query failed: {body}")]
    BackendError { status: StatusCode, body: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Auth => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::BackendUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::BackendError { status, .. } => *status,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing detail. Transport causes stay in the logs.
    fn detail(&self) -> String {
        match self {
            ServiceError::InvalidRequest(msg) | ServiceError::Internal(msg) => msg.clone(),
            ServiceError::Auth => "missing or invalid x-api-key header".to_string(),
            ServiceError::BackendUnreachable(_) => "failed to query InfluxDB".to_string(),
            ServiceError::BackendError { body, .. } => body.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ServiceError::InvalidRequest(_) | ServiceError::Auth => {
                warn!(error = %self, "request rejected");
            }
            ServiceError::BackendUnreachable(cause) => {
                error!(error = %self, cause = %cause, "request failed");
            }
            _ => {
                error!(error = %self, status = status.as_u16(), "request failed");
            }
        }

        let body = ErrorBody {
            error: self.to_string(),
            message: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}
