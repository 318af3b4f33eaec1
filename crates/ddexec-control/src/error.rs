use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures of a control-plane operation, reported to callers as HTTP statuses.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Path exists but is not a directory: {0}")]
    NotADirectory(String),

    #[error("Not allowed to use {0} as a source for a bind mount")]
    Forbidden(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ControlError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ControlError::NotADirectory(_) => (StatusCode::CONFLICT, "NOT_A_DIRECTORY"),
            ControlError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ControlError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            ControlError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Failures talking to the control-plane service.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Control socket unreachable: {0}")]
    Transport(String),

    #[error("Control request {route} failed with status {status}: {message}")]
    Status {
        route: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid control response: {0}")]
    Decode(#[from] serde_json::Error),
}
