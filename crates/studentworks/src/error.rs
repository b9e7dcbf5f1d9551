use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Failure tag handed across the presentation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    NotFound,
    InvalidTransition,
    StorageUnavailable,
    Forbidden,
}

impl FailureKind {
    pub const fn label(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::InvalidTransition => "invalid_transition",
            FailureKind::StorageUnavailable => "storage_unavailable",
            FailureKind::Forbidden => "forbidden",
        }
    }

    pub const fn status_code(self) -> StatusCode {
        match self {
            FailureKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::InvalidTransition => StatusCode::CONFLICT,
            FailureKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureKind::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

/// Implemented by every engine error so callers can branch on the tag alone.
pub trait TaggedFailure: std::error::Error {
    fn kind(&self) -> FailureKind;
}

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}
