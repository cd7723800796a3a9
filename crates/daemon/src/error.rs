//! HTTP-facing error type.
//!
//! Component errors keep their own enums; this is the single place where an
//! error kind becomes an HTTP status. Responses render as
//! `{"error": ..., "code": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::deploy::DeployError;
use crate::state::StoreError;
use crate::validate::ValidationError;

/// Application error carried out of HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status mapped from the error kind.
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Single-sentence human-readable message.
    pub message: String,
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// 400 with a field-naming message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: msg.into(),
        }
    }

    /// 401 for missing or invalid credentials.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: msg.into(),
        }
    }

    /// 404 for absent services or tokens.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: msg.into(),
        }
    }

    /// 405 for strict method matching.
    pub fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            code: "method_not_allowed",
            message: "method not allowed".to_string(),
        }
    }

    /// 409 for uniqueness violations.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: msg.into(),
        }
    }

    /// 500 for upstream subprocess or client failures; the body names the
    /// phase and carries the upstream message verbatim.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "upstream_error",
            message: msg.into(),
        }
    }

    /// 500 for persistence failures; callers should treat as transient.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: msg.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "code": self.code }));
        (self.status, body).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::bad_request(err.0)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => AppError::bad_request(msg),
            StoreError::Persistence(err) => {
                error!(?err, "state store failure");
                AppError::internal(format!("state store: {err}"))
            }
        }
    }
}

impl From<DeployError> for AppError {
    fn from(err: DeployError) -> Self {
        match &err {
            DeployError::Busy => Self {
                status: StatusCode::CONFLICT,
                code: "deploy_in_progress",
                message: err.to_string(),
            },
            DeployError::NoBackups => AppError::bad_request(err.to_string()),
            _ => AppError::upstream(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "internal error");
        AppError::internal(format!("{err}"))
    }
}
