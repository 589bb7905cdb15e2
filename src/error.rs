use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

static EXPOSE_INTERNAL_DETAIL: AtomicBool = AtomicBool::new(false);

/// Lets 500 responses carry the underlying error text. Only enabled in development.
pub fn expose_internal_detail(enabled: bool) {
    EXPOSE_INTERNAL_DETAIL.store(enabled, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn missing_token() -> Self {
        Self::Unauthorized("missing or invalid bearer token".to_string())
    }

    pub fn admin_only() -> Self {
        Self::Forbidden("access denied: admin only".to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "unauthorized", message),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, "forbidden", message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            Self::Internal(detail) => {
                let message = if EXPOSE_INTERNAL_DETAIL.load(Ordering::Relaxed) {
                    detail
                } else {
                    "unexpected error".to_string()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        };

        let body = Json(ErrorBody {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound("record not found".to_string()),
            sqlx::Error::Database(db_error) => {
                let message = db_error.message().to_string();
                if db_error.is_unique_violation() {
                    Self::Conflict(message)
                } else {
                    tracing::error!(?db_error, "database error");
                    Self::Internal(message)
                }
            }
            other => {
                tracing::error!(error = ?other, "sqlx error");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "unexpected error");
        Self::Internal(format!("{error:#}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
