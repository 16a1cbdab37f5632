// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Three layers:
//! - [`ApiError`]: classification of every failure seen by the Strava client.
//! - [`JobError`]: the terminal error recorded verbatim on a failed sync job.
//! - [`AppError`]: what HTTP handlers and the store return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Failure classification for a single Strava API call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// 429, 5xx, transport failure or timeout. Only seen inside the retry loop.
    #[error("retryable failure{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Retryable {
        status: Option<u16>,
        message: String,
    },

    /// 401/403 or a failed token refresh.
    #[error("authorization rejected: {0}")]
    FatalAuth(String),

    /// 400/404/422 and other non-retryable client errors.
    #[error("request rejected (HTTP {status}): {message}")]
    FatalRequest { status: u16, message: String },

    /// A 2xx response whose body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Waiting for rate-limit headroom would exceed the configured bound.
    #[error("rate limit quota exhausted; next window opens in {}s", .wait.as_secs())]
    QuotaExhausted { wait: Duration },

    /// The retry policy's attempt cap was reached.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Retryable { .. } => ErrorKind::Retryable,
            ApiError::FatalAuth(_) => ErrorKind::FatalAuth,
            ApiError::FatalRequest { .. } | ApiError::Decode(_) => ErrorKind::FatalRequest,
            ApiError::QuotaExhausted { .. } => ErrorKind::QuotaExhausted,
            ApiError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Retryable { .. })
    }
}

/// Serializable error discriminant stored on jobs and shown to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retryable,
    FatalAuth,
    FatalRequest,
    QuotaExhausted,
    Validation,
    RetriesExhausted,
    Persistence,
    Recovery,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::FatalAuth => "fatal_auth",
            ErrorKind::FatalRequest => "fatal_request",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::Validation => "validation",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

/// Terminal error recorded on a failed job (kind + human-readable message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ApiError> for JobError {
    fn from(err: ApiError) -> Self {
        JobError::new(err.kind(), err.to_string())
    }
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::StravaApi(api) => api.into(),
            other => JobError::new(ErrorKind::Persistence, other.to_string()),
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Strava API error: {0}")]
    StravaApi(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::StravaApi(err) => {
                (StatusCode::BAD_GATEWAY, "strava_error", Some(err.to_string()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_kinds() {
        assert_eq!(
            ApiError::FatalAuth("expired".into()).kind(),
            ErrorKind::FatalAuth
        );
        assert_eq!(
            ApiError::Decode("eof".into()).kind(),
            ErrorKind::FatalRequest
        );
        assert_eq!(
            ApiError::RetriesExhausted {
                attempts: 5,
                last_error: "HTTP 503".into()
            }
            .kind(),
            ErrorKind::RetriesExhausted
        );
    }

    #[test]
    fn persistence_errors_become_persistence_job_errors() {
        let job_err: JobError = AppError::Database("write failed".into()).into();
        assert_eq!(job_err.kind, ErrorKind::Persistence);
        assert!(job_err.message.contains("write failed"));
    }

    #[test]
    fn strava_errors_keep_their_kind() {
        let job_err: JobError = AppError::StravaApi(ApiError::QuotaExhausted {
            wait: Duration::from_secs(120),
        })
        .into();
        assert_eq!(job_err.kind, ErrorKind::QuotaExhausted);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::FatalAuth).unwrap();
        assert_eq!(json, "\"fatal_auth\"");
    }
}
