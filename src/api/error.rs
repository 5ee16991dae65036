//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::session::SessionIssueError;

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
    fn internal_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
    fn internal_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::internal_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed validation; each entry names one problem
    Validation(Vec<String>),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!(error = %e, "{}", context);
        Self::Internal("Database error".into())
    }

    pub fn internal_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!(error = %e, "{}", context);
        Self::Internal(context.into())
    }
}

impl From<SessionIssueError> for ApiError {
    fn from(e: SessionIssueError) -> Self {
        Self::internal_error("Failed to issue session", e)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ValidationResponse {
    message: &'static str,
    details: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(details) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ValidationResponse {
                        message: "Validation failed",
                        details,
                    }),
                )
                    .into_response();
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Minimum password length accepted at registration and login.
pub const MIN_PASSWORD_LENGTH: usize = 4;

/// Validate a username/password body, collecting every problem.
pub fn validate_credentials(username: &str, password: &str) -> Result<(), ApiError> {
    let mut details = Vec::new();

    if username.trim().is_empty() {
        details.push("username is required".to_string());
    }
    if password.is_empty() {
        details.push("password is required".to_string());
    } else if password.chars().count() < MIN_PASSWORD_LENGTH {
        details.push(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(details))
    }
}
