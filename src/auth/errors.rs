//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Rejection returned by the authorization gates.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Log in to use this service")]
    NotAuthenticated,
    #[error("User not found")]
    UserNotFound,
    #[error("Insufficient permissions")]
    InsufficientRole,
    #[error("Database error")]
    Database,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated | Self::UserNotFound => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole => StatusCode::FORBIDDEN,
            Self::Database => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
