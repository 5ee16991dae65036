mod admin;
mod auth;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::auth::CookieBinder;
use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionService;

pub use error::{ApiError, MIN_PASSWORD_LENGTH, validate_credentials};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    sessions: Arc<SessionService>,
    cookies: CookieBinder,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthApiState {
        db: db.clone(),
        sessions,
        cookies,
        rate_limit,
    };

    let admin_state = admin::AdminState { db };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/admin", admin::router(admin_state))
}
