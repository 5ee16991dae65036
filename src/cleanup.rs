//! Scheduled cleanup of refresh token records that can no longer be used.

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Records untouched for this many days are removed. Matches the refresh
/// cookie lifetime, past which no client can still present the token.
pub const STALE_TOKEN_AGE_DAYS: u32 = 30;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database, rate_limit: &RateLimitConfig) {
    match db.tokens().delete_stale(STALE_TOKEN_AGE_DAYS).await {
        Ok(count) if count > 0 => info!(count, "Cleaned up stale refresh tokens"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to clean up stale refresh tokens"),
    }

    rate_limit.retain_recent();
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    rate_limit: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, &rate_limit).await;
        }
    })
}
