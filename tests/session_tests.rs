mod common;

use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use common::{SECRET, T0, seed_user, session_service};
use paysys::db::Database;
use paysys::jwt::{DEFAULT_ISSUER, JwtError, ManualClock, TokenCodec, TokenSubject};
use paysys::session::{
    ACCESS_TOKEN_LIFETIME, REFRESH_TOKEN_LIFETIME, RefreshError, SessionIssueError,
    SessionService, SessionSettings,
};

#[tokio::test]
async fn test_issue_twice_keeps_one_record() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;

    let first = sessions.issue(&user).await.unwrap();
    let second = sessions.issue(&user).await.unwrap();

    assert_eq!(db.tokens().count_by_user(&user.id).await.unwrap(), 1);

    let record = db.tokens().find_by_user(&user.id).await.unwrap().unwrap();
    assert_eq!(record.token.as_deref(), Some(second.refresh_token.as_str()));

    // The first session's record is gone
    assert!(matches!(
        sessions.refresh(&first.refresh_token).await,
        Err(RefreshError::Revoked)
    ));
}

#[tokio::test]
async fn test_issued_tokens_carry_identity() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", true).await;

    let tokens = sessions.issue(&user).await.unwrap();
    let codec = sessions.codec();

    let access = codec.verify_access(&tokens.access_token).unwrap();
    assert_eq!(access.payload.user_id, user.id);
    assert_eq!(access.payload.username, "alice");
    assert!(access.payload.admin);
    assert_eq!(access.sub, TokenSubject::AccessToken);
    assert_eq!(access.iss, "paysys.kr");
    assert_eq!(access.exp, T0 + ACCESS_TOKEN_LIFETIME.as_secs());

    let refresh = codec.verify_refresh(&tokens.refresh_token).unwrap();
    let record = db.tokens().find_by_user(&user.id).await.unwrap().unwrap();
    assert_eq!(refresh.payload.token_id, record.id);
    assert_eq!(refresh.payload.identity, access.payload);
    assert_eq!(refresh.exp, T0 + REFRESH_TOKEN_LIFETIME.as_secs());
}

#[tokio::test]
async fn test_access_token_expires() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    clock.advance(Duration::from_secs(14 * 60));
    assert!(sessions.codec().verify_access(&tokens.access_token).is_ok());

    clock.advance(Duration::from_secs(2 * 60));
    assert!(matches!(
        sessions.codec().verify_access(&tokens.access_token),
        Err(JwtError::Expired)
    ));
}

#[tokio::test]
async fn test_refresh_below_threshold_keeps_refresh_token() {
    let settings = SessionSettings {
        rotation_threshold: Duration::from_secs(24 * 60 * 60),
        ..SessionSettings::default()
    };
    let (sessions, db, clock) = session_service(settings).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    clock.advance(Duration::from_secs(5 * 60));
    let outcome = sessions.refresh(&tokens.refresh_token).await.unwrap();

    assert!(!outcome.rotated);
    assert_eq!(outcome.user_id, user.id);
    assert_eq!(outcome.tokens.refresh_token, tokens.refresh_token);

    let old = sessions.codec().verify_access(&tokens.access_token).unwrap();
    let new = sessions
        .codec()
        .verify_access(&outcome.tokens.access_token)
        .unwrap();
    assert!(new.exp > old.exp);
    assert_eq!(new.payload, old.payload);
}

#[tokio::test]
async fn test_rotation_boundary_is_strict() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    // Remaining lifetime equals the threshold exactly
    let outcome = sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert!(!outcome.rotated);
    assert_eq!(outcome.tokens.refresh_token, tokens.refresh_token);

    clock.advance(Duration::from_secs(1));
    let outcome = sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert!(outcome.rotated);
    assert_ne!(outcome.tokens.refresh_token, tokens.refresh_token);

    let old = sessions.codec().verify_refresh(&tokens.refresh_token).unwrap();
    let new = sessions
        .codec()
        .verify_refresh(&outcome.tokens.refresh_token)
        .unwrap();
    assert_eq!(new.payload.token_id, old.payload.token_id);
    assert_eq!(new.exp, old.exp + 1);

    let record = db.tokens().find_by_user(&user.id).await.unwrap().unwrap();
    assert_eq!(
        record.token.as_deref(),
        Some(outcome.tokens.refresh_token.as_str())
    );
}

#[tokio::test]
async fn test_stale_refresh_token_still_accepted_after_rotation() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    clock.advance(Duration::from_secs(60));
    let rotated = sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert!(rotated.rotated);

    // Only the record's existence is checked, not the stored string
    clock.advance(Duration::from_secs(60));
    assert!(sessions.refresh(&tokens.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_refresh_after_revoke() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    assert!(sessions.revoke(&user.id).await.unwrap());
    assert!(!sessions.revoke(&user.id).await.unwrap());

    let err = sessions.refresh(&tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, RefreshError::Revoked));
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_expired_token() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    clock.advance(REFRESH_TOKEN_LIFETIME);

    assert!(matches!(
        sessions.refresh(&tokens.refresh_token).await,
        Err(RefreshError::Expired)
    ));
}

#[tokio::test]
async fn test_refresh_rejects_bad_tokens() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    assert!(matches!(
        sessions.refresh("not-a-jwt").await,
        Err(RefreshError::InvalidToken(_))
    ));
    // An access token is not a refresh token
    assert!(matches!(
        sessions.refresh(&tokens.access_token).await,
        Err(RefreshError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_refresh_picks_up_current_user_state() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    db.users().set_admin(&user.id, true).await.unwrap();
    clock.advance(Duration::from_secs(60));

    let outcome = sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert!(outcome.identity.admin);

    let access = sessions
        .codec()
        .verify_access(&outcome.tokens.access_token)
        .unwrap();
    assert!(access.payload.admin);
}

#[tokio::test]
async fn test_concurrent_refresh_last_write_wins() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();
    clock.advance(Duration::from_secs(60));

    // A second server instance on the same store whose clock reads later,
    // so the two rotations sign different tokens.
    let later = Arc::new(ManualClock::new(T0 + 120));
    let other = SessionService::new(
        TokenCodec::new(SECRET, DEFAULT_ISSUER, later).unwrap(),
        db.clone(),
        SessionSettings::default(),
    );

    let (a, b) = tokio::join!(
        sessions.refresh(&tokens.refresh_token),
        other.refresh(&tokens.refresh_token)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.rotated && b.rotated);
    assert_ne!(a.tokens.refresh_token, b.tokens.refresh_token);

    assert_eq!(db.tokens().count_by_user(&user.id).await.unwrap(), 1);

    let stored = db
        .tokens()
        .find_by_user(&user.id)
        .await
        .unwrap()
        .unwrap()
        .token
        .unwrap();
    assert!(
        (stored == a.tokens.refresh_token) ^ (stored == b.tokens.refresh_token),
        "stored token must be exactly one of the two writes"
    );
}

/// Make every update of the tokens table a no-op, as if the record had
/// been deleted between the existence check and the write.
async fn ignore_token_updates(db: &Database) {
    sqlx::query(
        "CREATE TRIGGER ignore_token_updates BEFORE UPDATE ON tokens
         BEGIN SELECT RAISE(IGNORE); END",
    )
    .execute(db.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn test_refresh_fails_when_record_vanishes_before_write() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();

    ignore_token_updates(&db).await;
    clock.advance(Duration::from_secs(60));

    let err = sessions.refresh(&tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, RefreshError::Revoked));
}

#[tokio::test]
async fn test_issue_fails_when_token_not_stored() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;

    ignore_token_updates(&db).await;

    assert!(matches!(
        sessions.issue(&user).await,
        Err(SessionIssueError::Store(_))
    ));
}

#[tokio::test]
async fn test_needs_renewal_window() {
    let (sessions, db, clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();
    let claims = sessions.codec().verify_refresh(&tokens.refresh_token).unwrap();

    assert!(!sessions.needs_renewal(&claims, true));
    assert!(sessions.needs_renewal(&claims, false));

    // Exactly 30 minutes left: not yet
    clock.set(claims.exp - 30 * 60);
    assert!(!sessions.needs_renewal(&claims, true));

    clock.advance(Duration::from_secs(1));
    assert!(sessions.needs_renewal(&claims, true));
}

#[tokio::test]
async fn test_is_live() {
    let (sessions, db, _clock) = session_service(SessionSettings::default()).await;
    let user = seed_user(&db, "alice", false).await;
    let tokens = sessions.issue(&user).await.unwrap();
    let claims = sessions.codec().verify_refresh(&tokens.refresh_token).unwrap();

    assert!(sessions.is_live(&claims).await.unwrap());
    sessions.revoke(&user.id).await.unwrap();
    assert!(!sessions.is_live(&claims).await.unwrap());
}
