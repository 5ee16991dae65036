#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use paysys::{
    ServerConfig, create_app,
    db::{Database, User},
    jwt::{Clock, DEFAULT_ISSUER, ManualClock, TokenCodec},
    password::hash_password,
    session::{SessionService, SessionSettings},
};
use tower::ServiceExt;

/// Fixed start time for every test clock.
pub const T0: u64 = 1_700_000_000;

pub const SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";

pub const PASSWORD: &str = "correct horse";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub codec: TokenCodec,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = Arc::new(ManualClock::new(T0));

        let mut config = ServerConfig::new(db.clone(), SECRET.to_vec());
        config.clock = clock.clone() as Arc<dyn Clock>;
        configure(&mut config);

        let codec = TokenCodec::new(&config.jwt_secret, &config.issuer, clock.clone())
            .expect("Failed to build codec");
        let app = create_app(&config).expect("Failed to build app");

        Self {
            app,
            db,
            clock,
            codec,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed")
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn register(&self, username: &str, password: &str) -> Response<Body> {
        self.post_json(
            "/api/auth/register",
            serde_json::json!({ "username": username, "password": password }),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Response<Body> {
        self.post_json(
            "/api/auth/login",
            serde_json::json!({ "username": username, "password": password }),
        )
        .await
    }

    /// Create a user directly in the store and log in through the API.
    /// Returns the user and the session cookies.
    pub async fn logged_in(&self, username: &str, admin: bool) -> (User, Session) {
        let user = seed_user(&self.db, username, admin).await;
        let response = self.login(username, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        (user, Session::from_response(&response))
    }

    /// Send `method uri` carrying the given cookies.
    pub async fn request_with(&self, method: &str, uri: &str, cookies: &str) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if !cookies.is_empty() {
            builder = builder.header(header::COOKIE, cookies);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn check(&self, cookies: &str) -> Response<Body> {
        self.request_with("GET", "/api/auth/check", cookies).await
    }
}

/// Session cookie values as a client would store them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

impl Session {
    pub fn from_response(response: &Response<Body>) -> Self {
        Self {
            access_token: cookie_value(response, "access_token").expect("No access cookie"),
            refresh_token: cookie_value(response, "refresh_token").expect("No refresh cookie"),
        }
    }

    pub fn cookie_header(&self) -> String {
        format!(
            "access_token={}; refresh_token={}",
            self.access_token, self.refresh_token
        )
    }

    pub fn refresh_only(&self) -> String {
        format!("refresh_token={}", self.refresh_token)
    }

    pub fn access_only(&self) -> String {
        format!("access_token={}", self.access_token)
    }
}

/// All `Set-Cookie` header values of a response.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Value of the named cookie set by a response.
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response).into_iter().find_map(|cookie| {
        let (pair, _) = cookie.split_once(';')?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Whether the response clears both session cookies.
pub fn clears_session(response: &Response<Body>) -> bool {
    let cookies = set_cookies(response);
    cookies.len() == 2
        && cookies
            .iter()
            .all(|c| c.contains("Max-Age=0") && c.split(';').next().is_some_and(|p| p.ends_with('=')))
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Insert a user with [`PASSWORD`] straight into the store.
pub async fn seed_user(db: &Database, username: &str, admin: bool) -> User {
    let hash = hash_password(PASSWORD).unwrap();
    let user = db.users().create(username, &hash).await.unwrap();
    if admin {
        db.users().set_admin(&user.id, true).await.unwrap();
        return db.users().get_by_id(&user.id).await.unwrap().unwrap();
    }
    user
}

/// A session service on an in-memory store with a manual clock at [`T0`].
pub async fn session_service(
    settings: SessionSettings,
) -> (SessionService, Database, Arc<ManualClock>) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let clock = Arc::new(ManualClock::new(T0));
    let codec = TokenCodec::new(SECRET, DEFAULT_ISSUER, clock.clone()).unwrap();
    (
        SessionService::new(codec, db.clone(), settings),
        db,
        clock,
    )
}
