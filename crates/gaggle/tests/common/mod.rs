//! Test utilities and common setup.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use serde_json::Value;
use tower::ServiceExt;

use gaggle::api::{self, AppState, StateOptions};
use gaggle::auth::{AuthConfig, DevUser};
use gaggle::db::Database;
use gaggle::hub::HubConfig;
use gaggle::user::User;

/// Application under test. Keeps the database alive as long as the router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: Database,
}

impl TestApp {
    /// Send a request through a clone of the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a user and a session for them, returning the token.
    pub async fn login(&self, id: &str, username: &str) -> String {
        self.state
            .users
            .upsert(&User {
                id: id.to_string(),
                username: username.to_string(),
            })
            .await
            .unwrap();
        self.state.sessions.create(id, None).await.unwrap()
    }
}

/// Dev-mode auth with `u1`/alice as admin and `u2`/bob as a regular user.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        dev_mode: true,
        dev_users: vec![
            DevUser {
                id: "u1".to_string(),
                username: "alice".to_string(),
            },
            DevUser {
                id: "u2".to_string(),
                username: "bob".to_string(),
            },
        ],
        admins: vec!["u1".to_string()],
        ..AuthConfig::default()
    }
}

pub fn test_options() -> StateOptions {
    StateOptions {
        auth: test_auth_config(),
        hub: HubConfig::default(),
        chat_enabled: true,
        session_ttl: None,
    }
}

/// Create a test application with chat enabled and the dev provider.
pub async fn test_app() -> TestApp {
    test_app_with(test_options()).await
}

pub async fn test_app_with(options: StateOptions) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let state = AppState::new(db.pool().clone(), options);
    let router = api::create_router(state.clone());
    TestApp { router, state, db }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, token, None)
}

pub fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    json: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match json {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}
