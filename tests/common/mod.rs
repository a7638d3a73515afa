#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use serde_json::Value;
use tower::ServiceExt;
use waypoint::{ServerConfig, create_app, db::Database};

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-test-access-secret";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-test-refresh-secret";
pub const COOKIE_SECRET: &[u8] = b"test-cookie-secret-test-cookie-secret";

pub async fn test_db() -> Database {
    Database::open(":memory:")
        .await
        .expect("Failed to open test database")
}

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        cookie_secret: COOKIE_SECRET.to_vec(),
        production: false,
        cors_origin: None,
        login_rate_limit: None,
        purge_expired_sessions: false,
    }
}

pub async fn create_test_app() -> (Router, Database) {
    let db = test_db().await;
    let app = create_app(&test_config(db.clone()));
    (app, db)
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_request_with_cookie(method: &str, uri: &str, body: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(header::COOKIE, cookie)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// The raw Set-Cookie header for the refresh cookie, if any.
pub fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token="))
        .map(|v| v.to_string())
}

/// The `name=value` part of a Set-Cookie header, ready for a Cookie header.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

pub fn is_cleared(set_cookie: &str) -> bool {
    set_cookie.starts_with("refresh_token=;") && set_cookie.contains("Max-Age=0")
}

pub async fn register(app: &Router, username: &str, password: &str) -> Response<Body> {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            &format!(r#"{{"username":"{}","password":"{}"}}"#, username, password),
        ))
        .await
        .unwrap()
}

/// A successful login: (response body, refresh cookie pair).
pub async fn login(app: &Router, username: &str, password: &str, device: &str) -> (Value, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            &format!(
                r#"{{"username":"{}","password":"{}","deviceId":"{}"}}"#,
                username, password, device
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let cookie = cookie_pair(&set_cookie(&response).expect("login sets the refresh cookie"));
    (body_json(response).await, cookie)
}

pub async fn refresh(app: &Router, device: &str, cookie: &str) -> Response<Body> {
    app.clone()
        .oneshot(json_request_with_cookie(
            "POST",
            "/api/v1/auth/refresh",
            &format!(r#"{{"deviceId":"{}"}}"#, device),
            cookie,
        ))
        .await
        .unwrap()
}
