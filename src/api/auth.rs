//! Session API endpoints.
//!
//! - POST `/register` - Create a USER account
//! - POST `/login` - Exchange credentials for an access token and refresh cookie
//! - POST `/refresh` - Rotate the refresh cookie and issue a new access token
//! - POST `/logout` - Revoke the device's refresh token and clear the cookie
//! - GET `/protected` - Check that the bearer access token is still valid

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_credentials, validate_device_id};
use crate::auth::{AnyRole, Auth, RefreshCookie};
use crate::db::{Database, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::rate_limit::{RateLimitConfig, rate_limit_credentials};
use crate::session::{IssuedSession, SessionManager};

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub sessions: SessionManager,
    pub cookie: Arc<RefreshCookie>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, rate_limit: Option<Arc<RateLimitConfig>>) -> Router {
    let credentials = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .with_state(state.clone());

    let credentials = match rate_limit {
        Some(config) => {
            credentials.layer(middleware::from_fn_with_state(config, rate_limit_credentials))
        }
        None => credentials,
    };

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/protected", get(protected))
        .with_state(state)
        .merge(credentials)
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    username: String,
    password: String,
    device_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRequest {
    device_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub user_id: i64,
    pub role: UserRole,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    validate_credentials(&payload.username, &payload.password)?;

    super::users::create(&state.db, &payload.username, &payload.password, UserRole::User).await?;
    info!(username = %payload.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User created successfully",
        }),
    ))
}

async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    validate_device_id(&payload.device_id)?;
    if validate_credentials(&payload.username, &payload.password).is_err() {
        return Err(ApiError::bad_request("Invalid credentials"));
    }

    let session = state
        .sessions
        .login(&payload.username, &payload.password, &payload.device_id)
        .await?;

    Ok(session_response(&state.cookie, session))
}

async fn refresh(
    State(state): State<AuthState>,
    headers: HeaderMap,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    validate_device_id(&payload.device_id)?;

    let presented = state.cookie.read(&headers);
    match state.sessions.refresh(&payload.device_id, presented).await {
        Ok(session) => Ok(session_response(&state.cookie, session)),
        Err(e) => {
            let clear = e.clears_cookie();
            let mut response = ApiError::from(e).into_response();
            if clear {
                append_cookie(&mut response, state.cookie.clear());
            }
            Ok(response)
        }
    }
}

/// Always succeeds and always clears the cookie.
async fn logout(
    State(state): State<AuthState>,
    headers: HeaderMap,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Response {
    if let Ok(Json(payload)) = payload {
        state
            .sessions
            .logout(&payload.device_id, state.cookie.read(&headers))
            .await;
    }

    let mut response = Json(MessageResponse {
        message: "Logout successful",
    })
    .into_response();
    append_cookie(&mut response, state.cookie.clear());
    response
}

async fn protected(
    State(state): State<AuthState>,
    Auth(payload, _): Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .users()
        .get_by_id(payload.sub)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;

    Ok(Json(serde_json::json!({ "success": true })))
}

fn session_response(cookie: &RefreshCookie, session: IssuedSession) -> Response {
    let set_cookie = cookie.set(&session.refresh.token, session.refresh.duration);
    (
        StatusCode::OK,
        [(SET_COOKIE, set_cookie)],
        Json(SessionResponse {
            token: session.access_token,
            user_id: session.user_id,
            role: session.role,
        }),
    )
        .into_response()
}

fn append_cookie(response: &mut Response, cookie: String) {
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

