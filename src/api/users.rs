//! User management API endpoints. Every route requires an ADMIN access token.

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_credentials};
use crate::auth::{AccessGate, require_role};
use crate::db::{Database, UserRole, UserSummary};
use crate::jwt::{JwtConfig, TokenPayload};
use crate::password;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

pub fn router(state: UsersState) -> Router {
    let gate = AccessGate {
        jwt: state.jwt.clone(),
        role: Some(UserRole::Admin),
    };

    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user).delete(delete_user))
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, require_role))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    #[serde(default)]
    role: Option<UserRole>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Create an account, rejecting taken usernames with 400.
pub(super) async fn create(
    db: &Database,
    username: &str,
    plain_password: &str,
    role: UserRole,
) -> Result<i64, ApiError> {
    let existing = db
        .users()
        .get_by_username(username)
        .await
        .db_err("Failed to check username")?;
    if existing.is_some() {
        return Err(ApiError::bad_request("This username already exists"));
    }

    let hash = password::hash(plain_password).db_err("Failed to hash password")?;

    match db.users().create(username, &hash, role).await {
        Ok(id) => Ok(id),
        Err(e)
            if e.as_database_error()
                .is_some_and(|d| d.is_unique_violation()) =>
        {
            Err(ApiError::bad_request("This username already exists"))
        }
        Err(e) => Err(ApiError::db_error("Failed to create user", e)),
    }
}

async fn list_users(State(state): State<UsersState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.users().list().await.db_err("Failed to list users")?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<UsersState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_id(id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserSummary::from(user)))
}

async fn create_user(
    State(state): State<UsersState>,
    Extension(admin): Extension<TokenPayload>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    validate_credentials(&payload.username, &payload.password)?;

    let role = payload.role.unwrap_or(UserRole::User);
    let id = create(&state.db, &payload.username, &payload.password, role).await?;
    info!(admin_id = admin.sub, user_id = id, role = %role, "User created by admin");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User created successfully",
        }),
    ))
}

async fn delete_user(
    State(state): State<UsersState>,
    Extension(admin): Extension<TokenPayload>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .users()
        .delete(id)
        .await
        .db_err("Failed to delete user")?;

    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }
    info!(admin_id = admin.sub, user_id = id, "User deleted by admin");

    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}
