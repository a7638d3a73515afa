//! Bearer-token access control: an extractor for handlers and a middleware
//! for whole routers.

use std::marker::PhantomData;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use super::state::HasAuthBackend;
use crate::api::ApiError;
use crate::db::UserRole;
use crate::jwt::{JwtConfig, TokenKind, TokenPayload};

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verify the bearer access token and, if `required` is set, check that the
/// role claim equals it exactly.
pub fn authorize(
    headers: &HeaderMap,
    jwt: &JwtConfig,
    required: Option<UserRole>,
) -> Result<TokenPayload, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;

    let payload = jwt
        .verify(token, TokenKind::Access)
        .map_err(|_| ApiError::unauthorized("Unauthorized"))?;

    if let Some(role) = required {
        if payload.role != role {
            tracing::debug!(user_id = payload.sub, role = %payload.role, required = %role, "Role mismatch");
            return Err(ApiError::forbidden("No authorized"));
        }
    }

    Ok(payload)
}

/// Role requirement for the [`Auth`] extractor.
pub trait RoleConstraint {
    const REQUIRED: Option<UserRole>;
}

/// Any valid access token is accepted.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    const REQUIRED: Option<UserRole> = None;
}

/// Only tokens carrying the ADMIN role are accepted.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    const REQUIRED: Option<UserRole> = Some(UserRole::Admin);
}

/// Extractor for handlers that require a valid access token.
pub struct Auth<R: RoleConstraint = AnyRole>(pub TokenPayload, pub PhantomData<R>);

impl<R: RoleConstraint> Auth<R> {
    pub fn payload(&self) -> &TokenPayload {
        &self.0
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let payload = authorize(&parts.headers, state.jwt(), R::REQUIRED)?;
        Ok(Auth(payload, PhantomData))
    }
}

/// State for [`require_role`].
#[derive(Clone)]
pub struct AccessGate {
    pub jwt: Arc<JwtConfig>,
    pub role: Option<UserRole>,
}

/// Middleware that rejects requests without a valid access token (and role,
/// if the gate has one) before the wrapped handler runs. The verified
/// [`TokenPayload`] is inserted into the request extensions.
pub async fn require_role(
    State(gate): State<AccessGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let payload = authorize(request.headers(), &gate.jwt, gate.role)?;
    request.extensions_mut().insert(payload);
    Ok(next.run(request).await)
}
