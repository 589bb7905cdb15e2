use anyhow::Context;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::users::{map_user, UserResponse};
use crate::api::ApiJson;
use crate::audit::RequestMeta;
use crate::auth::CurrentUser;
use crate::db::queries::users::{self, NewUserInput};
use crate::domain::{AuditAction, AuditEntity, Role};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid email or password";

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn session_router() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    id: String,
    name: String,
    email: String,
    role: String,
    token: String,
}

async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    let (Some(name), Some(email), Some(password)) = (
        present(payload.name),
        present(payload.email),
        payload.password.filter(|value| !value.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "please provide name, email, and password".to_string(),
        ));
    };

    users::validate_password(&password)?;
    let email = users::normalize_email(&email)?;
    let password_hash = state.passwords.hash(&password)?;

    let user = users::create_user(
        &state.db,
        NewUserInput {
            name,
            email,
            password_hash,
            role: Role::User,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "user registered");

    let token = state.tokens.issue(&user.id, Role::User)?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            token,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let (Some(email), Some(password)) = (
        present(payload.email),
        payload.password.filter(|value| !value.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "please provide email and password".to_string(),
        ));
    };

    let user = users::find_user_by_email(&state.db, &email).await?;
    let stored_hash = user.as_ref().map(|user| user.password_hash.as_str());
    let verified = state.passwords.verify_account(&password, stored_hash);
    let user = user
        .filter(|_| verified)
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

    let role = Role::parse(&user.role)?;
    let token = state.tokens.issue(&user.id, role)?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Login,
        AuditEntity::User,
        Some(&user.id),
        None,
    ));

    Ok(Json(SessionResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        token,
    }))
}

async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<UserResponse>> {
    let record = users::get_user(&state.db, &user.id).await?;
    Ok(Json(map_user(record)))
}

async fn logout(State(state): State<AppState>, user: CurrentUser, meta: RequestMeta) -> StatusCode {
    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Logout,
        AuditEntity::User,
        Some(&user.id),
        None,
    ));
    StatusCode::NO_CONTENT
}

/// Resolves the bearer token to a stored account and attaches it to the
/// request. The stored role is authoritative, not the one in the token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> AppResult<Response> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)
        .ok_or_else(AppError::missing_token)?;

    let claims = state.tokens.verify(token)?;

    let user = users::find_user_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(AppError::missing_token)?;

    let role = Role::parse(&user.role)?;
    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        name: user.name,
        email: user.email,
        role,
    });

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(AppError::missing_token)
    }
}

/// Creates the configured administrator on first start.
pub async fn ensure_bootstrap_admin(state: &AppState) -> anyhow::Result<()> {
    let bootstrap = &state.config.bootstrap;
    let (Some(email), Some(password)) = (bootstrap.email.as_deref(), bootstrap.password.as_deref())
    else {
        return Ok(());
    };

    if users::find_user_by_email(&state.db, email)
        .await
        .context("failed to look up bootstrap admin")?
        .is_some()
    {
        return Ok(());
    }

    users::validate_password(password).context("invalid TEAMBOARD_ADMIN_PASSWORD")?;
    let password_hash = state
        .passwords
        .hash(password)
        .context("failed to hash bootstrap admin password")?;

    let admin = users::create_user(
        &state.db,
        NewUserInput {
            name: bootstrap.name.clone(),
            email: email.to_string(),
            password_hash,
            role: Role::Admin,
        },
    )
    .await
    .context("failed to create bootstrap admin")?;

    tracing::info!(user_id = %admin.id, email = %admin.email, "created bootstrap admin");
    Ok(())
}

fn parse_bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
