pub mod analytics;
pub mod audit_logs;
pub mod auth;
pub mod projects;
pub mod tasks;
pub mod teams;
pub mod users;

use axum::extract::{DefaultBodyLimit, FromRequest};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::UserSummary;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// The full HTTP surface, minus the transport layers `main` adds.
pub fn app(state: AppState) -> Router {
    let max_request_body_bytes = state.config.max_request_body_bytes;

    Router::new()
        .nest("/api", router(state.clone()))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_request_body_bytes))
        .with_state(state)
}

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(auth::session_router())
        .merge(users::router())
        .merge(projects::router())
        .merge(tasks::router())
        .merge(teams::router())
        .merge(audit_logs::router())
        .merge(analytics::router())
        .route_layer(middleware::from_fn_with_state(state, auth::require_auth));

    Router::new().merge(auth::public_router()).merge(protected)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `axum::Json` with rejections reported through [`AppError`] as 400s.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// A populated user reference, or the bare id once the account is gone.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UserRef {
    User(UserSummary),
    Missing(String),
}

impl UserRef {
    pub fn new(summary: Option<UserSummary>, id: String) -> Self {
        match summary {
            Some(summary) => Self::User(summary),
            None => Self::Missing(id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Returns `(page, limit, offset)`. `limit` is capped at 100.
    pub fn normalize(&self) -> AppResult<(i64, i64, i64)> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(50);

        if page <= 0 {
            return Err(AppError::BadRequest(
                "page must be greater than 0".to_string(),
            ));
        }

        if limit <= 0 {
            return Err(AppError::BadRequest(
                "limit must be greater than 0".to_string(),
            ));
        }

        let limit = limit.min(100);
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| AppError::BadRequest("page is out of range".to_string()))?;
        Ok((page, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;

    use super::PageQuery;
    use crate::test_support::setup_db;
    use crate::{api, state::AppState};

    #[test]
    fn page_query_defaults_and_caps_limit() {
        let query = PageQuery {
            page: None,
            limit: None,
        };
        assert_eq!(query.normalize().expect("defaults"), (1, 50, 0));

        let query = PageQuery {
            page: Some(3),
            limit: Some(500),
        };
        assert_eq!(query.normalize().expect("capped"), (3, 100, 200));

        let query = PageQuery {
            page: Some(0),
            limit: None,
        };
        assert!(query.normalize().is_err());

        let query = PageQuery {
            page: Some(i64::MAX),
            limit: Some(100),
        };
        assert!(query.normalize().is_err());
    }

    #[tokio::test]
    async fn health_needs_no_token_and_api_does() {
        let (_temp_dir, pool, config) = setup_db("api-health").await;
        let server = TestServer::new(api::app(AppState::new(config, pool)))
            .expect("test server should start");

        let health = server.get("/health").await;
        health.assert_status_ok();
        health.assert_json(&serde_json::json!({ "status": "ok" }));

        let projects = server.get("/api/projects").await;
        projects.assert_status(StatusCode::UNAUTHORIZED);
    }
}
