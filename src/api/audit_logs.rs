use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::admin_only;
use crate::api::{PageQuery, UserRef};
use crate::auth::CurrentUser;
use crate::db::models::{ActivitySummaryRecord, AuditLogRecord, UserSummary};
use crate::db::queries::audit::{self, AuditFilters};
use crate::domain::{AuditAction, AuditEntity};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::timestamps::{days_ago, normalize_end_bound, normalize_timestamp};

const DEFAULT_ACTIVITY_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route("/audit-logs/user/{user_id}", get(user_activity))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditLogQuery {
    user_id: Option<String>,
    entity: Option<String>,
    action: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogResponse {
    pub id: String,
    pub user: UserRef,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
struct Pagination {
    total: i64,
    page: i64,
    pages: i64,
    limit: i64,
}

#[derive(Debug, Serialize)]
struct AuditLogPage {
    data: Vec<AuditLogResponse>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResponse {
    user_id: String,
    days: i64,
    since: String,
    activity: Vec<ActivitySummaryRecord>,
}

async fn list_audit_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<AuditLogPage>> {
    admin_only(&user)?;

    let (page, limit, offset) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .normalize()?;

    let filters = AuditFilters {
        user_id: present(query.user_id),
        entity: present(query.entity)
            .as_deref()
            .map(AuditEntity::parse)
            .transpose()?,
        action: present(query.action)
            .as_deref()
            .map(AuditAction::parse)
            .transpose()?,
        start: present(query.start_date)
            .map(|value| normalize_timestamp(&value, "startDate"))
            .transpose()?,
        end: present(query.end_date)
            .map(|value| normalize_end_bound(&value, "endDate"))
            .transpose()?,
    };

    let (entries, total) = audit::list_audit_logs(&state.db, &filters, limit, offset).await?;

    Ok(Json(AuditLogPage {
        data: entries.into_iter().map(map_audit_log).collect(),
        pagination: Pagination {
            total,
            page,
            pages: (total + limit - 1) / limit,
            limit,
        },
    }))
}

async fn user_activity(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<ActivityResponse>> {
    admin_only(&user)?;

    let days = query.days.unwrap_or(DEFAULT_ACTIVITY_DAYS);
    if days <= 0 {
        return Err(AppError::BadRequest(
            "days must be greater than 0".to_string(),
        ));
    }

    let since = days_ago(days)
        .ok_or_else(|| AppError::BadRequest("days is out of range".to_string()))?;
    let activity = audit::user_activity_summary(&state.db, &user_id, &since).await?;

    Ok(Json(ActivityResponse {
        user_id,
        days,
        since,
        activity,
    }))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub fn map_audit_log(record: AuditLogRecord) -> AuditLogResponse {
    let summary = match (record.user_name, record.user_email) {
        (Some(name), Some(email)) => Some(UserSummary {
            id: record.user_id.clone(),
            name,
            email,
        }),
        _ => None,
    };

    AuditLogResponse {
        id: record.id,
        user: UserRef::new(summary, record.user_id),
        action: record.action,
        entity: record.entity,
        entity_id: record.entity_id,
        changes: record.changes.as_deref().and_then(parse_json),
        ip_address: record.ip_address,
        user_agent: record.user_agent,
        metadata: record.metadata.as_deref().and_then(parse_json),
        created_at: record.created_at,
    }
}

fn parse_json(raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(error = %error, "stored audit payload is not valid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::db::queries::audit::{insert_audit_log, NewAuditLog};
    use crate::domain::{AuditAction, AuditEntity};
    use crate::test_support::test_app;

    fn entry(user_id: &str, action: AuditAction, created_at: &str) -> NewAuditLog {
        NewAuditLog {
            user_id: user_id.to_string(),
            action,
            entity: AuditEntity::Task,
            entity_id: Some("task-1".to_string()),
            changes: Some(json!({ "status": "completed" })),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            metadata: Some(json!({ "method": "PUT", "path": "/api/tasks/task-1" })),
            created_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn listing_filters_pages_and_populates_users() {
        let app = test_app("api-audit-list").await;
        let db = &app.state.db;

        insert_audit_log(db, entry(&app.member.id, AuditAction::Update, "2025-03-01T09:00:00.000Z"))
            .await
            .expect("audit entry");
        insert_audit_log(
            db,
            entry(&app.member.id, AuditAction::CompleteTask, "2025-03-01T18:00:00.000Z"),
        )
        .await
        .expect("audit entry");
        insert_audit_log(db, entry("deleted-user", AuditAction::Update, "2025-03-02T09:00:00.000Z"))
            .await
            .expect("audit entry");

        app.server
            .get("/api/audit-logs")
            .authorization_bearer(&app.member_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let page: Value = app
            .server
            .get("/api/audit-logs?limit=2")
            .authorization_bearer(&app.admin_token)
            .await
            .json();
        assert_eq!(page["pagination"], json!({ "total": 3, "page": 1, "pages": 2, "limit": 2 }));
        assert_eq!(page["data"][0]["user"], "deleted-user");
        assert_eq!(page["data"][1]["user"]["email"], "member@example.com");
        assert_eq!(page["data"][1]["changes"]["status"], "completed");

        let same_day: Value = app
            .server
            .get("/api/audit-logs?startDate=2025-03-01&endDate=2025-03-01")
            .authorization_bearer(&app.admin_token)
            .await
            .json();
        assert_eq!(same_day["pagination"]["total"], 2);

        let completed: Value = app
            .server
            .get("/api/audit-logs?action=COMPLETE_TASK")
            .authorization_bearer(&app.admin_token)
            .await
            .json();
        assert_eq!(completed["pagination"]["total"], 1);

        app.server
            .get("/api/audit-logs?page=9223372036854775807&limit=100")
            .authorization_bearer(&app.admin_token)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        app.server
            .get("/api/audit-logs?entity=invoice")
            .authorization_bearer(&app.admin_token)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn activity_summary_counts_recent_actions() {
        let app = test_app("api-audit-activity").await;
        let now = crate::timestamps::now_timestamp();

        for action in [AuditAction::Update, AuditAction::Update, AuditAction::AddComment] {
            insert_audit_log(&app.state.db, entry(&app.member.id, action, &now))
                .await
                .expect("audit entry");
        }
        insert_audit_log(
            &app.state.db,
            entry(&app.member.id, AuditAction::Delete, "2020-01-01T00:00:00.000Z"),
        )
        .await
        .expect("audit entry");

        let summary: Value = app
            .server
            .get(&format!("/api/audit-logs/user/{}?days=7", app.member.id))
            .authorization_bearer(&app.admin_token)
            .await
            .json();
        assert_eq!(
            summary["activity"],
            json!([
                { "action": "UPDATE", "entity": "task", "count": 2 },
                { "action": "ADD_COMMENT", "entity": "task", "count": 1 }
            ])
        );

        for days in ["0", "100000000", "9223372036854775807"] {
            app.server
                .get(&format!("/api/audit-logs/user/{}?days={days}", app.member.id))
                .authorization_bearer(&app.admin_token)
                .await
                .assert_status(StatusCode::BAD_REQUEST);
        }
    }
}
