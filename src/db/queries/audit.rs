use serde_json::Value;
use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyPool};
use uuid::Uuid;

use crate::db::models::{ActivitySummaryRecord, AuditLogRecord};
use crate::domain::{AuditAction, AuditEntity};
use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub user_id: String,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Option<String>,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

/// `start`/`end` are inclusive bounds on `created_at`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub user_id: Option<String>,
    pub entity: Option<AuditEntity>,
    pub action: Option<AuditAction>,
    pub start: Option<String>,
    pub end: Option<String>,
}

const AUDIT_SELECT: &str = r#"
    SELECT
        a.id,
        a.user_id,
        u.name AS user_name,
        u.email AS user_email,
        a.action,
        a.entity,
        a.entity_id,
        a.changes,
        a.ip_address,
        a.user_agent,
        a.metadata,
        a.created_at
    FROM audit_logs a
    LEFT JOIN users u ON u.id = a.user_id
"#;

pub async fn insert_audit_log(pool: &AnyPool, entry: NewAuditLog) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id,
            user_id,
            action,
            entity,
            entity_id,
            changes,
            ip_address,
            user_agent,
            metadata,
            created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&entry.user_id)
    .bind(entry.action.as_str())
    .bind(entry.entity.as_str())
    .bind(entry.entity_id)
    .bind(entry.changes.map(|changes| changes.to_string()))
    .bind(entry.ip_address)
    .bind(entry.user_agent)
    .bind(entry.metadata.map(|metadata| metadata.to_string()))
    .bind(&entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Newest first. Returns the page together with the unpaged total.
pub async fn list_audit_logs(
    pool: &AnyPool,
    filters: &AuditFilters,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<AuditLogRecord>, i64)> {
    let mut count_query = QueryBuilder::<Any>::new("SELECT COUNT(*) FROM audit_logs a WHERE 1 = 1");
    push_filters(&mut count_query, filters);
    let total = count_query
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    let mut query = QueryBuilder::<Any>::new(AUDIT_SELECT);
    query.push(" WHERE 1 = 1");
    push_filters(&mut query, filters);
    query.push(" ORDER BY a.created_at DESC, a.id ASC LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let entries = query
        .build_query_as::<AuditLogRecord>()
        .fetch_all(pool)
        .await?;

    Ok((entries, total))
}

pub async fn recent_audit_logs(
    pool: &AnyPool,
    user_id: Option<&str>,
    limit: i64,
) -> AppResult<Vec<AuditLogRecord>> {
    let filters = AuditFilters {
        user_id: user_id.map(str::to_string),
        ..AuditFilters::default()
    };
    let (entries, _) = list_audit_logs(pool, &filters, limit, 0).await?;
    Ok(entries)
}

/// Counts per `(action, entity)` since `since`, most frequent first.
pub async fn user_activity_summary(
    pool: &AnyPool,
    user_id: &str,
    since: &str,
) -> AppResult<Vec<ActivitySummaryRecord>> {
    let summary = sqlx::query_as::<Any, ActivitySummaryRecord>(
        r#"
        SELECT action, entity, COUNT(*) AS count
        FROM audit_logs
        WHERE user_id = ? AND created_at >= ?
        GROUP BY action, entity
        ORDER BY count DESC, action ASC, entity ASC
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(summary)
}

pub async fn purge_audit_logs_before(pool: &AnyPool, cutoff: &str) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn push_filters(query: &mut QueryBuilder<'_, Any>, filters: &AuditFilters) {
    if let Some(user_id) = &filters.user_id {
        query.push(" AND a.user_id = ");
        query.push_bind(user_id.clone());
    }

    if let Some(entity) = filters.entity {
        query.push(" AND a.entity = ");
        query.push_bind(entity.as_str());
    }

    if let Some(action) = filters.action {
        query.push(" AND a.action = ");
        query.push_bind(action.as_str());
    }

    if let Some(start) = &filters.start {
        query.push(" AND a.created_at >= ");
        query.push_bind(start.clone());
    }

    if let Some(end) = &filters.end {
        query.push(" AND a.created_at <= ");
        query.push_bind(end.clone());
    }
}
