use sqlx::{Any, AnyPool};

use crate::db::models::UserSummary;
use crate::error::AppResult;

pub async fn list_user_summaries(pool: &AnyPool) -> AppResult<Vec<UserSummary>> {
    let users = sqlx::query_as::<Any, UserSummary>(
        "SELECT id, name, email FROM users ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// Users holding at least one assigned task that is not completed.
pub async fn count_active_assignees(pool: &AnyPool) -> AppResult<i64> {
    let count = sqlx::query_scalar::<Any, i64>(
        r#"
        SELECT COUNT(DISTINCT t.assigned_to)
        FROM tasks t
        INNER JOIN users u ON u.id = t.assigned_to
        WHERE t.status <> 'completed'
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}
