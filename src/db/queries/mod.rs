pub mod analytics;
pub mod audit;
pub mod projects;
pub mod tasks;
pub mod teams;
pub mod users;

use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};

use crate::access::Scope;
use crate::error::{AppError, AppResult};

/// Opens a transaction holding the SQLite write lock from its first
/// statement. A deferred transaction that reads before writing fails with
/// `SQLITE_BUSY_SNAPSHOT` when another connection commits in between, and
/// `busy_timeout` does not retry that.
pub(crate) async fn begin_write(pool: &AnyPool) -> AppResult<Transaction<'static, Any>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Appends ` AND <visibility>` for a `projects` row aliased as `alias`.
pub(crate) fn push_project_scope(query: &mut QueryBuilder<'_, Any>, alias: &str, scope: &Scope) {
    let Scope::Member(user_id) = scope else {
        return;
    };

    query.push(format!(" AND ({alias}.owner_id = "));
    query.push_bind(user_id.clone());
    query.push(format!(
        " OR EXISTS (SELECT 1 FROM project_members pm WHERE pm.project_id = {alias}.id AND pm.user_id = "
    ));
    query.push_bind(user_id.clone());
    query.push("))");
}

/// Appends ` AND <visibility>` for a `tasks` row aliased as `alias`: the
/// caller is the assignee or can see the task's project.
pub(crate) fn push_task_scope(query: &mut QueryBuilder<'_, Any>, alias: &str, scope: &Scope) {
    let Scope::Member(user_id) = scope else {
        return;
    };

    query.push(format!(" AND ({alias}.assigned_to = "));
    query.push_bind(user_id.clone());
    query.push(format!(
        r#"
        OR EXISTS (
            SELECT 1
            FROM projects vp
            WHERE vp.id = {alias}.project_id
              AND (
                vp.owner_id =
        "#
    ));
    query.push_bind(user_id.clone());
    query.push(
        r#"
                OR EXISTS (SELECT 1 FROM project_members vpm WHERE vpm.project_id = vp.id AND vpm.user_id =
        "#,
    );
    query.push_bind(user_id.clone());
    query.push("))))");
}

pub(crate) async fn ensure_user_exists(conn: &mut AnyConnection, user_id: &str) -> AppResult<()> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    if found.is_none() {
        return Err(AppError::BadRequest(format!("user '{user_id}' not found")));
    }
    Ok(())
}

pub(crate) async fn ensure_project_exists(
    conn: &mut AnyConnection,
    project_id: &str,
) -> AppResult<()> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(&mut *conn)
        .await?;

    if found.is_none() {
        return Err(AppError::BadRequest(format!(
            "project '{project_id}' not found"
        )));
    }
    Ok(())
}

/// Keeps the first occurrence of every key, preserving input order.
pub(crate) fn dedupe_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + std::hash::Hash,
    F: Fn(&T) -> K,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::dedupe_by_key;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let entries = vec![("u1", "admin"), ("u2", "member"), ("u1", "member")];
        let deduped = dedupe_by_key(entries, |(user, _)| *user);
        assert_eq!(deduped, vec![("u1", "admin"), ("u2", "member")]);
    }
}
