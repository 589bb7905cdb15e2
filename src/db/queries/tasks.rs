use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyConnection, AnyPool};
use uuid::Uuid;

use crate::access::Scope;
use crate::db::models::{TaskCommentRecord, TaskDetails, TaskRecord, UserSummary};
use crate::db::queries::{
    begin_write, ensure_project_exists, ensure_user_exists, push_task_scope,
};
use crate::domain::{Priority, TaskStatus};
use crate::error::{AppError, AppResult};
use crate::lifecycle::normalize_tags;
use crate::timestamps::now_timestamp;

#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub project: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone)]
pub struct NewTaskInput {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub tags: Vec<String>,
    pub created_by: String,
}

pub(crate) const TASK_COLUMNS: &str = r#"
    t.id,
    t.project_id,
    t.title,
    t.description,
    t.assigned_to,
    t.status,
    t.priority,
    t.due_date,
    t.estimated_hours,
    t.actual_hours,
    t.sort_order,
    t.is_user_completed,
    t.user_completed_at,
    t.created_by,
    t.version,
    t.created_at,
    t.updated_at
"#;

pub async fn list_task_records(
    pool: &AnyPool,
    scope: &Scope,
    filters: &TaskFilters,
) -> AppResult<Vec<TaskRecord>> {
    let mut query = QueryBuilder::<Any>::new(format!(
        "SELECT {TASK_COLUMNS} FROM tasks t WHERE 1 = 1"
    ));

    if let Some(project) = &filters.project {
        query.push(" AND t.project_id = ");
        query.push_bind(project.clone());
    }

    if let Some(status) = filters.status {
        query.push(" AND t.status = ");
        query.push_bind(status.as_str());
    }

    if let Some(assigned_to) = &filters.assigned_to {
        query.push(" AND t.assigned_to = ");
        query.push_bind(assigned_to.clone());
    }

    if let Some(priority) = filters.priority {
        query.push(" AND t.priority = ");
        query.push_bind(priority.as_str());
    }

    push_task_scope(&mut query, "t", scope);

    query.push(
        r#"
        ORDER BY
            t.project_id ASC,
            CASE t.status
                WHEN 'todo' THEN 0
                WHEN 'in-progress' THEN 1
                WHEN 'in-review' THEN 2
                WHEN 'completed' THEN 3
                ELSE 4
            END,
            t.sort_order ASC,
            t.created_at ASC
        "#,
    );

    let tasks = query.build_query_as::<TaskRecord>().fetch_all(pool).await?;
    Ok(tasks)
}

pub async fn list_tasks(
    pool: &AnyPool,
    scope: &Scope,
    filters: &TaskFilters,
) -> AppResult<Vec<TaskDetails>> {
    let records = list_task_records(pool, scope, filters).await?;

    let mut tasks = Vec::with_capacity(records.len());
    for record in records {
        tasks.push(task_details(pool, record).await?);
    }

    Ok(tasks)
}

pub async fn get_task(pool: &AnyPool, task_id: &str) -> AppResult<TaskRecord> {
    sqlx::query_as::<Any, TaskRecord>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?"
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("task not found".to_string()))
}

pub async fn get_task_details(pool: &AnyPool, task_id: &str) -> AppResult<TaskDetails> {
    let task = get_task(pool, task_id).await?;
    task_details(pool, task).await
}

/// Inserts a task at the end of its lane: `order` is the number of tasks
/// already in `(project, status)`.
pub async fn create_task(pool: &AnyPool, input: NewTaskInput) -> AppResult<TaskDetails> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::BadRequest("task title is required".to_string()));
    }

    let task_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = begin_write(pool).await?;

    let project_exists: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE id = ?")
        .bind(&input.project_id)
        .fetch_optional(&mut *tx)
        .await?;
    if project_exists.is_none() {
        return Err(AppError::NotFound("project not found".to_string()));
    }

    if let Some(assigned_to) = input.assigned_to.as_deref() {
        ensure_user_exists(&mut tx, assigned_to).await?;
    }

    let sort_order: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ? AND status = ?")
            .bind(&input.project_id)
            .bind(input.status.as_str())
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO tasks (
            id,
            project_id,
            title,
            description,
            assigned_to,
            status,
            priority,
            due_date,
            estimated_hours,
            sort_order,
            created_by,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task_id)
    .bind(&input.project_id)
    .bind(&title)
    .bind(input.description.trim())
    .bind(input.assigned_to.as_deref())
    .bind(input.status.as_str())
    .bind(input.priority.as_str())
    .bind(input.due_date.as_deref())
    .bind(input.estimated_hours)
    .bind(sort_order)
    .bind(&input.created_by)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    replace_tags(&mut tx, &task_id, normalize_tags(input.tags)).await?;

    tx.commit().await?;

    get_task_details(pool, &task_id).await
}

/// Writes every column of `task` if the stored row is still at
/// `expected_version`, bumping the version. A stale version is a 409.
pub async fn save_task(
    pool: &AnyPool,
    task: &TaskRecord,
    expected_version: i64,
    tags: Option<Vec<String>>,
) -> AppResult<TaskDetails> {
    let mut tx = begin_write(pool).await?;

    ensure_project_exists(&mut tx, &task.project_id).await?;
    if let Some(assigned_to) = task.assigned_to.as_deref() {
        ensure_user_exists(&mut tx, assigned_to).await?;
    }

    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET
            project_id = ?,
            title = ?,
            description = ?,
            assigned_to = ?,
            status = ?,
            priority = ?,
            due_date = ?,
            estimated_hours = ?,
            actual_hours = ?,
            sort_order = ?,
            is_user_completed = ?,
            user_completed_at = ?,
            version = version + 1,
            updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(&task.project_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.assigned_to.as_deref())
    .bind(&task.status)
    .bind(&task.priority)
    .bind(task.due_date.as_deref())
    .bind(task.estimated_hours)
    .bind(task.actual_hours)
    .bind(task.sort_order)
    .bind(task.is_user_completed)
    .bind(task.user_completed_at.as_deref())
    .bind(&task.updated_at)
    .bind(&task.id)
    .bind(expected_version)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(stale_or_missing(&mut tx, &task.id).await);
    }

    if let Some(tags) = tags {
        replace_tags(&mut tx, &task.id, tags).await?;
    }

    tx.commit().await?;

    get_task_details(pool, &task.id).await
}

/// Moves every listed task into the `status` lane with `order` = its index.
pub async fn reorder_lane(
    pool: &AnyPool,
    project_id: &str,
    status: TaskStatus,
    task_ids: &[String],
) -> AppResult<Vec<TaskDetails>> {
    let now = now_timestamp();
    let mut tx = begin_write(pool).await?;

    for (index, task_id) in task_ids.iter().enumerate() {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, sort_order = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(index as i64)
        .bind(&now)
        .bind(task_id)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "task '{task_id}' does not belong to project '{project_id}'"
            )));
        }
    }

    tx.commit().await?;

    list_tasks(
        pool,
        &Scope::All,
        &TaskFilters {
            project: Some(project_id.to_string()),
            status: Some(status),
            ..TaskFilters::default()
        },
    )
    .await
}

pub async fn delete_task(pool: &AnyPool, task_id: &str) -> AppResult<()> {
    let mut tx = begin_write(pool).await?;

    sqlx::query("DELETE FROM task_tags WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM task_comments WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("task not found".to_string()));
    }

    tx.commit().await?;
    Ok(())
}

pub async fn add_comment(
    pool: &AnyPool,
    task_id: &str,
    user_id: &str,
    text: &str,
) -> AppResult<TaskDetails> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("comment text is required".to_string()));
    }

    let task = get_task(pool, task_id).await?;
    let mut tx = begin_write(pool).await?;

    let seq: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_comments WHERE task_id = ?")
        .bind(&task.id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO task_comments (id, task_id, user_id, seq, text, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&task.id)
    .bind(user_id)
    .bind(seq)
    .bind(text)
    .bind(now_timestamp())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    task_details(pool, task).await
}

async fn task_details(pool: &AnyPool, task: TaskRecord) -> AppResult<TaskDetails> {
    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tag FROM task_tags WHERE task_id = ? ORDER BY tag ASC")
            .bind(&task.id)
            .fetch_all(pool)
            .await?;

    let assignee = match task.assigned_to.as_deref() {
        Some(user_id) => {
            sqlx::query_as::<Any, UserSummary>("SELECT id, name, email FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let comments = sqlx::query_as::<Any, TaskCommentRecord>(
        r#"
        SELECT c.id, c.task_id, c.user_id, u.name AS user_name, u.email AS user_email,
               c.text, c.created_at
        FROM task_comments c
        LEFT JOIN users u ON u.id = c.user_id
        WHERE c.task_id = ?
        ORDER BY c.seq ASC
        "#,
    )
    .bind(&task.id)
    .fetch_all(pool)
    .await?;

    Ok(TaskDetails {
        task,
        tags,
        assignee,
        comments,
    })
}

async fn replace_tags(conn: &mut AnyConnection, task_id: &str, tags: Vec<String>) -> AppResult<()> {
    sqlx::query("DELETE FROM task_tags WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    for tag in normalize_tags(tags) {
        sqlx::query("INSERT INTO task_tags (task_id, tag) VALUES (?, ?)")
            .bind(task_id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn stale_or_missing(conn: &mut AnyConnection, task_id: &str) -> AppError {
    let exists = sqlx::query_scalar::<Any, String>("SELECT id FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await;

    match exists {
        Ok(Some(_)) => AppError::Conflict(
            "task was modified by another request, reload and retry".to_string(),
        ),
        Ok(None) => AppError::NotFound("task not found".to_string()),
        Err(error) => error.into(),
    }
}
