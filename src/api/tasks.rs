use axum::extract::{Path, Query, State};
use axum::http::header::{ETAG, IF_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::{admin_only, can_view_task, ensure_visible, Scope};
use crate::api::{ApiJson, UserRef};
use crate::audit::RequestMeta;
use crate::auth::CurrentUser;
use crate::db::models::{TaskCommentRecord, TaskDetails, TaskRecord, UserSummary};
use crate::db::queries::projects::{get_project, is_project_visible};
use crate::db::queries::tasks::{self, NewTaskInput, TaskFilters};
use crate::domain::{AuditAction, AuditEntity, Priority, TaskStatus};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{board_move, classify, validate_hours, TaskChanges};
use crate::state::AppState;
use crate::timestamps::{normalize_optional_timestamp, now_timestamp};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/reorder", put(reorder_tasks))
        .route(
            "/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/move", post(move_task))
        .route("/tasks/{id}/comments", post(add_comment))
}

type TaskWithTag = ([(axum::http::HeaderName, String); 1], Json<TaskResponse>);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskListQuery {
    project: Option<String>,
    status: Option<String>,
    assigned_to: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    title: Option<String>,
    project: Option<String>,
    #[serde(default)]
    description: String,
    assigned_to: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
    estimated_hours: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MoveTaskRequest {
    status: String,
    order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    project: String,
    status: String,
    task_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommentRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub project: String,
    pub assigned_to: Option<UserRef>,
    pub status: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub tags: Vec<String>,
    pub order: i64,
    pub is_user_completed: bool,
    pub user_completed_at: Option<String>,
    pub created_by: String,
    pub comments: Vec<CommentResponse>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: String,
    pub user: UserRef,
    pub text: String,
    pub created_at: String,
}

async fn list_tasks(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let filters = TaskFilters {
        project: query.project.filter(|value| !value.is_empty()),
        status: query
            .status
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(TaskStatus::parse)
            .transpose()?,
        assigned_to: query.assigned_to.filter(|value| !value.is_empty()),
        priority: query
            .priority
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(Priority::parse)
            .transpose()?,
    };

    let tasks = tasks::list_tasks(&state.db, &Scope::for_user(&user), &filters).await?;
    Ok(Json(tasks.into_iter().map(map_task).collect()))
}

async fn create_task(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<(StatusCode, TaskWithTag)> {
    admin_only(&user)?;

    let request: CreateTaskRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid task payload: {error}")))?;

    let (title, project_id) = match (request.title, request.project) {
        (Some(title), Some(project)) if !title.trim().is_empty() && !project.is_empty() => {
            (title, project)
        }
        _ => {
            return Err(AppError::BadRequest(
                "task title and project are required".to_string(),
            ))
        }
    };

    let details = tasks::create_task(
        &state.db,
        NewTaskInput {
            project_id,
            title,
            description: request.description,
            assigned_to: request.assigned_to.filter(|id| !id.trim().is_empty()),
            status: request
                .status
                .as_deref()
                .map(TaskStatus::parse)
                .transpose()?
                .unwrap_or(TaskStatus::Todo),
            priority: request
                .priority
                .as_deref()
                .map(Priority::parse)
                .transpose()?
                .unwrap_or(Priority::Medium),
            due_date: normalize_optional_timestamp(request.due_date.as_deref(), "dueDate")?,
            estimated_hours: validate_hours(
                request.estimated_hours.map(Some),
                "estimatedHours",
            )?
            .flatten(),
            tags: request.tags,
            created_by: user.id.clone(),
        },
    )
    .await?;

    let task_id = details.task.id.clone();
    tracing::info!(task_id = %task_id, project_id = %details.task.project_id, "task created");

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Create,
        AuditEntity::Task,
        Some(&task_id),
        Some(payload),
    ));
    if let Some(assignee) = details.task.assigned_to.as_deref() {
        state.audit.record(meta.entry(
            &user.id,
            AuditAction::AssignTask,
            AuditEntity::Task,
            Some(&task_id),
            Some(serde_json::json!({ "assignedTo": assignee })),
        ));
    }

    Ok((StatusCode::CREATED, with_etag(details)))
}

async fn get_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<TaskWithTag> {
    let details = tasks::get_task_details(&state.db, &id).await?;
    ensure_task_visible(&state, &user, &details.task).await?;
    Ok(with_etag(details))
}

async fn update_task(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<TaskWithTag> {
    let task = tasks::get_task(&state.db, &id).await?;
    check_if_match(&headers, &task)?;

    let Value::Object(body) = payload.clone() else {
        return Err(AppError::BadRequest(
            "request body must be a JSON object".to_string(),
        ));
    };

    let patch = classify(&user, task.assigned_to.as_deref(), body)?;
    let action = patch.audit_action(task.assigned_to.as_deref());
    let changes = patch.into_changes()?;

    if changes.is_empty() {
        let details = tasks::get_task_details(&state.db, &id).await?;
        return Ok(with_etag(details));
    }

    let details = save_changes(&state, task, changes).await?;

    state.audit.record(meta.entry(
        &user.id,
        action,
        AuditEntity::Task,
        Some(&id),
        Some(payload),
    ));

    Ok(with_etag(details))
}

async fn move_task(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<TaskWithTag> {
    admin_only(&user)?;

    let request: MoveTaskRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid move payload: {error}")))?;

    let task = tasks::get_task(&state.db, &id).await?;
    check_if_match(&headers, &task)?;

    let from = task.status.clone();
    let details = save_changes(&state, task, board_move(&request.status, request.order)?).await?;

    tracing::debug!(task_id = %id, from = %from, to = %details.task.status, "task moved");
    state.audit.record(meta.entry(
        &user.id,
        AuditAction::ChangeStatus,
        AuditEntity::Task,
        Some(&id),
        Some(payload),
    ));

    Ok(with_etag(details))
}

async fn reorder_tasks(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let request: ReorderRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid reorder payload: {error}")))?;
    let status = TaskStatus::parse(&request.status)?;

    let project = get_project(&state.db, &request.project).await?;
    let visible = is_project_visible(&state.db, &project.id, &Scope::for_user(&user)).await?;
    ensure_visible(visible, "project")?;
    ensure_may_reorder(&state, &user, &request.task_ids).await?;

    let lane = tasks::reorder_lane(&state.db, &project.id, status, &request.task_ids).await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Update,
        AuditEntity::Task,
        None,
        Some(payload),
    ));

    Ok(Json(lane.into_iter().map(map_task).collect()))
}

async fn delete_task(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    admin_only(&user)?;

    tasks::delete_task(&state.db, &id).await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Delete,
        AuditEntity::Task,
        Some(&id),
        None,
    ));

    Ok(StatusCode::NO_CONTENT)
}

async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<(StatusCode, TaskWithTag)> {
    let request: CommentRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid comment payload: {error}")))?;

    let task = tasks::get_task(&state.db, &id).await?;
    ensure_task_visible(&state, &user, &task).await?;

    let details = tasks::add_comment(&state.db, &id, &user.id, &request.text).await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::AddComment,
        AuditEntity::Task,
        Some(&id),
        Some(payload),
    ));

    Ok((StatusCode::CREATED, with_etag(details)))
}

/// Reordering sets status, so a non-admin must be the assignee of every listed
/// task. Unknown ids are left for `reorder_lane` to reject.
async fn ensure_may_reorder(
    state: &AppState,
    user: &CurrentUser,
    task_ids: &[String],
) -> AppResult<()> {
    if user.is_admin() {
        return Ok(());
    }

    for task_id in task_ids {
        let task = match tasks::get_task(&state.db, task_id).await {
            Ok(task) => task,
            Err(AppError::NotFound(_)) => continue,
            Err(error) => return Err(error),
        };

        if task.assigned_to.as_deref() != Some(user.id.as_str()) {
            return Err(AppError::Forbidden(
                "only an admin or the assignee may change a task's status".to_string(),
            ));
        }
    }

    Ok(())
}

async fn ensure_task_visible(
    state: &AppState,
    user: &CurrentUser,
    task: &TaskRecord,
) -> AppResult<()> {
    let scope = Scope::for_user(user);
    let project_visible = match scope {
        Scope::All => true,
        Scope::Member(_) => is_project_visible(&state.db, &task.project_id, &scope).await?,
    };

    ensure_visible(
        can_view_task(user, task.assigned_to.as_deref(), project_visible),
        "task",
    )
}

async fn save_changes(
    state: &AppState,
    task: TaskRecord,
    changes: TaskChanges,
) -> AppResult<TaskDetails> {
    let expected_version = task.version;
    let mut updated = task;
    let tags = changes.apply_to(&mut updated, &now_timestamp());
    tasks::save_task(&state.db, &updated, expected_version, tags).await
}

/// A present `If-Match` must name the stored version.
fn check_if_match(headers: &HeaderMap, task: &TaskRecord) -> AppResult<()> {
    let Some(value) = headers.get(IF_MATCH) else {
        return Ok(());
    };

    let expected = value
        .to_str()
        .ok()
        .and_then(parse_version_tag)
        .ok_or_else(|| AppError::BadRequest("If-Match must carry a task version".to_string()))?;

    if expected != task.version {
        return Err(AppError::Conflict(format!(
            "task is at version {}, not {expected}",
            task.version
        )));
    }

    Ok(())
}

fn parse_version_tag(value: &str) -> Option<i64> {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    value.trim_matches('"').parse().ok()
}

fn with_etag(details: TaskDetails) -> TaskWithTag {
    let etag = format!("\"{}\"", details.task.version);
    ([(ETAG, etag)], Json(map_task(details)))
}

pub fn map_task(details: TaskDetails) -> TaskResponse {
    let TaskDetails {
        task,
        tags,
        assignee,
        comments,
    } = details;

    TaskResponse {
        assigned_to: task.assigned_to.map(|id| UserRef::new(assignee, id)),
        comments: comments.into_iter().map(map_comment).collect(),
        tags,
        id: task.id,
        title: task.title,
        description: task.description,
        project: task.project_id,
        status: task.status,
        priority: task.priority,
        due_date: task.due_date,
        estimated_hours: task.estimated_hours,
        actual_hours: task.actual_hours,
        order: task.sort_order,
        is_user_completed: task.is_user_completed != 0,
        user_completed_at: task.user_completed_at,
        created_by: task.created_by,
        version: task.version,
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

fn map_comment(comment: TaskCommentRecord) -> CommentResponse {
    let summary = match (comment.user_name, comment.user_email) {
        (Some(name), Some(email)) => Some(UserSummary {
            id: comment.user_id.clone(),
            name,
            email,
        }),
        _ => None,
    };

    CommentResponse {
        id: comment.id,
        user: UserRef::new(summary, comment.user_id),
        text: comment.text,
        created_at: comment.created_at,
    }
}
