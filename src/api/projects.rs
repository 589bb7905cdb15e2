use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::{admin_only, can_view_project, ensure_visible, owner_or_admin, Scope};
use crate::api::{ApiJson, UserRef};
use crate::audit::RequestMeta;
use crate::auth::CurrentUser;
use crate::db::models::{ProjectDetails, ProjectMemberRecord, UserSummary};
use crate::db::queries::projects::{self, NewProjectInput, TeamEntry, UpdateProjectInput};
use crate::domain::{nullable, AuditAction, AuditEntity, Priority, ProjectRole, ProjectStatus};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::timestamps::normalize_optional_timestamp;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
}

#[derive(Debug, Deserialize)]
struct TeamEntryRequest {
    user: String,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest {
    name: Option<String>,
    #[serde(default)]
    description: String,
    status: Option<String>,
    priority: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    team: Vec<TeamEntryRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProjectRequest {
    name: Option<String>,
    description: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    end_date: Option<Option<String>>,
    team: Option<Vec<TeamEntryRequest>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: UserRef,
    pub team: Vec<TeamMemberResponse>,
    pub status: String,
    pub priority: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct TeamMemberResponse {
    pub user: UserSummary,
    pub role: String,
}

async fn list_projects(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    let projects = projects::list_projects(&state.db, &Scope::for_user(&user)).await?;
    Ok(Json(projects.into_iter().map(map_project).collect()))
}

async fn create_project(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    admin_only(&user)?;

    let request: CreateProjectRequest = parse_body(payload.clone())?;
    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("project name is required".to_string()))?;

    let details = projects::create_project(
        &state.db,
        NewProjectInput {
            name,
            description: request.description,
            owner_id: user.id.clone(),
            status: request
                .status
                .as_deref()
                .map(ProjectStatus::parse)
                .transpose()?
                .unwrap_or(ProjectStatus::Active),
            priority: request
                .priority
                .as_deref()
                .map(Priority::parse)
                .transpose()?
                .unwrap_or(Priority::Medium),
            start_date: normalize_optional_timestamp(request.start_date.as_deref(), "startDate")?,
            end_date: normalize_optional_timestamp(request.end_date.as_deref(), "endDate")?,
            team: team_entries(request.team)?,
        },
    )
    .await?;

    tracing::info!(project_id = %details.project.id, owner_id = %user.id, "project created");
    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Create,
        AuditEntity::Project,
        Some(&details.project.id),
        Some(payload),
    ));

    Ok((StatusCode::CREATED, Json(map_project(details))))
}

async fn get_project(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ProjectResponse>> {
    let details = projects::get_project_details(&state.db, &id).await?;

    let visible = can_view_project(
        &user,
        &details.project.owner_id,
        details.team.iter().map(|member| member.user_id.as_str()),
    );
    ensure_visible(visible, "project")?;

    Ok(Json(map_project(details)))
}

async fn update_project(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<ProjectResponse>> {
    let project = projects::get_project(&state.db, &id).await?;
    owner_or_admin(&user, &project.owner_id)?;

    let request: UpdateProjectRequest = parse_body(payload.clone())?;

    let start_date = match request.start_date {
        Some(value) => Some(normalize_optional_timestamp(value.as_deref(), "startDate")?),
        None => None,
    };
    let end_date = match request.end_date {
        Some(value) => Some(normalize_optional_timestamp(value.as_deref(), "endDate")?),
        None => None,
    };

    let details = projects::update_project(
        &state.db,
        &id,
        UpdateProjectInput {
            name: request.name,
            description: request.description,
            status: request.status.as_deref().map(ProjectStatus::parse).transpose()?,
            priority: request.priority.as_deref().map(Priority::parse).transpose()?,
            start_date,
            end_date,
            team: request.team.map(team_entries).transpose()?,
        },
    )
    .await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Update,
        AuditEntity::Project,
        Some(&id),
        Some(payload),
    ));

    Ok(Json(map_project(details)))
}

async fn delete_project(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let project = projects::get_project(&state.db, &id).await?;
    owner_or_admin(&user, &project.owner_id)?;

    projects::delete_project(&state.db, &id).await?;

    tracing::info!(project_id = %id, deleted_by = %user.id, "project deleted");
    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Delete,
        AuditEntity::Project,
        Some(&id),
        None,
    ));

    Ok(StatusCode::NO_CONTENT)
}

fn parse_body<T: for<'de> Deserialize<'de>>(payload: Value) -> AppResult<T> {
    serde_json::from_value(payload)
        .map_err(|error| AppError::BadRequest(format!("invalid project payload: {error}")))
}

fn team_entries(team: Vec<TeamEntryRequest>) -> AppResult<Vec<TeamEntry>> {
    team.into_iter()
        .map(|entry| {
            Ok(TeamEntry {
                user_id: entry.user,
                role: entry
                    .role
                    .as_deref()
                    .map(ProjectRole::parse)
                    .transpose()?
                    .unwrap_or(ProjectRole::Member),
            })
        })
        .collect()
}

pub fn map_project(details: ProjectDetails) -> ProjectResponse {
    let ProjectDetails {
        project,
        owner,
        team,
    } = details;

    ProjectResponse {
        owner: UserRef::new(owner, project.owner_id),
        team: team.into_iter().map(map_member).collect(),
        id: project.id,
        name: project.name,
        description: project.description,
        status: project.status,
        priority: project.priority,
        start_date: project.start_date,
        end_date: project.end_date,
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

fn map_member(member: ProjectMemberRecord) -> TeamMemberResponse {
    TeamMemberResponse {
        user: UserSummary {
            id: member.user_id,
            name: member.name,
            email: member.email,
        },
        role: member.role,
    }
}
