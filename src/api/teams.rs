use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::admin_only;
use crate::api::{ApiJson, UserRef};
use crate::audit::RequestMeta;
use crate::auth::CurrentUser;
use crate::db::models::{TeamDetails, TeamProjectRecord, UserSummary};
use crate::db::queries::teams::{self, NewTeamInput, TeamMemberEntry, UpdateTeamInput};
use crate::domain::{AuditAction, AuditEntity, TeamRole};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/teams", get(list_teams).post(create_team))
        .route(
            "/teams/{id}",
            get(get_team).put(update_team).delete(delete_team),
        )
}

#[derive(Debug, Deserialize)]
struct MemberRequest {
    user: String,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTeamRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    members: Vec<MemberRequest>,
    #[serde(default)]
    projects: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateTeamRequest {
    name: Option<String>,
    description: Option<String>,
    members: Option<Vec<MemberRequest>>,
    projects: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeamResponse {
    id: String,
    name: String,
    description: String,
    created_by: UserRef,
    members: Vec<TeamMemberResponse>,
    projects: Vec<TeamProjectResponse>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct TeamMemberResponse {
    user: UserSummary,
    role: String,
}

#[derive(Debug, Serialize)]
struct TeamProjectResponse {
    id: String,
    name: String,
    status: String,
    priority: String,
}

async fn list_teams(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<TeamResponse>>> {
    let teams = teams::list_teams(&state.db).await?;
    Ok(Json(teams.into_iter().map(map_team).collect()))
}

async fn get_team(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<TeamResponse>> {
    let team = teams::get_team_details(&state.db, &id).await?;
    Ok(Json(map_team(team)))
}

async fn create_team(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<TeamResponse>)> {
    admin_only(&user)?;

    let request: CreateTeamRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid team payload: {error}")))?;

    let team = teams::create_team(
        &state.db,
        NewTeamInput {
            name: request.name,
            description: request.description,
            created_by: user.id.clone(),
            members: member_entries(request.members)?,
            projects: request.projects,
        },
    )
    .await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Create,
        AuditEntity::Team,
        Some(&team.team.id),
        Some(payload),
    ));

    Ok((StatusCode::CREATED, Json(map_team(team))))
}

async fn update_team(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<TeamResponse>> {
    admin_only(&user)?;

    let request: UpdateTeamRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid team payload: {error}")))?;

    let team = teams::update_team(
        &state.db,
        &id,
        UpdateTeamInput {
            name: request.name,
            description: request.description,
            members: request.members.map(member_entries).transpose()?,
            projects: request.projects,
        },
    )
    .await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Update,
        AuditEntity::Team,
        Some(&id),
        Some(payload),
    ));

    Ok(Json(map_team(team)))
}

async fn delete_team(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    admin_only(&user)?;

    teams::delete_team(&state.db, &id).await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Delete,
        AuditEntity::Team,
        Some(&id),
        None,
    ));

    Ok(StatusCode::NO_CONTENT)
}

fn member_entries(members: Vec<MemberRequest>) -> AppResult<Vec<TeamMemberEntry>> {
    members
        .into_iter()
        .map(|member| {
            Ok(TeamMemberEntry {
                user_id: member.user,
                role: member
                    .role
                    .as_deref()
                    .map(TeamRole::parse)
                    .transpose()?
                    .unwrap_or(TeamRole::Member),
            })
        })
        .collect()
}

fn map_team(details: TeamDetails) -> TeamResponse {
    let TeamDetails {
        team,
        created_by,
        members,
        projects,
    } = details;

    TeamResponse {
        created_by: UserRef::new(created_by, team.created_by),
        members: members
            .into_iter()
            .map(|member| TeamMemberResponse {
                user: UserSummary {
                    id: member.user_id,
                    name: member.name,
                    email: member.email,
                },
                role: member.role,
            })
            .collect(),
        projects: projects.into_iter().map(map_team_project).collect(),
        id: team.id,
        name: team.name,
        description: team.description,
        created_at: team.created_at,
        updated_at: team.updated_at,
    }
}

fn map_team_project(project: TeamProjectRecord) -> TeamProjectResponse {
    TeamProjectResponse {
        id: project.project_id,
        name: project.name,
        status: project.status,
        priority: project.priority,
    }
}
