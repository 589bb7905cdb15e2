use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::access::{can_view_project, ensure_visible, Scope};
use crate::analytics::{
    self, Contributor, LeaderboardEntry, MemberActivity, Overview, PersonalStats, TaskStats,
    TimelinePoint,
};
use crate::api::audit_logs::{map_audit_log, AuditLogResponse};
use crate::auth::CurrentUser;
use crate::db::queries::analytics::{count_active_assignees, list_user_summaries};
use crate::db::queries::audit::recent_audit_logs;
use crate::db::queries::projects::{get_project_details, list_project_records};
use crate::db::queries::tasks::{list_task_records, TaskFilters};
use crate::db::queries::teams::count_teams;
use crate::db::queries::users::count_users_by_role;
use crate::domain::Role;
use crate::error::AppResult;
use crate::state::AppState;

const RECENT_ACTIVITY: i64 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics/dashboard-stats", get(dashboard_stats))
        .route("/analytics/project/{project_id}", get(project_analytics))
        .route("/analytics/user-stats", get(user_stats))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardStats {
    overview: Overview,
    tasks_by_status: BTreeMap<String, i64>,
    tasks_by_priority: BTreeMap<String, i64>,
    recent_activity: Vec<AuditLogResponse>,
    top_contributors: Vec<Contributor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectAnalytics {
    project_id: String,
    project_name: String,
    task_stats: TaskStats,
    completion_timeline: Vec<TimelinePoint>,
    avg_completion_time: i64,
    team_activity: Vec<MemberActivity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStats {
    me: PersonalStats,
    leaderboard: Vec<LeaderboardEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<Totals>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Totals {
    users: i64,
    admins: i64,
    teams: i64,
    active_users: i64,
    utilization: i64,
}

async fn dashboard_stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<DashboardStats>> {
    let scope = Scope::for_user(&user);
    let projects = list_project_records(&state.db, &scope).await?;
    let tasks = list_task_records(&state.db, &scope, &TaskFilters::default()).await?;

    let activity_owner = (!user.is_admin()).then_some(user.id.as_str());
    let recent_activity = recent_audit_logs(&state.db, activity_owner, RECENT_ACTIVITY)
        .await?
        .into_iter()
        .map(map_audit_log)
        .collect();

    let top_contributors = if user.is_admin() {
        let users = list_user_summaries(&state.db).await?;
        analytics::top_contributors(&tasks, &users, analytics::TOP_CONTRIBUTORS)
    } else {
        Vec::new()
    };

    Ok(Json(DashboardStats {
        overview: analytics::overview(&projects, &tasks, Utc::now()),
        tasks_by_status: analytics::count_by_status(&tasks),
        tasks_by_priority: analytics::count_by_priority(&tasks),
        recent_activity,
        top_contributors,
    }))
}

async fn project_analytics(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(project_id): Path<String>,
) -> AppResult<Json<ProjectAnalytics>> {
    let details = get_project_details(&state.db, &project_id).await?;
    let visible = can_view_project(
        &user,
        &details.project.owner_id,
        details.team.iter().map(|member| member.user_id.as_str()),
    );
    ensure_visible(visible, "project")?;

    let filters = TaskFilters {
        project: Some(project_id.clone()),
        ..TaskFilters::default()
    };
    let tasks = list_task_records(&state.db, &Scope::All, &filters).await?;
    let users = list_user_summaries(&state.db).await?;

    Ok(Json(ProjectAnalytics {
        project_id,
        project_name: details.project.name,
        task_stats: analytics::task_stats(&tasks, Utc::now()),
        completion_timeline: analytics::completion_timeline(&tasks),
        avg_completion_time: analytics::average_completion_ms(&tasks),
        team_activity: analytics::team_activity(&tasks, &users),
    }))
}

async fn user_stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<UserStats>> {
    let scope = Scope::for_user(&user);
    let tasks = list_task_records(&state.db, &scope, &TaskFilters::default()).await?;
    let users = list_user_summaries(&state.db).await?;

    let totals = if user.is_admin() {
        let user_count = count_users_by_role(&state.db, None).await?;
        let active_users = count_active_assignees(&state.db).await?;
        Some(Totals {
            users: user_count,
            admins: count_users_by_role(&state.db, Some(Role::Admin)).await?,
            teams: count_teams(&state.db).await?,
            active_users,
            utilization: analytics::utilization(active_users, user_count),
        })
    } else {
        None
    };

    Ok(Json(UserStats {
        me: analytics::personal_stats(&tasks, &user.id, Utc::now()),
        leaderboard: analytics::leaderboard(&tasks, &users),
        totals,
    }))
}
