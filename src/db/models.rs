use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub avatar: Option<String>,
    pub age: Option<i64>,
    pub bio: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The `{id, name, email}` shape used wherever another entity references a user.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub status: String,
    pub priority: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProjectMemberRecord {
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct ProjectDetails {
    pub project: ProjectRecord,
    pub owner: Option<UserSummary>,
    pub team: Vec<ProjectMemberRecord>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub sort_order: i64,
    pub is_user_completed: i64,
    pub user_completed_at: Option<String>,
    pub created_by: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskCommentRecord {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub text: String,
    pub created_at: String,
}

/// Row of the assigned-task summary shown on a user's page.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AssignedTaskRecord {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskDetails {
    pub task: TaskRecord,
    pub tags: Vec<String>,
    pub assignee: Option<UserSummary>,
    pub comments: Vec<TaskCommentRecord>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TeamMemberRecord {
    pub team_id: String,
    pub user_id: String,
    pub role: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TeamProjectRecord {
    pub team_id: String,
    pub project_id: String,
    pub name: String,
    pub status: String,
    pub priority: String,
}

#[derive(Debug, Clone)]
pub struct TeamDetails {
    pub team: TeamRecord,
    pub created_by: Option<UserSummary>,
    pub members: Vec<TeamMemberRecord>,
    pub projects: Vec<TeamProjectRecord>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRecord {
    pub id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub changes: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummaryRecord {
    pub action: String,
    pub entity: String,
    pub count: i64,
}
