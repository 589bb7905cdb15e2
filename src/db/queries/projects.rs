use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyConnection, AnyPool};
use uuid::Uuid;

use crate::access::Scope;
use crate::db::models::{ProjectDetails, ProjectMemberRecord, ProjectRecord, UserSummary};
use crate::db::queries::{begin_write, dedupe_by_key, ensure_user_exists, push_project_scope};
use crate::domain::{Priority, ProjectRole, ProjectStatus};
use crate::error::{AppError, AppResult};
use crate::timestamps::now_timestamp;

#[derive(Debug, Clone)]
pub struct TeamEntry {
    pub user_id: String,
    pub role: ProjectRole,
}

#[derive(Debug, Clone)]
pub struct NewProjectInput {
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub status: ProjectStatus,
    pub priority: Priority,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub team: Vec<TeamEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProjectInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<Priority>,
    pub start_date: Option<Option<String>>,
    pub end_date: Option<Option<String>>,
    pub team: Option<Vec<TeamEntry>>,
}

const PROJECT_COLUMNS: &str = r#"
    p.id,
    p.name,
    p.description,
    p.owner_id,
    p.status,
    p.priority,
    p.start_date,
    p.end_date,
    p.created_at,
    p.updated_at
"#;

pub async fn list_projects(pool: &AnyPool, scope: &Scope) -> AppResult<Vec<ProjectDetails>> {
    let projects = list_project_records(pool, scope).await?;

    let mut details = Vec::with_capacity(projects.len());
    for project in projects {
        details.push(project_details(pool, project).await?);
    }

    Ok(details)
}

pub async fn list_project_records(pool: &AnyPool, scope: &Scope) -> AppResult<Vec<ProjectRecord>> {
    let mut query = QueryBuilder::<Any>::new(format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p WHERE 1 = 1"
    ));
    push_project_scope(&mut query, "p", scope);
    query.push(" ORDER BY p.created_at DESC, p.id ASC");

    let projects = query.build_query_as::<ProjectRecord>().fetch_all(pool).await?;
    Ok(projects)
}

pub async fn get_project(pool: &AnyPool, project_id: &str) -> AppResult<ProjectRecord> {
    sqlx::query_as::<Any, ProjectRecord>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("project not found".to_string()))
}

pub async fn get_project_details(pool: &AnyPool, project_id: &str) -> AppResult<ProjectDetails> {
    let project = get_project(pool, project_id).await?;
    project_details(pool, project).await
}

/// Whether `scope` may read the project. Missing projects are reported as not visible.
pub async fn is_project_visible(
    pool: &AnyPool,
    project_id: &str,
    scope: &Scope,
) -> AppResult<bool> {
    let mut query = QueryBuilder::<Any>::new("SELECT COUNT(*) FROM projects p WHERE p.id = ");
    query.push_bind(project_id.to_string());
    push_project_scope(&mut query, "p", scope);

    let count = query.build_query_scalar::<i64>().fetch_one(pool).await?;
    Ok(count > 0)
}

pub async fn create_project(pool: &AnyPool, input: NewProjectInput) -> AppResult<ProjectDetails> {
    let name = required_name(&input.name)?;
    let project_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = begin_write(pool).await?;

    sqlx::query(
        r#"
        INSERT INTO projects (
            id,
            name,
            description,
            owner_id,
            status,
            priority,
            start_date,
            end_date,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&project_id)
    .bind(&name)
    .bind(input.description.trim())
    .bind(&input.owner_id)
    .bind(input.status.as_str())
    .bind(input.priority.as_str())
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    replace_team(&mut tx, &project_id, input.team).await?;

    tx.commit().await?;

    get_project_details(pool, &project_id).await
}

pub async fn update_project(
    pool: &AnyPool,
    project_id: &str,
    input: UpdateProjectInput,
) -> AppResult<ProjectDetails> {
    let project = get_project(pool, project_id).await?;

    let name = match input.name {
        Some(value) => required_name(&value)?,
        None => project.name,
    };
    let description = input
        .description
        .map(|value| value.trim().to_string())
        .unwrap_or(project.description);
    let status = input
        .status
        .map(|status| status.as_str().to_string())
        .unwrap_or(project.status);
    let priority = input
        .priority
        .map(|priority| priority.as_str().to_string())
        .unwrap_or(project.priority);
    let start_date = input.start_date.unwrap_or(project.start_date);
    let end_date = input.end_date.unwrap_or(project.end_date);

    let mut tx = begin_write(pool).await?;

    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, description = ?, status = ?, priority = ?,
            start_date = ?, end_date = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&description)
    .bind(&status)
    .bind(&priority)
    .bind(start_date)
    .bind(end_date)
    .bind(now_timestamp())
    .bind(project_id)
    .execute(&mut *tx)
    .await?;

    if let Some(team) = input.team {
        replace_team(&mut tx, project_id, team).await?;
    }

    tx.commit().await?;

    get_project_details(pool, project_id).await
}

/// Deletes the project and its tasks, and detaches it from every team.
pub async fn delete_project(pool: &AnyPool, project_id: &str) -> AppResult<()> {
    let mut tx = begin_write(pool).await?;

    sqlx::query(
        "DELETE FROM task_tags WHERE task_id IN (SELECT id FROM tasks WHERE project_id = ?)",
    )
    .bind(project_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM task_comments WHERE task_id IN (SELECT id FROM tasks WHERE project_id = ?)",
    )
    .bind(project_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM tasks WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM project_members WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM team_projects WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("project not found".to_string()));
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_project_members(
    pool: &AnyPool,
    project_id: &str,
) -> AppResult<Vec<ProjectMemberRecord>> {
    let members = sqlx::query_as::<Any, ProjectMemberRecord>(
        r#"
        SELECT pm.project_id, pm.user_id, pm.role, u.name, u.email
        FROM project_members pm
        INNER JOIN users u ON u.id = pm.user_id
        WHERE pm.project_id = ?
        ORDER BY pm.position ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

async fn project_details(pool: &AnyPool, project: ProjectRecord) -> AppResult<ProjectDetails> {
    let owner = sqlx::query_as::<Any, UserSummary>("SELECT id, name, email FROM users WHERE id = ?")
        .bind(&project.owner_id)
        .fetch_optional(pool)
        .await?;

    let team = list_project_members(pool, &project.id).await?;

    Ok(ProjectDetails {
        project,
        owner,
        team,
    })
}

async fn replace_team(
    conn: &mut AnyConnection,
    project_id: &str,
    team: Vec<TeamEntry>,
) -> AppResult<()> {
    sqlx::query("DELETE FROM project_members WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    let team = dedupe_by_key(team, |entry| entry.user_id.clone());
    for (position, entry) in team.into_iter().enumerate() {
        ensure_user_exists(&mut *conn, &entry.user_id).await?;

        sqlx::query(
            "INSERT INTO project_members (project_id, user_id, role, position) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(&entry.user_id)
        .bind(entry.role.as_str())
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn required_name(value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("project name is required".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use crate::access::Scope;
    use crate::db::queries::{projects, tasks, teams};
    use crate::domain::{ProjectRole, Role, TaskStatus, TeamRole};
    use crate::error::AppError;
    use crate::test_support::{insert_project, insert_task, insert_user, setup_db};

    #[tokio::test]
    async fn member_scope_sees_owned_and_joined_projects_only() {
        let (_temp_dir, pool, _config) = setup_db("projects-scope").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let alice = insert_user(&pool, "Alice", Role::User).await;
        let bob = insert_user(&pool, "Bob", Role::User).await;

        let owned = insert_project(&pool, "Owned", &alice.id, &[]).await;
        let joined = insert_project(&pool, "Joined", &admin.id, &[&alice.id]).await;
        let hidden = insert_project(&pool, "Hidden", &admin.id, &[&bob.id]).await;

        let visible = projects::list_projects(&pool, &Scope::Member(alice.id.clone()))
            .await
            .expect("projects should list");
        let mut names: Vec<&str> = visible.iter().map(|p| p.project.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Joined", "Owned"]);

        let scope = Scope::Member(alice.id.clone());
        assert!(projects::is_project_visible(&pool, &owned.id, &scope).await.expect("ok"));
        assert!(projects::is_project_visible(&pool, &joined.id, &scope).await.expect("ok"));
        assert!(!projects::is_project_visible(&pool, &hidden.id, &scope).await.expect("ok"));

        let everything = projects::list_projects(&pool, &Scope::All)
            .await
            .expect("admin listing should succeed");
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn team_entries_are_deduplicated_and_must_exist() {
        let (_temp_dir, pool, _config) = setup_db("projects-team").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let alice = insert_user(&pool, "Alice", Role::User).await;

        let project = projects::create_project(
            &pool,
            projects::NewProjectInput {
                name: "  Apollo  ".to_string(),
                description: String::new(),
                owner_id: admin.id.clone(),
                status: crate::domain::ProjectStatus::Active,
                priority: crate::domain::Priority::High,
                start_date: None,
                end_date: None,
                team: vec![
                    projects::TeamEntry {
                        user_id: alice.id.clone(),
                        role: ProjectRole::Admin,
                    },
                    projects::TeamEntry {
                        user_id: alice.id.clone(),
                        role: ProjectRole::Member,
                    },
                ],
            },
        )
        .await
        .expect("project should be created");

        assert_eq!(project.project.name, "Apollo");
        assert_eq!(project.team.len(), 1);
        assert_eq!(project.team[0].role, "admin");
        assert_eq!(project.owner.map(|owner| owner.id), Some(admin.id.clone()));

        let error = projects::update_project(
            &pool,
            &project.project.id,
            projects::UpdateProjectInput {
                team: Some(vec![projects::TeamEntry {
                    user_id: "missing".to_string(),
                    role: ProjectRole::Member,
                }]),
                ..projects::UpdateProjectInput::default()
            },
        )
        .await
        .expect_err("unknown member should be rejected");
        assert!(matches!(error, AppError::BadRequest(_)));

        let unchanged = projects::get_project_details(&pool, &project.project.id)
            .await
            .expect("project should load");
        assert_eq!(unchanged.team.len(), 1, "failed update must not touch the team");
    }

    #[tokio::test]
    async fn delete_cascades_to_tasks_and_detaches_teams() {
        let (_temp_dir, pool, _config) = setup_db("projects-delete").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let project = insert_project(&pool, "Doomed", &admin.id, &[]).await;
        let task = insert_task(&pool, &project.id, "t", None, TaskStatus::Todo, &admin.id).await;

        let team = teams::create_team(
            &pool,
            teams::NewTeamInput {
                name: "Core".to_string(),
                description: String::new(),
                created_by: admin.id.clone(),
                members: vec![teams::TeamMemberEntry {
                    user_id: admin.id.clone(),
                    role: TeamRole::Lead,
                }],
                projects: vec![project.id.clone()],
            },
        )
        .await
        .expect("team should be created");
        assert_eq!(team.projects.len(), 1);

        projects::delete_project(&pool, &project.id)
            .await
            .expect("project should be deleted");

        assert!(matches!(
            tasks::get_task(&pool, &task.id).await,
            Err(AppError::NotFound(_))
        ));

        let team = teams::get_team_details(&pool, &team.team.id)
            .await
            .expect("team survives");
        assert!(team.projects.is_empty());
        assert_eq!(team.members.len(), 1);
    }
}
