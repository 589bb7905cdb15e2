use sqlx::{Any, AnyConnection, AnyPool};
use uuid::Uuid;

use crate::db::models::{TeamDetails, TeamMemberRecord, TeamProjectRecord, TeamRecord, UserSummary};
use crate::db::queries::{
    begin_write, dedupe_by_key, ensure_project_exists, ensure_user_exists,
};
use crate::domain::TeamRole;
use crate::error::{AppError, AppResult};
use crate::timestamps::now_timestamp;

#[derive(Debug, Clone)]
pub struct TeamMemberEntry {
    pub user_id: String,
    pub role: TeamRole,
}

#[derive(Debug, Clone)]
pub struct NewTeamInput {
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub members: Vec<TeamMemberEntry>,
    pub projects: Vec<String>,
}

/// Blank `name`/`description` keep the stored value; lists replace wholesale.
#[derive(Debug, Clone, Default)]
pub struct UpdateTeamInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub members: Option<Vec<TeamMemberEntry>>,
    pub projects: Option<Vec<String>>,
}

pub async fn list_teams(pool: &AnyPool) -> AppResult<Vec<TeamDetails>> {
    let teams = sqlx::query_as::<Any, TeamRecord>(
        r#"
        SELECT id, name, description, created_by, created_at, updated_at
        FROM teams
        ORDER BY created_at DESC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut details = Vec::with_capacity(teams.len());
    for team in teams {
        details.push(team_details(pool, team).await?);
    }

    Ok(details)
}

pub async fn get_team_details(pool: &AnyPool, team_id: &str) -> AppResult<TeamDetails> {
    let team = sqlx::query_as::<Any, TeamRecord>(
        r#"
        SELECT id, name, description, created_by, created_at, updated_at
        FROM teams
        WHERE id = ?
        "#,
    )
    .bind(team_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("team not found".to_string()))?;

    team_details(pool, team).await
}

pub async fn create_team(pool: &AnyPool, input: NewTeamInput) -> AppResult<TeamDetails> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("team name is required".to_string()));
    }

    let team_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = begin_write(pool).await?;

    sqlx::query(
        r#"
        INSERT INTO teams (id, name, description, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&team_id)
    .bind(&name)
    .bind(input.description.trim())
    .bind(&input.created_by)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    replace_members(&mut tx, &team_id, input.members).await?;
    replace_projects(&mut tx, &team_id, input.projects).await?;

    tx.commit().await?;

    get_team_details(pool, &team_id).await
}

pub async fn update_team(
    pool: &AnyPool,
    team_id: &str,
    input: UpdateTeamInput,
) -> AppResult<TeamDetails> {
    let current = get_team_details(pool, team_id).await?.team;

    let name = non_blank(input.name).unwrap_or(current.name);
    let description = non_blank(input.description).unwrap_or(current.description);

    let mut tx = begin_write(pool).await?;

    sqlx::query("UPDATE teams SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(now_timestamp())
        .bind(team_id)
        .execute(&mut *tx)
        .await?;

    if let Some(members) = input.members {
        replace_members(&mut tx, team_id, members).await?;
    }

    if let Some(projects) = input.projects {
        replace_projects(&mut tx, team_id, projects).await?;
    }

    tx.commit().await?;

    get_team_details(pool, team_id).await
}

/// Removes the team only; its members and projects are untouched.
pub async fn delete_team(pool: &AnyPool, team_id: &str) -> AppResult<()> {
    let mut tx = begin_write(pool).await?;

    sqlx::query("DELETE FROM team_members WHERE team_id = ?")
        .bind(team_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM team_projects WHERE team_id = ?")
        .bind(team_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM teams WHERE id = ?")
        .bind(team_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("team not found".to_string()));
    }

    tx.commit().await?;
    Ok(())
}

pub async fn count_teams(pool: &AnyPool) -> AppResult<i64> {
    let count = sqlx::query_scalar::<Any, i64>("SELECT COUNT(*) FROM teams")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn team_details(pool: &AnyPool, team: TeamRecord) -> AppResult<TeamDetails> {
    let created_by =
        sqlx::query_as::<Any, UserSummary>("SELECT id, name, email FROM users WHERE id = ?")
            .bind(&team.created_by)
            .fetch_optional(pool)
            .await?;

    let members = sqlx::query_as::<Any, TeamMemberRecord>(
        r#"
        SELECT tm.team_id, tm.user_id, tm.role, u.name, u.email
        FROM team_members tm
        INNER JOIN users u ON u.id = tm.user_id
        WHERE tm.team_id = ?
        ORDER BY tm.position ASC
        "#,
    )
    .bind(&team.id)
    .fetch_all(pool)
    .await?;

    let projects = sqlx::query_as::<Any, TeamProjectRecord>(
        r#"
        SELECT tp.team_id, tp.project_id, p.name, p.status, p.priority
        FROM team_projects tp
        INNER JOIN projects p ON p.id = tp.project_id
        WHERE tp.team_id = ?
        ORDER BY tp.position ASC
        "#,
    )
    .bind(&team.id)
    .fetch_all(pool)
    .await?;

    Ok(TeamDetails {
        team,
        created_by,
        members,
        projects,
    })
}

async fn replace_members(
    conn: &mut AnyConnection,
    team_id: &str,
    members: Vec<TeamMemberEntry>,
) -> AppResult<()> {
    sqlx::query("DELETE FROM team_members WHERE team_id = ?")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;

    let members = dedupe_by_key(members, |entry| entry.user_id.clone());
    for (position, member) in members.into_iter().enumerate() {
        ensure_user_exists(&mut *conn, &member.user_id).await?;

        sqlx::query(
            "INSERT INTO team_members (team_id, user_id, role, position) VALUES (?, ?, ?, ?)",
        )
        .bind(team_id)
        .bind(&member.user_id)
        .bind(member.role.as_str())
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn replace_projects(
    conn: &mut AnyConnection,
    team_id: &str,
    projects: Vec<String>,
) -> AppResult<()> {
    sqlx::query("DELETE FROM team_projects WHERE team_id = ?")
        .bind(team_id)
        .execute(&mut *conn)
        .await?;

    let projects = dedupe_by_key(projects, Clone::clone);
    for (position, project_id) in projects.into_iter().enumerate() {
        ensure_project_exists(&mut *conn, &project_id).await?;

        sqlx::query("INSERT INTO team_projects (team_id, project_id, position) VALUES (?, ?, ?)")
            .bind(team_id)
            .bind(&project_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use crate::db::queries::teams;
    use crate::domain::{Role, TeamRole};
    use crate::error::AppError;
    use crate::test_support::{insert_project, insert_user, setup_db};

    #[tokio::test]
    async fn blank_fields_keep_old_values_and_lists_replace() {
        let (_temp_dir, pool, _config) = setup_db("teams-update").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let alice = insert_user(&pool, "Alice", Role::User).await;
        let project = insert_project(&pool, "Apollo", &admin.id, &[]).await;

        let team = teams::create_team(
            &pool,
            teams::NewTeamInput {
                name: "Core".to_string(),
                description: "platform".to_string(),
                created_by: admin.id.clone(),
                members: vec![teams::TeamMemberEntry {
                    user_id: admin.id.clone(),
                    role: TeamRole::Lead,
                }],
                projects: vec![project.id.clone(), project.id.clone()],
            },
        )
        .await
        .expect("team should be created");
        assert_eq!(team.projects.len(), 1);
        assert_eq!(team.created_by.map(|user| user.id), Some(admin.id.clone()));

        let updated = teams::update_team(
            &pool,
            &team.team.id,
            teams::UpdateTeamInput {
                name: Some("   ".to_string()),
                description: None,
                members: Some(vec![teams::TeamMemberEntry {
                    user_id: alice.id.clone(),
                    role: TeamRole::Member,
                }]),
                projects: None,
            },
        )
        .await
        .expect("team should update");

        assert_eq!(updated.team.name, "Core");
        assert_eq!(updated.team.description, "platform");
        let member_ids: Vec<&str> = updated.members.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(member_ids, vec![alice.id.as_str()]);
        assert_eq!(updated.projects.len(), 1);
    }

    #[tokio::test]
    async fn unknown_references_are_rejected() {
        let (_temp_dir, pool, _config) = setup_db("teams-refs").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;

        let error = teams::create_team(
            &pool,
            teams::NewTeamInput {
                name: "Core".to_string(),
                description: String::new(),
                created_by: admin.id.clone(),
                members: Vec::new(),
                projects: vec!["missing".to_string()],
            },
        )
        .await
        .expect_err("unknown project should be rejected");
        assert!(matches!(error, AppError::BadRequest(_)));

        assert!(teams::list_teams(&pool).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn deleting_a_team_keeps_projects() {
        let (_temp_dir, pool, _config) = setup_db("teams-delete").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let project = insert_project(&pool, "Apollo", &admin.id, &[]).await;

        let team = teams::create_team(
            &pool,
            teams::NewTeamInput {
                name: "Core".to_string(),
                description: String::new(),
                created_by: admin.id.clone(),
                members: Vec::new(),
                projects: vec![project.id.clone()],
            },
        )
        .await
        .expect("team should be created");

        teams::delete_team(&pool, &team.team.id)
            .await
            .expect("team should be deleted");

        crate::db::queries::projects::get_project(&pool, &project.id)
            .await
            .expect("project survives");
        assert!(matches!(
            teams::get_team_details(&pool, &team.team.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
