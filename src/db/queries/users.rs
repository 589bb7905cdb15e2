use std::sync::LazyLock;

use regex::Regex;
use sqlx::{Any, AnyPool};
use uuid::Uuid;

use crate::db::models::{AssignedTaskRecord, UserRecord};
use crate::db::queries::begin_write;
use crate::domain::Role;
use crate::error::{AppError, AppResult};
use crate::timestamps::now_timestamp;

static EMAIL_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

pub const MIN_PASSWORD_LEN: usize = 6;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, avatar, age, bio, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewUserInput {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Profile edits. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<Option<String>>,
    pub age: Option<Option<i64>>,
    pub bio: Option<Option<String>>,
    pub password_hash: Option<String>,
}

pub fn normalize_email(email: &str) -> AppResult<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let pattern = EMAIL_PATTERN
        .as_ref()
        .map_err(|error| AppError::Internal(format!("invalid email pattern: {error}")))?;
    if !pattern.is_match(&normalized) {
        return Err(AppError::BadRequest(
            "please provide a valid email".to_string(),
        ));
    }
    Ok(normalized)
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn create_user(pool: &AnyPool, input: NewUserInput) -> AppResult<UserRecord> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    let email = normalize_email(&input.email)?;

    if find_user_by_email(pool, &email).await?.is_some() {
        return Err(AppError::BadRequest("user already exists".to_string()));
    }

    let now = now_timestamp();
    let user_id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user_id)
    .bind(&name)
    .bind(&email)
    .bind(&input.password_hash)
    .bind(input.role.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(duplicate_email_as_bad_request)?;

    get_user(pool, &user_id).await
}

pub async fn find_user_by_id(pool: &AnyPool, user_id: &str) -> AppResult<Option<UserRecord>> {
    let user = sqlx::query_as::<Any, UserRecord>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn find_user_by_email(pool: &AnyPool, email: &str) -> AppResult<Option<UserRecord>> {
    let user = sqlx::query_as::<Any, UserRecord>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
    ))
    .bind(email.trim().to_ascii_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn get_user(pool: &AnyPool, user_id: &str) -> AppResult<UserRecord> {
    find_user_by_id(pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

pub async fn list_users(pool: &AnyPool) -> AppResult<Vec<UserRecord>> {
    let users = sqlx::query_as::<Any, UserRecord>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(users)
}

pub async fn update_profile(
    pool: &AnyPool,
    user_id: &str,
    changes: ProfileChanges,
) -> AppResult<UserRecord> {
    let user = get_user(pool, user_id).await?;

    let name = match changes.name {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => user.name,
    };

    let email = match changes.email {
        Some(value) => {
            let email = normalize_email(&value)?;
            if email != user.email && find_user_by_email(pool, &email).await?.is_some() {
                return Err(AppError::BadRequest("email is already in use".to_string()));
            }
            email
        }
        None => user.email,
    };

    if let Some(Some(age)) = changes.age {
        if age < 0 {
            return Err(AppError::BadRequest("age cannot be negative".to_string()));
        }
    }

    let avatar = changes.avatar.unwrap_or(user.avatar);
    let age = changes.age.unwrap_or(user.age);
    let bio = changes.bio.unwrap_or(user.bio);
    let password_hash = changes.password_hash.unwrap_or(user.password_hash);

    sqlx::query(
        r#"
        UPDATE users
        SET name = ?, email = ?, avatar = ?, age = ?, bio = ?, password_hash = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(avatar)
    .bind(age)
    .bind(bio)
    .bind(&password_hash)
    .bind(now_timestamp())
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(|error| match AppError::from(error) {
        AppError::Conflict(_) => AppError::BadRequest("email is already in use".to_string()),
        other => other,
    })?;

    get_user(pool, user_id).await
}

pub async fn update_role(pool: &AnyPool, user_id: &str, role: Role) -> AppResult<UserRecord> {
    let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(now_timestamp())
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user not found".to_string()));
    }

    get_user(pool, user_id).await
}

/// Removes the account, its project and team memberships, and unassigns its
/// tasks. Projects it owned keep their `owner_id`.
pub async fn delete_user(pool: &AnyPool, user_id: &str) -> AppResult<()> {
    let now = now_timestamp();
    let mut tx = begin_write(pool).await?;

    sqlx::query("DELETE FROM project_members WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM team_members WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        UPDATE tasks
        SET assigned_to = NULL, version = version + 1, updated_at = ?
        WHERE assigned_to = ?
        "#,
    )
    .bind(&now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user not found".to_string()));
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_assigned_tasks(
    pool: &AnyPool,
    user_id: &str,
) -> AppResult<Vec<AssignedTaskRecord>> {
    let tasks = sqlx::query_as::<Any, AssignedTaskRecord>(
        r#"
        SELECT id, title, status, priority, due_date
        FROM tasks
        WHERE assigned_to = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

pub async fn count_users_by_role(pool: &AnyPool, role: Option<Role>) -> AppResult<i64> {
    let count = match role {
        Some(role) => {
            sqlx::query_scalar::<Any, i64>("SELECT COUNT(*) FROM users WHERE role = ?")
                .bind(role.as_str())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar::<Any, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await?
        }
    };

    Ok(count)
}

fn duplicate_email_as_bad_request(error: sqlx::Error) -> AppError {
    match AppError::from(error) {
        AppError::Conflict(_) => AppError::BadRequest("user already exists".to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::db::queries::{projects, tasks, users};
    use crate::domain::{Role, TaskStatus};
    use crate::error::AppError;
    use crate::test_support::{insert_project, insert_task, insert_user, setup_db};

    #[test]
    fn email_is_trimmed_lowercased_and_checked() {
        assert_eq!(
            users::normalize_email("  Ada@Example.COM ").expect("valid email"),
            "ada@example.com"
        );
        assert!(users::normalize_email("not-an-email").is_err());
        assert!(users::normalize_email("a@b").is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(users::validate_password("12345").is_err());
        assert!(users::validate_password("123456").is_ok());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() {
        let (_temp_dir, pool, _config) = setup_db("users-duplicate").await;
        insert_user(&pool, "Ada", Role::User).await;

        let error = users::create_user(
            &pool,
            users::NewUserInput {
                name: "Other Ada".to_string(),
                email: "ADA@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
            },
        )
        .await
        .expect_err("duplicate email should be rejected");

        assert!(matches!(error, AppError::BadRequest(message) if message == "user already exists"));
    }

    #[tokio::test]
    async fn delete_user_unassigns_tasks_and_keeps_owned_projects() {
        let (_temp_dir, pool, _config) = setup_db("users-delete").await;
        let admin = insert_user(&pool, "Admin", Role::Admin).await;
        let owner = insert_user(&pool, "Owner", Role::User).await;

        let project = insert_project(&pool, "Apollo", &owner.id, &[&owner.id]).await;
        let task = insert_task(
            &pool,
            &project.id,
            "Launch",
            Some(&owner.id),
            TaskStatus::Todo,
            &admin.id,
        )
        .await;

        users::delete_user(&pool, &owner.id)
            .await
            .expect("user should be deleted");

        let remaining = projects::get_project_details(&pool, &project.id)
            .await
            .expect("project survives its owner");
        assert_eq!(remaining.project.owner_id, owner.id);
        assert!(remaining.owner.is_none());
        assert!(remaining.team.is_empty());

        let reloaded = tasks::get_task(&pool, &task.id)
            .await
            .expect("task survives");
        assert_eq!(reloaded.assigned_to, None);
        assert_eq!(reloaded.version, task.version + 1);

        assert!(matches!(
            users::delete_user(&pool, &owner.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
