use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::admin_only;
use crate::api::ApiJson;
use crate::audit::RequestMeta;
use crate::auth::CurrentUser;
use crate::db::models::{AssignedTaskRecord, UserRecord};
use crate::db::queries::users::{self, ProfileChanges};
use crate::domain::{nullable, AuditAction, AuditEntity, Role};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/profile", get(get_profile).put(update_profile))
        .route("/users/{id}", get(get_user).delete(delete_user))
        .route("/users/{id}/role", put(update_role))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub avatar: Option<String>,
    pub age: Option<i64>,
    pub bio: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDetailsResponse {
    #[serde(flatten)]
    user: UserResponse,
    assigned_tasks: Vec<AssignedTaskRecord>,
}

#[derive(Debug, Deserialize)]
struct UpdateProfileRequest {
    name: Option<String>,
    email: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    age: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    bio: Option<Option<String>>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateRoleRequest {
    role: String,
}

pub fn map_user(record: UserRecord) -> UserResponse {
    UserResponse {
        id: record.id,
        name: record.name,
        email: record.email,
        role: record.role,
        avatar: record.avatar,
        age: record.age,
        bio: record.bio,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    admin_only(&user)?;

    let users = users::list_users(&state.db).await?;
    Ok(Json(users.into_iter().map(map_user).collect()))
}

async fn get_profile(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<UserResponse>> {
    let record = users::get_user(&state.db, &user.id).await?;
    Ok(Json(map_user(record)))
}

async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<Value>,
) -> AppResult<Json<UserResponse>> {
    let request: UpdateProfileRequest = serde_json::from_value(payload.clone())
        .map_err(|error| AppError::BadRequest(format!("invalid profile update: {error}")))?;

    let password_hash = match request.password.as_deref() {
        Some(password) => {
            users::validate_password(password)?;
            Some(state.passwords.hash(password)?)
        }
        None => None,
    };

    let record = users::update_profile(
        &state.db,
        &user.id,
        ProfileChanges {
            name: request.name,
            email: request.email,
            avatar: request.avatar,
            age: request.age,
            bio: request.bio,
            password_hash,
        },
    )
    .await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Update,
        AuditEntity::User,
        Some(&user.id),
        Some(redact_password(payload)),
    ));

    Ok(Json(map_user(record)))
}

async fn get_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserDetailsResponse>> {
    let record = users::get_user(&state.db, &id).await?;
    let assigned_tasks = users::list_assigned_tasks(&state.db, &id).await?;

    Ok(Json(UserDetailsResponse {
        user: map_user(record),
        assigned_tasks,
    }))
}

async fn update_role(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateRoleRequest>,
) -> AppResult<Json<UserResponse>> {
    admin_only(&user)?;

    let role = Role::parse(&payload.role)?;
    let record = users::update_role(&state.db, &id, role).await?;

    tracing::info!(user_id = %id, role = %role, changed_by = %user.id, "user role changed");
    state.audit.record(meta.entry(
        &user.id,
        AuditAction::ChangeRole,
        AuditEntity::User,
        Some(&id),
        Some(serde_json::json!({ "role": role.as_str() })),
    ));

    Ok(Json(map_user(record)))
}

async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    admin_only(&user)?;

    if id == user.id {
        return Err(AppError::BadRequest(
            "cannot delete your own account".to_string(),
        ));
    }

    users::delete_user(&state.db, &id).await?;

    state.audit.record(meta.entry(
        &user.id,
        AuditAction::Delete,
        AuditEntity::User,
        Some(&id),
        None,
    ));

    Ok(StatusCode::NO_CONTENT)
}

fn redact_password(mut payload: Value) -> Value {
    if let Some(password) = payload.get_mut("password") {
        *password = Value::String("[redacted]".to_string());
    }
    payload
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::domain::TaskStatus;
    use crate::test_support::{insert_project, insert_task, test_app as harness};

    #[tokio::test]
    async fn listing_users_is_admin_only() {
        let h = harness("users-list").await;

        h.server
            .get("/api/users")
            .authorization_bearer(&h.member_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let listed = h
            .server
            .get("/api/users")
            .authorization_bearer(&h.admin_token)
            .await;
        listed.assert_status_ok();
        let body: Vec<Value> = listed.json();
        assert_eq!(body.len(), 2);
        assert!(body.iter().all(|user| user.get("passwordHash").is_none()));
    }

    #[tokio::test]
    async fn role_change_takes_effect_without_new_token() {
        let h = harness("users-role").await;

        h.server
            .get("/api/users")
            .authorization_bearer(&h.member_token)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        h.server
            .put(&format!("/api/users/{}/role", h.member.id))
            .authorization_bearer(&h.admin_token)
            .json(&json!({ "role": "admin" }))
            .await
            .assert_status_ok();

        h.server
            .get("/api/users")
            .authorization_bearer(&h.member_token)
            .await
            .assert_status_ok();

        h.server
            .put(&format!("/api/users/{}/role", h.member.id))
            .authorization_bearer(&h.admin_token)
            .json(&json!({ "role": "owner" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_cannot_delete_self_but_can_delete_others() {
        let h = harness("users-delete").await;

        let own = h
            .server
            .delete(&format!("/api/users/{}", h.admin.id))
            .authorization_bearer(&h.admin_token)
            .await;
        own.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(own.json::<Value>()["message"], "cannot delete your own account");

        h.server
            .delete(&format!("/api/users/{}", h.member.id))
            .authorization_bearer(&h.admin_token)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        h.server
            .get(&format!("/api/users/{}", h.member.id))
            .authorization_bearer(&h.admin_token)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_updates_and_user_page_lists_assigned_tasks() {
        let h = harness("users-profile").await;
        let project = insert_project(&h.state.db, "Apollo", &h.admin.id, &[]).await;
        insert_task(
            &h.state.db,
            &project.id,
            "Write docs",
            Some(&h.member.id),
            TaskStatus::InProgress,
            &h.admin.id,
        )
        .await;

        let updated = h
            .server
            .put("/api/users/profile")
            .authorization_bearer(&h.member_token)
            .json(&json!({ "bio": "hello", "age": 30, "name": "  " }))
            .await;
        updated.assert_status_ok();
        let body: Value = updated.json();
        assert_eq!(body["bio"], "hello");
        assert_eq!(body["age"], 30);
        assert_eq!(body["name"], "Member");

        h.server
            .put("/api/users/profile")
            .authorization_bearer(&h.member_token)
            .json(&json!({ "email": "admin@example.com" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        h.server
            .put("/api/users/profile")
            .authorization_bearer(&h.member_token)
            .json(&json!({ "password": "123" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let page = h
            .server
            .get(&format!("/api/users/{}", h.member.id))
            .authorization_bearer(&h.admin_token)
            .await;
        page.assert_status_ok();
        let page: Value = page.json();
        assert_eq!(page["assignedTasks"][0]["title"], "Write docs");
        assert_eq!(page["assignedTasks"][0]["status"], "in-progress");
    }
}
