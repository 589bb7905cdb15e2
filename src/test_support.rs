use axum_test::TestServer;
use sqlx::AnyPool;
use tempfile::TempDir;

use crate::api;
use crate::auth::password::PasswordHasher;
use crate::config::{AuditConfig, BootstrapAdmin, Config, Environment};
use crate::db;
use crate::db::models::{ProjectRecord, TaskRecord, UserRecord};
use crate::db::queries::{projects, tasks, users};
use crate::domain::{Priority, ProjectRole, ProjectStatus, Role, TaskStatus};
use crate::state::AppState;

pub const TEST_SECRET: &str = "test-secret-with-enough-length";

pub fn test_config(db_url: String) -> Config {
    Config {
        port: 5000,
        db_url,
        jwt_secret: TEST_SECRET.to_string(),
        token_ttl_days: 7,
        environment: Environment::Production,
        log_level: "info".to_string(),
        cors_origins: Vec::new(),
        max_request_body_bytes: 1024 * 1024,
        audit: AuditConfig::default(),
        bootstrap: BootstrapAdmin::default(),
    }
}

pub async fn setup_db(db_name: &str) -> (TempDir, AnyPool, Config) {
    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let db_path = temp_dir.path().join(format!("{db_name}.db"));
    let config = test_config(format!("sqlite://{}?mode=rwc", db_path.display()));

    let pool = db::connect_and_migrate(&config)
        .await
        .expect("database should initialize");

    (temp_dir, pool, config)
}

pub async fn insert_user(pool: &AnyPool, name: &str, role: Role) -> UserRecord {
    let password_hash = PasswordHasher::fast_for_tests()
        .hash("secret1")
        .expect("password should hash");

    users::create_user(
        pool,
        users::NewUserInput {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_ascii_lowercase()),
            password_hash,
            role,
        },
    )
    .await
    .expect("user should be created")
}

pub async fn insert_project(
    pool: &AnyPool,
    name: &str,
    owner_id: &str,
    member_ids: &[&str],
) -> ProjectRecord {
    projects::create_project(
        pool,
        projects::NewProjectInput {
            name: name.to_string(),
            description: String::new(),
            owner_id: owner_id.to_string(),
            status: ProjectStatus::Active,
            priority: Priority::Medium,
            start_date: None,
            end_date: None,
            team: member_ids
                .iter()
                .map(|user_id| projects::TeamEntry {
                    user_id: (*user_id).to_string(),
                    role: ProjectRole::Member,
                })
                .collect(),
        },
    )
    .await
    .expect("project should be created")
    .project
}

pub async fn insert_task(
    pool: &AnyPool,
    project_id: &str,
    title: &str,
    assigned_to: Option<&str>,
    status: TaskStatus,
    created_by: &str,
) -> TaskRecord {
    tasks::create_task(
        pool,
        tasks::NewTaskInput {
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            assigned_to: assigned_to.map(str::to_string),
            status,
            priority: Priority::Medium,
            due_date: None,
            estimated_hours: None,
            tags: Vec::new(),
            created_by: created_by.to_string(),
        },
    )
    .await
    .expect("task should be created")
    .task
}

/// An in-process server with one admin and one regular user signed in.
pub struct TestApp {
    pub _temp_dir: TempDir,
    pub server: TestServer,
    pub state: AppState,
    pub admin: UserRecord,
    pub admin_token: String,
    pub member: UserRecord,
    pub member_token: String,
}

impl TestApp {
    pub async fn user_with_token(&self, name: &str, role: Role) -> (UserRecord, String) {
        let user = insert_user(&self.state.db, name, role).await;
        let token = self.state.tokens.issue(&user.id, role).expect("token should encode");
        (user, token)
    }
}

pub async fn test_app(db_name: &str) -> TestApp {
    let (temp_dir, pool, config) = setup_db(db_name).await;
    let state = AppState::with_hasher(config, pool, PasswordHasher::fast_for_tests());

    let admin = insert_user(&state.db, "Admin", Role::Admin).await;
    let member = insert_user(&state.db, "Member", Role::User).await;
    let admin_token = state.tokens.issue(&admin.id, Role::Admin).expect("token should encode");
    let member_token = state.tokens.issue(&member.id, Role::User).expect("token should encode");

    let server = TestServer::new(api::app(state.clone())).expect("test server should start");

    TestApp {
        _temp_dir: temp_dir,
        server,
        state,
        admin,
        admin_token,
        member,
        member_token,
    }
}

/// Polls until the background audit writer has stored `expected` entries.
pub async fn wait_for_audit_entries(
    pool: &AnyPool,
    expected: i64,
) -> Vec<crate::db::models::AuditLogRecord> {
    use crate::db::queries::audit::{list_audit_logs, AuditFilters};

    for _ in 0..100 {
        let (entries, total) = list_audit_logs(pool, &AuditFilters::default(), 100, 0)
            .await
            .expect("audit entries should list");
        if total >= expected {
            return entries;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    panic!("timed out waiting for {expected} audit entries");
}
