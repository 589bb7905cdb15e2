use clap::{Args, Parser, ValueEnum};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Clone, Debug, Parser)]
#[command(name = "teamboard")]
pub struct Config {
    #[arg(long, env = "TEAMBOARD_PORT", default_value_t = 5000)]
    pub port: u16,

    #[arg(long, env = "TEAMBOARD_DB_URL", default_value = "sqlite://./teamboard.db")]
    pub db_url: String,

    #[arg(long, env = "TEAMBOARD_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "TEAMBOARD_TOKEN_TTL_DAYS", default_value_t = 7)]
    pub token_ttl_days: i64,

    #[arg(
        long,
        env = "TEAMBOARD_ENVIRONMENT",
        value_enum,
        default_value_t = Environment::Development
    )]
    pub environment: Environment,

    #[arg(long, env = "TEAMBOARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(
        long,
        env = "TEAMBOARD_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000,http://localhost:3001,http://localhost:3002"
    )]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "TEAMBOARD_MAX_REQUEST_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_request_body_bytes: usize,

    #[command(flatten)]
    pub audit: AuditConfig,

    #[command(flatten)]
    pub bootstrap: BootstrapAdmin,
}

#[derive(Clone, Debug, Args)]
pub struct AuditConfig {
    #[arg(
        long = "audit-retention-days",
        env = "TEAMBOARD_AUDIT_RETENTION_DAYS",
        default_value_t = 90
    )]
    pub retention_days: i64,

    #[arg(
        long = "audit-sweep-interval-secs",
        env = "TEAMBOARD_AUDIT_SWEEP_INTERVAL_SECS",
        default_value_t = 3600
    )]
    pub sweep_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            sweep_interval_secs: 3600,
        }
    }
}

/// Optional account created at startup so a fresh database has an administrator.
#[derive(Clone, Debug, Default, Args)]
pub struct BootstrapAdmin {
    #[arg(long = "admin-email", env = "TEAMBOARD_ADMIN_EMAIL")]
    pub email: Option<String>,

    #[arg(long = "admin-password", env = "TEAMBOARD_ADMIN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "admin-name", env = "TEAMBOARD_ADMIN_NAME", default_value = "Administrator")]
    pub name: String,
}

impl Config {
    pub fn from_env() -> Self {
        let config = <Self as Parser>::parse();
        config.validate();
        config
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn log_startup_warnings(&self) {
        if self.is_development() {
            warn!("running in development mode, internal error details are returned to clients");
        }

        if self.bootstrap.email.is_some() != self.bootstrap.password.is_some() {
            warn!(
                "TEAMBOARD_ADMIN_EMAIL and TEAMBOARD_ADMIN_PASSWORD must both be set, skipping admin bootstrap"
            );
        }
    }

    fn validate(&self) {
        assert!(
            self.jwt_secret.trim().len() >= 16,
            "TEAMBOARD_JWT_SECRET must be at least 16 characters"
        );
        assert_positive_i64("TEAMBOARD_TOKEN_TTL_DAYS", self.token_ttl_days);
        assert_positive_i64("TEAMBOARD_AUDIT_RETENTION_DAYS", self.audit.retention_days);
        assert_non_zero_u64(
            "TEAMBOARD_AUDIT_SWEEP_INTERVAL_SECS",
            self.audit.sweep_interval_secs,
        );
        assert_non_zero_usize(
            "TEAMBOARD_MAX_REQUEST_BODY_BYTES",
            self.max_request_body_bytes,
        );
    }
}

fn assert_positive_i64(key: &'static str, value: i64) {
    assert!(value > 0, "{key} must be greater than 0");
}

fn assert_non_zero_u64(key: &'static str, value: u64) {
    assert!(value > 0, "{key} must be greater than 0");
}

fn assert_non_zero_usize(key: &'static str, value: usize) {
    assert!(value > 0, "{key} must be greater than 0");
}
