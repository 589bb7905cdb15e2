use std::sync::Arc;

use sqlx::AnyPool;

use crate::audit::AuditSink;
use crate::auth::jwt::TokenService;
use crate::auth::password::PasswordHasher;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: AnyPool,
    pub tokens: TokenService,
    pub passwords: PasswordHasher,
    pub audit: AuditSink,
}

impl AppState {
    /// Must be called inside a tokio runtime: the audit writer is spawned here.
    pub fn new(config: Config, db: AnyPool) -> Self {
        Self::with_hasher(config, db, PasswordHasher::new())
    }

    pub fn with_hasher(config: Config, db: AnyPool, passwords: PasswordHasher) -> Self {
        let tokens = TokenService::new(&config.jwt_secret, config.token_ttl_days);
        let audit = AuditSink::spawn(db.clone());
        Self {
            config: Arc::new(config),
            db,
            tokens,
            passwords,
            audit,
        }
    }
}
