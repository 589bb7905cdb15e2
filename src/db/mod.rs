pub mod models;
pub mod queries;

use std::str::FromStr;

use anyhow::Context;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, ConnectOptions, Executor};

use crate::config::Config;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./src/db/migrations");

pub async fn connect_and_migrate(config: &Config) -> anyhow::Result<AnyPool> {
    sqlx::any::install_default_drivers();

    let db_url = normalized_db_url(&config.db_url);

    let connect_options = AnyConnectOptions::from_str(&db_url)
        .with_context(|| format!("invalid TEAMBOARD_DB_URL: {}", config.db_url))?
        .disable_statement_logging();

    let is_sqlite = db_url.starts_with("sqlite://");

    let pool = AnyPoolOptions::new()
        .max_connections(8)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Pragmas are per connection, so every pooled connection needs them.
                if is_sqlite {
                    conn.execute("PRAGMA foreign_keys = ON;").await?;
                    conn.execute("PRAGMA busy_timeout = 5000;").await?;
                }
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
        .context("failed to establish sqlx AnyPool")?;

    if is_sqlite {
        pool.execute("PRAGMA journal_mode = WAL;")
            .await
            .context("failed to set sqlite WAL mode")?;
    }

    MIGRATOR
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

fn normalized_db_url(db_url: &str) -> String {
    if !db_url.starts_with("sqlite://") {
        return db_url.to_string();
    }

    let mut normalized = normalize_sqlite_db_url_path(db_url);
    if !normalized.contains('?') {
        normalized.push_str("?mode=rwc");
    }

    normalized
}

fn normalize_sqlite_db_url_path(db_url: &str) -> String {
    let Some(path_and_query) = db_url.strip_prefix("sqlite://") else {
        return db_url.to_string();
    };

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let mut normalized_path = path.replace('\\', "/");
    if normalized_path.starts_with("//?/") {
        normalized_path = normalized_path.replacen("//?/", "/", 1);
    }

    let has_windows_drive_prefix = normalized_path.len() >= 2
        && normalized_path.as_bytes()[0].is_ascii_alphabetic()
        && normalized_path.as_bytes()[1] == b':';
    if has_windows_drive_prefix {
        normalized_path.insert(0, '/');
    }

    let mut normalized = format!("sqlite://{normalized_path}");
    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }

    normalized
}
