use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, FromRequestParts, OriginalUri};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use serde_json::{json, Value};
use sqlx::AnyPool;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::AuditConfig;
use crate::db::queries::audit::{self, NewAuditLog};
use crate::domain::{AuditAction, AuditEntity};
use crate::error::AppResult;
use crate::timestamps::{days_ago, now_timestamp};

/// Fire-and-forget handle to the background audit writer. Recording never
/// blocks a request and never fails it.
#[derive(Clone)]
pub struct AuditSink {
    sender: mpsc::UnboundedSender<NewAuditLog>,
}

impl AuditSink {
    pub fn spawn(db: AnyPool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(db, receiver));
        Self { sender }
    }

    pub fn record(&self, entry: NewAuditLog) {
        if let Err(error) = self.sender.send(entry) {
            tracing::warn!(
                action = %error.0.action,
                entity = %error.0.entity,
                "audit writer is gone, dropping entry"
            );
        }
    }
}

async fn run_writer(db: AnyPool, mut receiver: mpsc::UnboundedReceiver<NewAuditLog>) {
    while let Some(entry) = receiver.recv().await {
        let action = entry.action;
        let user_id = entry.user_id.clone();
        if let Err(error) = audit::insert_audit_log(&db, entry).await {
            tracing::warn!(error = ?error, %action, %user_id, "failed to write audit entry");
        }
    }
}

pub fn spawn_retention_sweeper(db: AnyPool, config: AuditConfig) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match sweep_expired(&db, config.retention_days).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "removed expired audit entries"),
                Err(error) => tracing::error!(error = ?error, "audit retention sweep failed"),
            }
        }
    });
}

pub async fn sweep_expired(db: &AnyPool, retention_days: i64) -> AppResult<u64> {
    let Some(cutoff) = days_ago(retention_days) else {
        tracing::warn!(retention_days, "audit retention is out of range, skipping sweep");
        return Ok(0);
    };
    audit::purge_audit_logs_before(db, &cutoff).await
}

/// Who is calling and from where, captured for audit entries.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
}

impl RequestMeta {
    pub fn entry(
        &self,
        user_id: &str,
        action: AuditAction,
        entity: AuditEntity,
        entity_id: Option<&str>,
        changes: Option<Value>,
    ) -> NewAuditLog {
        NewAuditLog {
            user_id: user_id.to_string(),
            action,
            entity,
            entity_id: entity_id.map(str::to_string),
            changes,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            metadata: Some(json!({ "method": self.method, "path": self.path })),
            created_at: now_timestamp(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = first_forwarded_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let path = parts
            .extensions
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.path().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Ok(Self {
            ip_address,
            user_agent,
            method: parts.method.to_string(),
            path,
        })
    }
}

fn first_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    extract_first_ip(headers, "x-forwarded-for").or_else(|| extract_first_ip(headers, "x-real-ip"))
}

fn extract_first_ip(headers: &HeaderMap, header_name: &'static str) -> Option<String> {
    let value = headers.get(header_name)?.to_str().ok()?;
    let first = value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())?;
    Some(first.to_string())
}
