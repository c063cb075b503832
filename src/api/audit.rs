//! Audit trail for security relevant actions.
//!
//! Each event goes to the `audit` tracing target and to the `audit_log`
//! table. Writes are best effort: a failed insert is logged and dropped so
//! auditing never changes the outcome of a request.

use axum::http::HeaderMap;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use super::handlers::auth::utils::{extract_client_ip, extract_user_agent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    LoginStarted,
    LoginFailed,
    LoginSucceeded,
    OtpResent,
    Logout,
    SessionsRevoked,
    NotificationSent,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginStarted => "login_started",
            Self::LoginFailed => "login_failed",
            Self::LoginSucceeded => "login_succeeded",
            Self::OtpResent => "otp_resent",
            Self::Logout => "logout",
            Self::SessionsRevoked => "sessions_revoked",
            Self::NotificationSent => "notification_sent",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Value,
}

impl AuditEvent {
    /// Start an event with client metadata taken from the request headers.
    #[must_use]
    pub fn from_request(action: AuditAction, headers: &HeaderMap) -> Self {
        Self {
            action,
            actor_id: None,
            target_id: None,
            ip_address: extract_client_ip(headers),
            user_agent: extract_user_agent(headers),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    #[must_use]
    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Record an audit event; failures are logged, never returned.
pub async fn record(pool: &PgPool, event: AuditEvent) {
    info!(
        target: "audit",
        action = event.action.as_str(),
        actor_id = ?event.actor_id,
        target_id = ?event.target_id,
        ip_address = ?event.ip_address,
        details = %event.details,
        "audit"
    );

    let query = r"
        INSERT INTO audit_log (actor_id, action, target_id, ip_address, user_agent, details)
        VALUES ($1, $2, $3, $4, $5, $6::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(event.actor_id)
        .bind(event.action.as_str())
        .bind(event.target_id)
        .bind(event.ip_address.as_deref())
        .bind(event.user_agent.as_deref())
        .bind(event.details.to_string())
        .execute(pool)
        .instrument(span)
        .await;

    if let Err(err) = result {
        error!("Failed to write audit log entry: {err}");
    }
}
