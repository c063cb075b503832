//! Role gated administration of user sessions and notifications.
//!
//! Every route answers 404 to callers without the required role, the same as
//! for an unknown user id.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{
    principal::{require_role, Principal},
    storage::{delete_user_sessions, lookup_user, UserRecord},
    Role,
};
use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::notify::{ConnectionRegistry, NotificationKind, RegistryStats};

const MAX_MESSAGE_CHARS: usize = 1000;
const FORCE_LOGOUT_MESSAGE: &str = "Your sessions were revoked by an administrator";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeSessionsResponse {
    /// Sessions deleted from the database.
    pub revoked: u64,
    /// Whether at least one live connection received the logout event.
    pub notified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NotifyUserRequest {
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NotifyUserResponse {
    pub delivered: bool,
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/{user_id}/revoke-sessions",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeSessionsResponse),
        (status = 404, description = "Not found")
    ),
    tag = "admin"
)]
pub async fn revoke_sessions(
    Path(user_id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    registry: Extension<ConnectionRegistry>,
) -> Response {
    let actor = match require_role(&headers, &pool, &[Role::Admin]).await {
        Ok(actor) => actor,
        Err(status) => return status.into_response(),
    };
    let target = match resolve_target(&pool, &user_id).await {
        Ok(target) => target,
        Err(status) => return status.into_response(),
    };

    let revoked = match delete_user_sessions(&pool, target.user_id).await {
        Ok(revoked) => revoked,
        Err(err) => {
            error!("Failed to revoke sessions: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The database is the source of truth; the event only tells open tabs.
    let notified = registry.notify(
        &target.user_id.to_string(),
        NotificationKind::ForceLogout,
        FORCE_LOGOUT_MESSAGE,
    );
    info!(target_id = %target.user_id, revoked, notified, "sessions revoked");

    let event = AuditEvent::from_request(AuditAction::SessionsRevoked, &headers)
        .actor(actor.user_id)
        .target(target.user_id)
        .details(json!({"revoked": revoked, "notified": notified}));
    audit::record(&pool, event).await;

    (StatusCode::OK, Json(RevokeSessionsResponse { revoked, notified })).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/{user_id}/notify",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    request_body = NotifyUserRequest,
    responses(
        (status = 200, description = "Notification pushed to live sessions", body = NotifyUserResponse),
        (status = 400, description = "Invalid kind or message", body = String),
        (status = 404, description = "Not found")
    ),
    tag = "admin"
)]
pub async fn notify_user(
    Path(user_id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    registry: Extension<ConnectionRegistry>,
    payload: Option<Json<NotifyUserRequest>>,
) -> Response {
    let actor = match require_role(&headers, &pool, &[Role::Admin, Role::Manager]).await {
        Ok(actor) => actor,
        Err(status) => return status.into_response(),
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    if let Err(message) = validate_notification(&request) {
        return (StatusCode::BAD_REQUEST, message.to_string()).into_response();
    }
    let target = match resolve_target(&pool, &user_id).await {
        Ok(target) => target,
        Err(status) => return status.into_response(),
    };

    let delivered = push_notification(&registry, &actor, &target, &request);

    let event = AuditEvent::from_request(AuditAction::NotificationSent, &headers)
        .actor(actor.user_id)
        .target(target.user_id)
        .details(json!({"kind": request.kind.as_str(), "delivered": delivered}));
    audit::record(&pool, event).await;

    (StatusCode::OK, Json(NotifyUserResponse { delivered })).into_response()
}

#[utoipa::path(
    get,
    path = "/v1/admin/connections",
    responses(
        (status = 200, description = "Live connection counts", body = RegistryStats),
        (status = 404, description = "Not found")
    ),
    tag = "admin"
)]
pub async fn connections(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    registry: Extension<ConnectionRegistry>,
) -> Response {
    if let Err(status) = require_role(&headers, &pool, &[Role::Admin, Role::Manager]).await {
        return status.into_response();
    }
    (StatusCode::OK, Json(registry.stats())).into_response()
}

/// Parse and load the target user; malformed and unknown ids are both 404.
async fn resolve_target(pool: &PgPool, user_id: &str) -> Result<UserRecord, StatusCode> {
    let Ok(user_id) = Uuid::parse_str(user_id.trim()) else {
        return Err(StatusCode::NOT_FOUND);
    };
    match lookup_user(pool, user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!("Failed to lookup target user: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn validate_notification(request: &NotifyUserRequest) -> Result<(), &'static str> {
    match request.kind {
        NotificationKind::AccountUpdated
        | NotificationKind::AccountDisabled
        | NotificationKind::Message => {}
        NotificationKind::Connected | NotificationKind::ForceLogout => {
            return Err("Unsupported notification kind");
        }
    }
    let message = request.message.trim();
    if message.is_empty() {
        return Err("Missing message");
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err("Message too long");
    }
    Ok(())
}

fn push_notification(
    registry: &ConnectionRegistry,
    actor: &Principal,
    target: &UserRecord,
    request: &NotifyUserRequest,
) -> bool {
    let delivered = registry.notify(
        &target.user_id.to_string(),
        request.kind,
        request.message.trim(),
    );
    info!(
        actor_id = %actor.user_id,
        target_id = %target.user_id,
        kind = request.kind.as_str(),
        delivered,
        "notification pushed"
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::lazy_pool;
    use crate::notify::ChannelSink;
    use std::sync::Arc;

    fn request(kind: NotificationKind, message: &str) -> NotifyUserRequest {
        NotifyUserRequest {
            kind,
            message: message.to_string(),
        }
    }

    #[test]
    fn validate_notification_accepts_admin_kinds_only() {
        assert!(validate_notification(&request(NotificationKind::Message, "hi")).is_ok());
        assert!(validate_notification(&request(NotificationKind::AccountUpdated, "x")).is_ok());
        assert!(validate_notification(&request(NotificationKind::AccountDisabled, "x")).is_ok());
        assert!(validate_notification(&request(NotificationKind::Connected, "x")).is_err());
        assert!(validate_notification(&request(NotificationKind::ForceLogout, "x")).is_err());
        assert!(validate_notification(&request(NotificationKind::Message, "  ")).is_err());
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(validate_notification(&request(NotificationKind::Message, &long)).is_err());
    }

    #[test]
    fn notify_request_parses_snake_case_kind() -> anyhow::Result<()> {
        let parsed: NotifyUserRequest =
            serde_json::from_str(r#"{"kind":"account_updated","message":"Role changed"}"#)?;
        assert_eq!(parsed.kind, NotificationKind::AccountUpdated);
        Ok(())
    }

    #[test]
    fn push_notification_reaches_every_live_sink() {
        let registry = ConnectionRegistry::new();
        let target = UserRecord {
            user_id: Uuid::new_v4(),
            email: "u@example.com".to_string(),
            role: Role::User,
            active: true,
        };
        let actor = Principal {
            user_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            role: Role::Admin,
        };
        let msg = request(NotificationKind::Message, " hello ");

        assert!(!push_notification(&registry, &actor, &target, &msg));

        let (first, mut first_rx) = ChannelSink::channel(4);
        let (second, mut second_rx) = ChannelSink::channel(4);
        let key = target.user_id.to_string();
        assert!(registry.register(&key, Arc::new(first)));
        assert!(registry.register(&key, Arc::new(second)));

        assert!(push_notification(&registry, &actor, &target, &msg));
        for rx in [&mut first_rx, &mut second_rx] {
            assert_eq!(
                rx.try_recv().ok().map(|n| n.kind),
                Some(NotificationKind::Connected)
            );
            let pushed = rx.try_recv().ok();
            assert_eq!(pushed.as_ref().map(|n| n.message.as_str()), Some("hello"));
        }
    }

    #[tokio::test]
    async fn anonymous_callers_get_not_found() -> anyhow::Result<()> {
        let registry = ConnectionRegistry::new();
        let pool = lazy_pool()?;

        let response = connections(
            HeaderMap::new(),
            Extension(pool.clone()),
            Extension(registry.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = revoke_sessions(
            Path(Uuid::new_v4().to_string()),
            HeaderMap::new(),
            Extension(pool),
            Extension(registry),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
