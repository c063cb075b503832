//! # Live notifications
//!
//! Every authenticated browser session may hold a streaming connection
//! (`GET /v1/events`). The [`ConnectionRegistry`] maps a user id to the set of
//! open [`EventSink`]s so any server-side caller can push a [`Notification`]
//! to all live sessions of that user, for example a forced logout after an
//! administrator revoked the user's sessions.
//!
//! ## Delivery policy
//!
//! Delivery is **at-most-once and best-effort**:
//!
//! - `notify` never waits for the client and never retries.
//! - A sink whose write fails is considered dead; it is closed and removed
//!   from the registry as part of the same broadcast.
//! - Failures are logged and never surface to the caller. The boolean returned
//!   by `notify` only says whether at least one sink accepted the write.
//!
//! Callers must not treat a notification as a guaranteed message; anything
//! that has to survive (revoked sessions, disabled accounts) is enforced in
//! the database and the notification is only a hint for the UI.

mod registry;
mod sink;
mod stream;

pub use registry::{ConnectionRegistry, RegistryStats};
pub use sink::{ChannelSink, ConnectionId, DeliveryError, EventSink};
pub use stream::NotificationStream;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use utoipa::ToSchema;

/// Kind of a pushed notification, serialized in `snake_case`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// First event written to every new connection.
    Connected,
    /// The user's sessions were revoked; the client should drop its state.
    ForceLogout,
    /// Profile, role or permissions changed; the client should refetch.
    AccountUpdated,
    /// The account was disabled.
    AccountDisabled,
    /// Free-form informational message.
    Message,
}

impl NotificationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ForceLogout => "force_logout",
            Self::AccountUpdated => "account_updated",
            Self::AccountDisabled => "account_disabled",
            Self::Message => "message",
        }
    }
}

/// Ephemeral payload written to open connections. Never persisted.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    /// Unix epoch milliseconds at construction time.
    pub timestamp: i64,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn notification_serializes_kind_in_snake_case() -> Result<()> {
        let notification = Notification::new(NotificationKind::ForceLogout, "bye");
        let value = serde_json::to_value(&notification)?;
        assert_eq!(value["kind"], "force_logout");
        assert_eq!(value["message"], "bye");
        assert!(value["timestamp"].as_i64().is_some_and(|ts| ts > 0));
        Ok(())
    }

    #[test]
    fn kind_as_str_matches_serde() -> Result<()> {
        for kind in [
            NotificationKind::Connected,
            NotificationKind::ForceLogout,
            NotificationKind::AccountUpdated,
            NotificationKind::AccountDisabled,
            NotificationKind::Message,
        ] {
            assert_eq!(serde_json::to_value(kind)?, kind.as_str());
        }
        Ok(())
    }
}
