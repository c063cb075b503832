//! Per-user registry of open streaming connections.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::{ConnectionId, EventSink, Notification, NotificationKind};

type Connections = HashMap<String, HashMap<ConnectionId, Arc<dyn EventSink>>>;

/// Counts exposed by health and admin endpoints.
#[derive(ToSchema, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub users: usize,
    pub connections: usize,
}

/// Thread-safe, cloneable map of user id to open sinks.
///
/// Invariant: a user id is present iff it has at least one sink. Empty sets
/// are pruned by every operation that removes a sink. User ids are trimmed
/// by every operation, so `" alice "` and `"alice"` share one entry.
///
/// Writes never block (sinks are non-blocking by contract), so a plain mutex
/// is held for the whole broadcast; this also keeps `unregister` usable from
/// `Drop`.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<Connections>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sink for `user_id` and write the initial `connected` event.
    ///
    /// Returns `false` without touching the registry when `user_id` is empty,
    /// and `false` (sink dropped again) when the initial write fails.
    pub fn register(&self, user_id: &str, sink: Arc<dyn EventSink>) -> bool {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            debug!("rejecting streaming connection without a user id");
            return false;
        }

        let connection_id = sink.id();
        let connected = Notification::new(NotificationKind::Connected, "connected");

        let mut connections = self.lock();
        if let Err(err) = sink.send(&connected) {
            warn!(user_id, %connection_id, "initial event failed: {err}");
            sink.close();
            return false;
        }
        connections
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id, sink);

        debug!(user_id, %connection_id, "connection registered");
        true
    }

    /// Remove one sink. Returns whether it was registered.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let user_id = user_id.trim();
        let mut connections = self.lock();
        let Some(sinks) = connections.get_mut(user_id) else {
            return false;
        };
        let removed = sinks.remove(&connection_id).is_some();
        if sinks.is_empty() {
            connections.remove(user_id);
        }
        if removed {
            debug!(user_id, %connection_id, "connection unregistered");
        }
        removed
    }

    /// Push a notification to every open connection of `user_id`.
    ///
    /// Best-effort, at-most-once: sinks that fail are closed and removed, and
    /// delivery to the remaining sinks continues. Returns `true` iff at least
    /// one sink accepted the write; `false` with no effect when the user has
    /// no connections.
    pub fn notify(&self, user_id: &str, kind: NotificationKind, message: &str) -> bool {
        self.broadcast(user_id, &Notification::new(kind, message)) > 0
    }

    /// Same as [`Self::notify`] but returns the number of sinks reached.
    pub fn broadcast(&self, user_id: &str, notification: &Notification) -> usize {
        let user_id = user_id.trim();
        let mut connections = self.lock();
        let Some(sinks) = connections.get_mut(user_id) else {
            debug!(user_id, kind = notification.kind.as_str(), "no open connections");
            return 0;
        };

        let mut delivered = 0;
        sinks.retain(|connection_id, sink| match sink.send(notification) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                warn!(user_id, %connection_id, "dropping dead connection: {err}");
                sink.close();
                false
            }
        });
        if sinks.is_empty() {
            connections.remove(user_id);
        }

        debug!(
            user_id,
            kind = notification.kind.as_str(),
            delivered,
            "notification broadcast"
        );
        delivered
    }

    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.lock().get(user_id.trim()).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let connections = self.lock();
        RegistryStats {
            users: connections.len(),
            connections: connections.values().map(HashMap::len).sum(),
        }
    }

    /// Close and forget every sink; used on shutdown so open streams end.
    pub fn close_all(&self) -> usize {
        let drained: Connections = std::mem::take(&mut *self.lock());
        let mut closed = 0;
        for sink in drained.into_values().flat_map(HashMap::into_values) {
            sink.close();
            closed += 1;
        }
        closed
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}
