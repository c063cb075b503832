//! Transport-agnostic sink for pushed notifications.

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::Notification;

/// Identity of a single open connection.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The receiving side is gone (client disconnected or sink closed).
    #[error("connection closed")]
    Closed,
    /// The connection buffer is full; the client is not reading.
    #[error("connection buffer full")]
    Full,
}

/// A long-lived handle the registry can write notifications to.
///
/// Implementations must not block: `send` is called while the registry is
/// broadcasting to every connection of a user.
pub trait EventSink: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Write one notification.
    ///
    /// # Errors
    /// Any error marks the sink as dead and gets it removed from the registry.
    fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;

    /// Stop accepting writes. The reading side observes end of stream.
    fn close(&self);
}

/// Sink backed by a bounded tokio channel; the receiver feeds the SSE response.
#[derive(Debug)]
pub struct ChannelSink {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::Sender<Notification>>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl EventSink for ChannelSink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(notification.clone()).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        // Dropping the sender ends the receiving stream once it is drained.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;

    #[tokio::test]
    async fn channel_sink_delivers_to_receiver() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let notification = Notification::new(NotificationKind::Message, "hello");
        assert_eq!(sink.send(&notification), Ok(()));
        assert_eq!(rx.recv().await, Some(notification));
    }

    #[test]
    fn channel_sink_reports_full_buffer() {
        let (sink, _rx) = ChannelSink::channel(1);
        let notification = Notification::new(NotificationKind::Message, "one");
        assert_eq!(sink.send(&notification), Ok(()));
        assert_eq!(sink.send(&notification), Err(DeliveryError::Full));
    }

    #[test]
    fn channel_sink_reports_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel(4);
        drop(rx);
        let notification = Notification::new(NotificationKind::Message, "gone");
        assert_eq!(sink.send(&notification), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.close();
        assert_eq!(rx.recv().await, None);
        let notification = Notification::new(NotificationKind::Message, "late");
        assert_eq!(sink.send(&notification), Err(DeliveryError::Closed));
    }

    #[test]
    fn sinks_get_distinct_ids() {
        let (first, _a) = ChannelSink::channel(1);
        let (second, _b) = ChannelSink::channel(1);
        assert_ne!(first.id(), second.id());
    }
}
