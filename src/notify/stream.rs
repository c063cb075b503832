//! Receiving side of a [`ChannelSink`](super::ChannelSink), bound to the registry.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tracing::debug;

use super::{ConnectionId, ConnectionRegistry, Notification};

/// Stream of notifications for one connection.
///
/// Ends when the sink is closed, or when `timeout` elapses. Dropping the
/// stream (client went away, or it ended) unregisters the connection.
pub struct NotificationStream {
    rx: mpsc::Receiver<Notification>,
    deadline: Pin<Box<Sleep>>,
    registry: ConnectionRegistry,
    user_id: String,
    connection_id: ConnectionId,
    finished: bool,
}

impl NotificationStream {
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        user_id: String,
        connection_id: ConnectionId,
        rx: mpsc::Receiver<Notification>,
        timeout: Duration,
    ) -> Self {
        Self {
            rx,
            deadline: Box::pin(sleep(timeout)),
            registry,
            user_id,
            connection_id,
            finished: false,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Stream for NotificationStream {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            debug!(
                user_id = %this.user_id,
                connection_id = %this.connection_id,
                "streaming connection reached its timeout"
            );
            this.finished = true;
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.registry.unregister(&self.user_id, self.connection_id);
    }
}
