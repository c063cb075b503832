//! `GET /v1/events`: server-sent notification stream for the signed-in user.

use axum::{
    extract::Extension,
    http::{header::CONNECTION, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::auth::principal::require_auth;
use crate::notify::{ChannelSink, ConnectionRegistry, EventSink, NotificationStream};

const DEFAULT_TIMEOUT_SECONDS: u64 = 2 * 60 * 60;
const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 15;
const DEFAULT_BUFFER: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventsConfig {
    timeout: Duration,
    keep_alive: Duration,
    buffer: usize,
}

impl EventsConfig {
    /// Two hour connection timeout, keep-alive every 15s, 32 queued events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECONDS),
            buffer: DEFAULT_BUFFER,
        }
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_keep_alive_seconds(mut self, seconds: u64) -> Self {
        self.keep_alive = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            timeout: self.timeout.max(Duration::from_secs(1)),
            keep_alive: self.keep_alive.max(Duration::from_secs(1)),
            // One slot for the connected event plus at least one more.
            buffer: self.buffer.max(2),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    #[must_use]
    pub fn buffer(&self) -> usize {
        self.buffer
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[utoipa::path(
    get,
    path = "/v1/events",
    responses(
        (status = 200, description = "Notification stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "No active session")
    ),
    tag = "events"
)]
pub async fn events(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    registry: Extension<ConnectionRegistry>,
    config: Extension<EventsConfig>,
) -> Response {
    // The user id must be known before any stream header goes out.
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    open_stream(&registry, &principal.user_id.to_string(), *config)
}

/// Register a new sink for `user_id` and turn it into an SSE response.
pub(crate) fn open_stream(
    registry: &ConnectionRegistry,
    user_id: &str,
    config: EventsConfig,
) -> Response {
    let config = config.normalize();
    let (sink, rx) = ChannelSink::channel(config.buffer());
    let sink = Arc::new(sink);
    let connection_id = sink.id();

    if !registry.register(user_id, sink) {
        error!(%user_id, "Failed to register streaming connection");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    debug!(%user_id, %connection_id, "streaming connection opened");

    let stream = NotificationStream::new(
        registry.clone(),
        user_id.to_string(),
        connection_id,
        rx,
        config.timeout(),
    )
    .map(|notification| Event::default().json_data(&notification));

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(config.keep_alive()))
        .into_response();

    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::lazy_pool;
    use crate::notify::NotificationKind;
    use anyhow::{Context, Result};
    use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
    use http_body_util::BodyExt;

    async fn next_frame(body: &mut axum::body::Body) -> Result<String> {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await?
            .context("stream ended")??;
        let data = frame.into_data().ok().context("not a data frame")?;
        Ok(String::from_utf8(data.to_vec())?)
    }

    #[test]
    fn config_defaults_and_normalize() {
        let config = EventsConfig::new();
        assert_eq!(config.timeout(), Duration::from_secs(7200));
        assert_eq!(config.keep_alive(), Duration::from_secs(15));
        assert_eq!(config.buffer(), 32);

        let config = config
            .with_timeout_seconds(0)
            .with_keep_alive_seconds(0)
            .with_buffer(0)
            .normalize();
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.keep_alive(), Duration::from_secs(1));
        assert_eq!(config.buffer(), 2);
    }

    #[tokio::test]
    async fn anonymous_callers_are_unauthorized() -> Result<()> {
        let registry = ConnectionRegistry::new();
        let response = events(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(registry.clone()),
            Extension(EventsConfig::new()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(registry.stats().connections, 0);
        Ok(())
    }

    #[tokio::test]
    async fn stream_sets_headers_and_frames_events() -> Result<()> {
        let registry = ConnectionRegistry::new();
        let response = open_stream(&registry, "user-1", EventsConfig::new());

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert_eq!(
            headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );
        assert_eq!(
            headers.get(CONNECTION).and_then(|v| v.to_str().ok()),
            Some("keep-alive")
        );
        assert_eq!(
            headers.get("x-accel-buffering").and_then(|v| v.to_str().ok()),
            Some("no")
        );
        assert_eq!(registry.connection_count("user-1"), 1);

        let mut body = response.into_body();
        let connected = next_frame(&mut body).await?;
        assert!(connected.starts_with("data: {"), "{connected}");
        assert!(connected.ends_with("\n\n"), "{connected}");
        assert!(connected.contains(r#""kind":"connected""#), "{connected}");

        assert!(registry.notify("user-1", NotificationKind::ForceLogout, "revoked"));
        let pushed = next_frame(&mut body).await?;
        assert!(pushed.contains(r#""kind":"force_logout""#), "{pushed}");
        assert!(pushed.contains(r#""message":"revoked""#), "{pushed}");

        // Client disconnect drops the body and unregisters the connection.
        drop(body);
        assert_eq!(registry.connection_count("user-1"), 0);
        Ok(())
    }
}
