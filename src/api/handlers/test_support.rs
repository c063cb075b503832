//! Shared fixtures for handler tests.

use anyhow::Result;
use axum::{body::Body, response::Response};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::auth::{AuthConfig, AuthState, NoopRateLimiter};
use crate::otp::{CodeDelivery, OtpConfig, OtpService};

/// Pool pointing at a closed port; queries fail after a short timeout.
pub(crate) fn lazy_pool() -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://helpdesk@127.0.0.1:1/helpdesk")?)
}

#[derive(Default)]
pub(crate) struct RecordingDelivery {
    codes: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    pub(crate) fn last_code(&self) -> Option<String> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, code)| code.clone())
    }
}

impl CodeDelivery for RecordingDelivery {
    fn deliver(&self, email: &str, code: &str, _expires_in: Duration) -> Result<()> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

pub(crate) fn auth_state(config: OtpConfig) -> (Arc<AuthState>, Arc<RecordingDelivery>) {
    let delivery = Arc::new(RecordingDelivery::default());
    let otp = Arc::new(OtpService::new(config, delivery.clone()));
    let state = AuthState::new(
        AuthConfig::new("https://helpdesk.dev".to_string()),
        otp,
        Arc::new(NoopRateLimiter),
    );
    (Arc::new(state), delivery)
}

pub(crate) async fn json_body(response: Response<Body>) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
