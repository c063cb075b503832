//! Email outbox and delivery abstractions.
//!
//! Handlers never talk to a mail provider directly. They enqueue an
//! `EmailMessage` on the `EmailOutbox`, which is an unbounded in-process
//! queue drained by a background worker. The worker hands each message to an
//! `EmailSender` and retries failures with exponential backoff and jitter
//! until `max_attempts` is reached, then drops the message with an error log.
//!
//! The queue is not durable: messages still pending when the process stops
//! are lost. That is acceptable for login codes, which expire after minutes
//! and can be resent by the user.
//!
//! The default sender for local dev is `LogEmailSender`, which logs the
//! payload and returns `Ok(())`. `RelayEmailSender` posts JSON to an HTTP
//! mail relay.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::otp::CodeDelivery;
use crate::APP_USER_AGENT;

pub const LOGIN_CODE_TEMPLATE: &str = "login_code";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload: serde_json::Value,
}

/// Email delivery abstraction used by the outbox worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to have it retried.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %redacted_payload(&message.payload),
            "email outbox send stub"
        );
        Ok(())
    }
}

/// Copy of `payload` with the login code masked, safe to log.
fn redacted_payload(payload: &serde_json::Value) -> serde_json::Value {
    let mut redacted = payload.clone();
    if let Some(code) = redacted.get_mut("code") {
        *code = serde_json::Value::String("[redacted]".to_string());
    }
    redacted
}

/// Posts `{to, template, payload}` to an HTTP mail relay.
#[derive(Clone, Debug)]
pub struct RelayEmailSender {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl RelayEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, token: Option<SecretString>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build email relay client")?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl EmailSender for RelayEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let body = json!({
            "to": message.to_email,
            "template": message.template,
            "payload": message.payload,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("email relay request failed: {}", self.url))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} - {}", self.url, response.status()));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmailWorkerConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5 max attempts and 2s->60s exponential backoff
    /// with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of the outbox; cheap to clone.
#[derive(Clone, Debug)]
pub struct EmailOutbox {
    tx: mpsc::UnboundedSender<EmailMessage>,
}

impl EmailOutbox {
    /// # Errors
    /// Returns an error if the worker is gone.
    pub fn enqueue(&self, message: EmailMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow!("email outbox worker is not running"))
    }
}

impl CodeDelivery for EmailOutbox {
    fn deliver(&self, email: &str, code: &str, expires_in: Duration) -> Result<()> {
        self.enqueue(EmailMessage {
            to_email: email.to_string(),
            template: LOGIN_CODE_TEMPLATE.to_string(),
            payload: json!({
                "code": code,
                "expires_in_minutes": expires_in.as_secs().div_ceil(60),
            }),
        })
    }
}

/// Spawn the worker draining the outbox and return the producer handle.
pub fn spawn_outbox_worker(
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> (EmailOutbox, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<EmailMessage>();
    let config = config.normalize();

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            // Messages retry independently of each other.
            let span = info_span!("email.deliver", template = %message.template);
            tokio::spawn(deliver_with_retry(sender.clone(), message, config).instrument(span));
        }
    });

    (EmailOutbox { tx }, handle)
}

async fn deliver_with_retry(
    sender: Arc<dyn EmailSender>,
    message: EmailMessage,
    config: EmailWorkerConfig,
) -> bool {
    let max_attempts = config.max_attempts();
    for attempt in 1..=max_attempts {
        match sender.send(&message).await {
            Ok(()) => {
                info!(to_email = %message.to_email, attempt, "email delivered");
                return true;
            }
            Err(err) if attempt >= max_attempts => {
                error!(
                    to_email = %message.to_email,
                    "email dropped after {attempt} attempts: {err}"
                );
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
                warn!(
                    to_email = %message.to_email,
                    attempt,
                    "email delivery failed, retrying in {delay:?}: {err}"
                );
                sleep(delay).await;
            }
        }
    }
    false
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
