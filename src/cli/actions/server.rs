use crate::{
    api::{
        self,
        email::{EmailSender, EmailWorkerConfig, LogEmailSender, RelayEmailSender},
        handlers::{
            auth::{AuthConfig, WindowRateLimiter},
            events::EventsConfig,
        },
    },
    cli::telemetry,
    otp::OtpConfig,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub otp_ttl_seconds: u64,
    pub otp_max_attempts: u32,
    pub otp_code_length: usize,
    pub otp_resend_cooldown_seconds: u64,
    pub otp_sweep_interval_seconds: u64,
    pub events_timeout_seconds: u64,
    pub events_keep_alive_seconds: u64,
    pub events_buffer: usize,
    pub email_relay_url: Option<String>,
    pub email_relay_token: Option<SecretString>,
    pub email_max_attempts: u32,
    pub email_backoff_base_seconds: u64,
    pub email_backoff_max_seconds: u64,
}

impl Args {
    fn email_sender(&self) -> Result<Arc<dyn EmailSender>> {
        match &self.email_relay_url {
            Some(url) => {
                info!(relay = %url, "Delivering email through relay");
                let sender = RelayEmailSender::new(url.clone(), self.email_relay_token.clone())
                    .context("Failed to build email relay client")?;
                Ok(Arc::new(sender))
            }
            None => {
                warn!("No email relay configured, login codes will only be logged");
                Ok(Arc::new(LogEmailSender))
            }
        }
    }

    fn server_options(self) -> Result<api::ServerOptions> {
        let email_sender = self.email_sender()?;

        let auth = AuthConfig::new(self.frontend_base_url)
            .with_session_ttl_seconds(self.session_ttl_seconds);

        let otp = OtpConfig::new()
            .with_ttl_seconds(self.otp_ttl_seconds)
            .with_max_attempts(self.otp_max_attempts)
            .with_code_length(self.otp_code_length)
            .with_resend_cooldown_seconds(self.otp_resend_cooldown_seconds);

        let events = EventsConfig::new()
            .with_timeout_seconds(self.events_timeout_seconds)
            .with_keep_alive_seconds(self.events_keep_alive_seconds)
            .with_buffer(self.events_buffer);

        let email_worker = EmailWorkerConfig::new()
            .with_max_attempts(self.email_max_attempts)
            .with_backoff_base_seconds(self.email_backoff_base_seconds)
            .with_backoff_max_seconds(self.email_backoff_max_seconds);

        Ok(api::ServerOptions {
            auth,
            otp,
            otp_sweep_interval: Duration::from_secs(self.otp_sweep_interval_seconds),
            events,
            email_sender,
            email_worker,
            rate_limiter: Arc::new(WindowRateLimiter::new()),
        })
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let port = args.port;
    let dsn = args.dsn.clone();
    let options = args.server_options()?;

    let result = api::new(port, dsn, options).await;

    telemetry::shutdown_tracer();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            port: 8080,
            dsn: "postgres://localhost/helpdesk".to_string(),
            frontend_base_url: "https://helpdesk.dev".to_string(),
            session_ttl_seconds: 3600,
            otp_ttl_seconds: 300,
            otp_max_attempts: 3,
            otp_code_length: 8,
            otp_resend_cooldown_seconds: 0,
            otp_sweep_interval_seconds: 15,
            events_timeout_seconds: 60,
            events_keep_alive_seconds: 5,
            events_buffer: 4,
            email_relay_url: None,
            email_relay_token: None,
            email_max_attempts: 2,
            email_backoff_base_seconds: 1,
            email_backoff_max_seconds: 4,
        }
    }

    #[test]
    fn options_carry_cli_values() -> Result<()> {
        let options = args().server_options()?;

        assert_eq!(options.auth.session_ttl_seconds(), 3600);
        assert_eq!(options.otp_sweep_interval, Duration::from_secs(15));
        assert_eq!(
            options.otp,
            OtpConfig::new()
                .with_ttl_seconds(300)
                .with_max_attempts(3)
                .with_code_length(8)
                .with_resend_cooldown_seconds(0)
        );
        Ok(())
    }

    #[test]
    fn relay_url_selects_relay_sender() {
        let mut args = args();
        assert!(args.email_sender().is_ok());

        args.email_relay_url = Some("https://relay.helpdesk.dev/send".to_string());
        args.email_relay_token = Some(SecretString::from("token".to_string()));
        assert!(args.email_sender().is_ok());
    }
}
