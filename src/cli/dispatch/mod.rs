//! Maps validated CLI arguments to an action.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, email, events, otp};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let otp_opts = otp::Options::parse(matches)?;
    let events_opts = events::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_ttl_seconds: otp_opts.ttl_seconds,
        otp_max_attempts: otp_opts.max_attempts,
        otp_code_length: otp_opts.code_length,
        otp_resend_cooldown_seconds: otp_opts.resend_cooldown_seconds,
        otp_sweep_interval_seconds: otp_opts.sweep_interval_seconds,
        events_timeout_seconds: events_opts.timeout_seconds,
        events_keep_alive_seconds: events_opts.keep_alive_seconds,
        events_buffer: events_opts.buffer,
        email_relay_url: email_opts.relay_url,
        email_relay_token: email_opts.relay_token,
        email_max_attempts: email_opts.max_attempts,
        email_backoff_base_seconds: email_opts.backoff_base_seconds,
        email_backoff_max_seconds: email_opts.backoff_max_seconds,
    }))
}
