use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-relay-url")
                .long("email-relay-url")
                .help("HTTP relay that delivers emails, codes are only logged when unset")
                .env("HELPDESK_EMAIL_RELAY_URL"),
        )
        .arg(
            Arg::new("email-relay-token")
                .long("email-relay-token")
                .help("Bearer token for the email relay")
                .env("HELPDESK_EMAIL_RELAY_TOKEN")
                .hide_env_values(true)
                .requires("email-relay-url"),
        )
        .arg(
            Arg::new("email-max-attempts")
                .long("email-max-attempts")
                .help("Delivery attempts before an email is dropped")
                .env("HELPDESK_EMAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("email-backoff-base-seconds")
                .long("email-backoff-base-seconds")
                .help("Base delay for email retry backoff")
                .env("HELPDESK_EMAIL_BACKOFF_BASE_SECONDS")
                .default_value("2")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-backoff-max-seconds")
                .long("email-backoff-max-seconds")
                .help("Max delay for email retry backoff")
                .env("HELPDESK_EMAIL_BACKOFF_MAX_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub relay_url: Option<String>,
    pub relay_token: Option<SecretString>,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            relay_url: matches.get_one::<String>("email-relay-url").cloned(),
            relay_token: matches
                .get_one::<String>("email-relay-token")
                .map(|token| SecretString::from(token.clone())),
            max_attempts: matches
                .get_one::<u32>("email-max-attempts")
                .copied()
                .context("missing required argument: --email-max-attempts")?,
            backoff_base_seconds: matches
                .get_one::<u64>("email-backoff-base-seconds")
                .copied()
                .context("missing required argument: --email-backoff-base-seconds")?,
            backoff_max_seconds: matches
                .get_one::<u64>("email-backoff-max-seconds")
                .copied()
                .context("missing required argument: --email-backoff-max-seconds")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_requires_relay_url() {
        temp_env::with_vars(
            [
                ("HELPDESK_EMAIL_RELAY_URL", None::<&str>),
                ("HELPDESK_EMAIL_RELAY_TOKEN", None::<&str>),
            ],
            || {
                let result = with_args(Command::new("helpdesk")).try_get_matches_from(vec![
                    "helpdesk",
                    "--email-relay-token",
                    "secret",
                ]);
                assert_eq!(
                    result.map(|_| ()).map_err(|e| e.kind()),
                    Err(clap::error::ErrorKind::MissingRequiredArgument)
                );
            },
        );
    }
}
