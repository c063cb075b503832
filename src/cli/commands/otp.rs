use crate::otp::models::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("otp-ttl-seconds")
                .long("otp-ttl-seconds")
                .help("Validity of a one-time login code in seconds")
                .env("HELPDESK_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("otp-max-attempts")
                .long("otp-max-attempts")
                .help("Wrong codes accepted before a verification is locked")
                .env("HELPDESK_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("otp-code-length")
                .long("otp-code-length")
                .help("Number of digits in a login code")
                .env("HELPDESK_OTP_CODE_LENGTH")
                .default_value("6")
                .value_parser(
                    clap::value_parser!(u8).range(MIN_CODE_LENGTH as i64..=MAX_CODE_LENGTH as i64),
                ),
        )
        .arg(
            Arg::new("otp-resend-cooldown-seconds")
                .long("otp-resend-cooldown-seconds")
                .help("Minimum delay between code resends, 0 disables the cooldown")
                .env("HELPDESK_OTP_RESEND_COOLDOWN_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("otp-sweep-interval-seconds")
                .long("otp-sweep-interval-seconds")
                .help("Interval of the expired verification sweep")
                .env("HELPDESK_OTP_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub ttl_seconds: u64,
    pub max_attempts: u32,
    pub code_length: usize,
    pub resend_cooldown_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            ttl_seconds: required(matches, "otp-ttl-seconds")?,
            max_attempts: required(matches, "otp-max-attempts")?,
            code_length: usize::from(required::<u8>(matches, "otp-code-length")?),
            resend_cooldown_seconds: required(matches, "otp-resend-cooldown-seconds")?,
            sweep_interval_seconds: required(matches, "otp-sweep-interval-seconds")?,
        })
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_length_is_bounded() {
        let command = with_args(Command::new("helpdesk"));
        for (value, ok) in [("3", false), ("4", true), ("10", true), ("11", false)] {
            let result = command.clone().try_get_matches_from(vec![
                "helpdesk",
                "--otp-code-length",
                value,
            ]);
            assert_eq!(result.is_ok(), ok, "length {value}");
        }
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(
            [
                ("HELPDESK_OTP_TTL_SECONDS", None::<&str>),
                ("HELPDESK_OTP_MAX_ATTEMPTS", None),
                ("HELPDESK_OTP_CODE_LENGTH", None),
                ("HELPDESK_OTP_RESEND_COOLDOWN_SECONDS", None),
                ("HELPDESK_OTP_SWEEP_INTERVAL_SECONDS", None),
            ],
            || {
                let matches = with_args(Command::new("helpdesk")).get_matches_from(vec!["helpdesk"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.ttl_seconds, 600);
                    assert_eq!(options.max_attempts, 5);
                    assert_eq!(options.code_length, 6);
                    assert_eq!(options.resend_cooldown_seconds, 30);
                    assert_eq!(options.sweep_interval_seconds, 60);
                }
            },
        );
    }
}
