use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("events-timeout-seconds")
                .long("events-timeout-seconds")
                .help("Maximum lifetime of a notification stream in seconds")
                .env("HELPDESK_EVENTS_TIMEOUT_SECONDS")
                .default_value("7200")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("events-keep-alive-seconds")
                .long("events-keep-alive-seconds")
                .help("Interval of keep-alive comments on idle streams")
                .env("HELPDESK_EVENTS_KEEP_ALIVE_SECONDS")
                .default_value("15")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("events-buffer")
                .long("events-buffer")
                .help("Notifications queued per connection before it is dropped")
                .env("HELPDESK_EVENTS_BUFFER")
                .default_value("32")
                .value_parser(clap::value_parser!(usize)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub timeout_seconds: u64,
    pub keep_alive_seconds: u64,
    pub buffer: usize,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing from the matches.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            timeout_seconds: matches
                .get_one::<u64>("events-timeout-seconds")
                .copied()
                .context("missing required argument: --events-timeout-seconds")?,
            keep_alive_seconds: matches
                .get_one::<u64>("events-keep-alive-seconds")
                .copied()
                .context("missing required argument: --events-keep-alive-seconds")?,
            buffer: matches
                .get_one::<usize>("events-buffer")
                .copied()
                .context("missing required argument: --events-buffer")?,
        })
    }
}
