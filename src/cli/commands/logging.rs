use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ENV_LOG_LEVEL: &str = "HELPDESK_LOG_LEVEL";

/// Parse a log level by name (`error` .. `trace`) or as a number 0-4.
///
/// # Errors
/// Returns an error for anything else.
pub fn parse_log_level(level: &str) -> std::result::Result<u8, String> {
    if let Ok(parsed) = level.trim().parse::<u8>() {
        if parsed <= 4 {
            return Ok(parsed);
        }
    }

    match level.trim().to_lowercase().as_str() {
        "error" => Ok(0),
        "warn" => Ok(1),
        "info" => Ok(2),
        "debug" => Ok(3),
        "trace" => Ok(4),
        _ => Err(format!("invalid log level: {level}")),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help(
                "Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR). \
                 Falls back to HELPDESK_LOG_LEVEL when not given",
            )
            .global(true)
            .action(clap::ArgAction::Count),
    )
}

/// Resolve the verbosity: the `-v` count when given, otherwise
/// `HELPDESK_LOG_LEVEL`, otherwise 0.
///
/// # Errors
/// Returns an error if `HELPDESK_LOG_LEVEL` holds an unknown level.
pub fn verbosity(matches: &ArgMatches) -> Result<u8> {
    let count = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    if count > 0 {
        return Ok(count);
    }

    match std::env::var(ENV_LOG_LEVEL) {
        Ok(level) => parse_log_level(&level).map_err(|err| anyhow!("{ENV_LOG_LEVEL}: {err}")),
        Err(_) => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_named_levels() {
        let command = with_args(Command::new("helpdesk"));
        for (level, expected) in [("warn", 1), ("DEBUG", 3), ("4", 4), ("0", 0), ("trace", 4)] {
            temp_env::with_var(ENV_LOG_LEVEL, Some(level), || {
                let matches = command.clone().get_matches_from(vec!["helpdesk"]);
                assert_eq!(verbosity(&matches).ok(), Some(expected), "level {level}");
            });
        }
    }

    #[test]
    fn verbose_flag_wins_over_env() {
        temp_env::with_var(ENV_LOG_LEVEL, Some("trace"), || {
            let matches = with_args(Command::new("helpdesk")).get_matches_from(vec!["helpdesk", "-v"]);
            assert_eq!(verbosity(&matches).ok(), Some(1));
        });
    }

    #[test]
    fn defaults_to_error_without_flag_or_env() {
        temp_env::with_var(ENV_LOG_LEVEL, None::<&str>, || {
            let matches = with_args(Command::new("helpdesk")).get_matches_from(vec!["helpdesk"]);
            assert_eq!(verbosity(&matches).ok(), Some(0));
        });
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_log_level("loud").is_err());
        assert!(parse_log_level("5").is_err());
        temp_env::with_var(ENV_LOG_LEVEL, Some("loud"), || {
            let matches = with_args(Command::new("helpdesk")).get_matches_from(vec!["helpdesk"]);
            assert!(verbosity(&matches).is_err());
        });
    }
}
