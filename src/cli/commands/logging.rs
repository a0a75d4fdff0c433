use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names ordered by `-v` count.
pub const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts a level name or its `-v` count, so `CAMPUS_AUTH_LOG_LEVEL=debug`
/// and `-vvv` mean the same thing.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|raw: &str| -> std::result::Result<u8, String> {
        let raw = raw.trim();
        let index = match raw.parse::<usize>() {
            Ok(count) => Some(count).filter(|count| *count < LEVELS.len()),
            Err(_) => LEVELS
                .iter()
                .position(|name| name.eq_ignore_ascii_case(raw)),
        };
        index
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level {raw:?}, expected one of {}", LEVELS.join(", ")))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log verbosity on stderr; repeat for more (error, warn, info, debug, trace)")
            .env("CAMPUS_AUTH_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
