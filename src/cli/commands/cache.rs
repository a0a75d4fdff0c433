use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_CACHE_DIR: &str = "cache-dir";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_CACHE_DIR)
            .long(ARG_CACHE_DIR)
            .help("Directory holding the session cache")
            .env("CAMPUS_AUTH_CACHE_DIR")
            .default_value(".campus-auth")
            .global(true)
            .value_parser(clap::value_parser!(PathBuf)),
    )
}

#[must_use]
pub fn cache_dir(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>(ARG_CACHE_DIR)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(".campus-auth"))
}
