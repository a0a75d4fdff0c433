use crate::config::DEFAULT_ADMIN_PATTERN;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use regex::Regex;
use secrecy::SecretString;

pub const ARG_IDENTITY_URL: &str = "identity-url";
pub const ARG_IDENTITY_API_KEY: &str = "identity-api-key";
pub const ARG_FALLBACK_URL: &str = "fallback-url";
pub const ARG_PROFILE_URL: &str = "profile-url";
pub const ARG_REQUEST_TIMEOUT: &str = "request-timeout";
pub const ARG_ALLOW_EMPTY_ADMIN_SECRET: &str = "allow-empty-admin-secret";
pub const ARG_ADMIN_PATTERN: &str = "admin-pattern";

#[must_use]
pub fn validator_regex() -> ValueParser {
    ValueParser::from(move |pattern: &str| -> std::result::Result<Regex, String> {
        Regex::new(pattern).map_err(|err| format!("invalid regex: {err}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_URL)
                .long(ARG_IDENTITY_URL)
                .help("Identity backend base URL, example: https://id.campus.edu")
                .env("CAMPUS_AUTH_IDENTITY_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_API_KEY)
                .long(ARG_IDENTITY_API_KEY)
                .help("Public API key sent to the identity backend")
                .env("CAMPUS_AUTH_IDENTITY_API_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_FALLBACK_URL)
                .long(ARG_FALLBACK_URL)
                .help("Legacy REST login base URL, consulted when the identity backend rejects credentials")
                .env("CAMPUS_AUTH_FALLBACK_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_PROFILE_URL)
                .long(ARG_PROFILE_URL)
                .help("Profile store base URL (defaults to the identity URL)")
                .env("CAMPUS_AUTH_PROFILE_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT)
                .long(ARG_REQUEST_TIMEOUT)
                .help("HTTP request timeout in seconds")
                .env("CAMPUS_AUTH_REQUEST_TIMEOUT")
                .default_value("10")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ALLOW_EMPTY_ADMIN_SECRET)
                .long(ARG_ALLOW_EMPTY_ADMIN_SECRET)
                .help("Let identifiers matching --admin-pattern sign in through the fallback with an empty password")
                .env("CAMPUS_AUTH_ALLOW_EMPTY_ADMIN_SECRET")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ADMIN_PATTERN)
                .long(ARG_ADMIN_PATTERN)
                .help("Regex for administrator identifiers")
                .env("CAMPUS_AUTH_ADMIN_PATTERN")
                .default_value(DEFAULT_ADMIN_PATTERN)
                .global(true)
                .value_parser(validator_regex()),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub api_key: SecretString,
    pub fallback_url: Option<String>,
    pub profile_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub allow_empty_admin_secret: bool,
    pub admin_pattern: Regex,
}

impl Options {
    /// # Errors
    /// Returns an error if the identity URL or API key is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_IDENTITY_URL)
            .cloned()
            .context("missing required argument: --identity-url")?;
        let api_key = matches
            .get_one::<String>(ARG_IDENTITY_API_KEY)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --identity-api-key")?;
        let admin_pattern = matches
            .get_one::<Regex>(ARG_ADMIN_PATTERN)
            .cloned()
            .context("missing argument: --admin-pattern")?;

        Ok(Self {
            url,
            api_key,
            fallback_url: matches.get_one::<String>(ARG_FALLBACK_URL).cloned(),
            profile_url: matches.get_one::<String>(ARG_PROFILE_URL).cloned(),
            request_timeout_seconds: matches
                .get_one::<u64>(ARG_REQUEST_TIMEOUT)
                .copied()
                .unwrap_or(10),
            allow_empty_admin_secret: matches.get_flag(ARG_ALLOW_EMPTY_ADMIN_SECRET),
            admin_pattern,
        })
    }
}
