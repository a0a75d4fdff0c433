pub mod cache;
pub mod identity;
pub mod logging;

use crate::authz::Role;
use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_STATUS: &str = "status";
pub const CMD_PERMISSIONS: &str = "permissions";
pub const CMD_WATCH: &str = "watch";

pub const ARG_IDENTIFIER: &str = "identifier";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_ROLE: &str = "role";

#[must_use]
pub fn validator_role() -> ValueParser {
    ValueParser::from(move |role: &str| -> std::result::Result<Role, String> {
        role.parse::<Role>().map_err(|err| err.to_string())
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("campus-auth")
        .about("Campus portal session and role authorization")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CMD_LOGIN)
                .about("Sign in and cache the session")
                .arg(
                    Arg::new(ARG_IDENTIFIER)
                        .help("Email or legacy user id")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .long(ARG_PASSWORD)
                        .help("Password (read from stdin when omitted)")
                        .env("CAMPUS_AUTH_PASSWORD")
                        .hide_env_values(true),
                ),
        )
        .subcommand(Command::new(CMD_LOGOUT).about("Sign out and clear the cached session"))
        .subcommand(
            Command::new(CMD_STATUS).about("Restore the cached session and verify it with the backend"),
        )
        .subcommand(
            Command::new(CMD_PERMISSIONS)
                .about("Print the permission set and landing page of a role")
                .arg(
                    Arg::new(ARG_ROLE)
                        .help("administrator, instructor, learner, guardian, fleet-admin or operator")
                        .required(true)
                        .value_parser(validator_role()),
                ),
        )
        .subcommand(Command::new(CMD_WATCH).about("Follow session changes until interrupted"));

    let command = identity::with_args(command);
    let command = cache::with_args(command);
    logging::with_args(command)
}
