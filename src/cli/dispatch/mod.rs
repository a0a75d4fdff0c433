//! Map parsed arguments to an [`Action`].

use crate::{
    authz::Role,
    cli::{
        actions::{Action, connect, login, permissions},
        commands::{
            ARG_IDENTIFIER, ARG_PASSWORD, ARG_ROLE, CMD_LOGIN, CMD_LOGOUT, CMD_PERMISSIONS,
            CMD_STATUS, CMD_WATCH, cache, identity,
        },
    },
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;

fn connect_args(matches: &ArgMatches) -> Result<connect::Args> {
    let identity = identity::Options::parse(matches)?;
    Ok(connect::Args {
        identity_url: identity.url,
        identity_api_key: identity.api_key,
        fallback_url: identity.fallback_url,
        profile_url: identity.profile_url,
        cache_dir: cache::cache_dir(matches),
        request_timeout_seconds: identity.request_timeout_seconds,
        allow_empty_admin_secret: identity.allow_empty_admin_secret,
        admin_pattern: identity.admin_pattern,
    })
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_LOGIN, sub)) => Ok(Action::Login(login::Args {
            connect: connect_args(sub)?,
            identifier: sub
                .get_one::<String>(ARG_IDENTIFIER)
                .cloned()
                .context("missing required argument: <identifier>")?,
            password: sub
                .get_one::<String>(ARG_PASSWORD)
                .cloned()
                .map(SecretString::from),
        })),
        Some((CMD_LOGOUT, sub)) => Ok(Action::Logout(connect_args(sub)?)),
        Some((CMD_STATUS, sub)) => Ok(Action::Status(connect_args(sub)?)),
        Some((CMD_WATCH, sub)) => Ok(Action::Watch(connect_args(sub)?)),
        Some((CMD_PERMISSIONS, sub)) => Ok(Action::Permissions(permissions::Args {
            role: sub
                .get_one::<Role>(ARG_ROLE)
                .copied()
                .context("missing required argument: <role>")?,
        })),
        Some((other, _)) => Err(anyhow!("unknown subcommand: {other}")),
        None => Err(anyhow!("missing subcommand")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    fn without_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("CAMPUS_AUTH_IDENTITY_URL", None::<&str>),
                ("CAMPUS_AUTH_IDENTITY_API_KEY", None::<&str>),
                ("CAMPUS_AUTH_PASSWORD", None::<&str>),
            ],
            f,
        );
    }

    #[test]
    fn identity_url_required_for_status() {
        without_env(|| {
            let matches = commands::new().get_matches_from(vec!["campus-auth", "status"]);
            let err = handler(&matches).unwrap_err();
            assert!(
                err.to_string()
                    .contains("missing required argument: --identity-url")
            );
        });
    }

    #[test]
    fn permissions_needs_no_backend() {
        without_env(|| {
            let matches =
                commands::new().get_matches_from(vec!["campus-auth", "permissions", "parent"]);
            let Action::Permissions(args) = handler(&matches).unwrap() else {
                panic!("expected permissions action");
            };
            assert_eq!(args.role, Role::Guardian);
        });
    }

    #[test]
    fn login_collects_connection_and_credentials() {
        without_env(|| {
            let matches = commands::new().get_matches_from(vec![
                "campus-auth",
                "--identity-url",
                "https://id.campus.test",
                "--identity-api-key",
                "anon",
                "--allow-empty-admin-secret",
                "login",
                "ops-admin-7",
                "--password",
                "",
            ]);
            let Action::Login(args) = handler(&matches).unwrap() else {
                panic!("expected login action");
            };
            assert_eq!(args.identifier, "ops-admin-7");
            assert_eq!(
                args.password.as_ref().map(|p| p.expose_secret().to_string()),
                Some(String::new())
            );
            assert!(args.connect.allow_empty_admin_secret);
            assert_eq!(args.connect.identity_url, "https://id.campus.test");
        });
    }
}
