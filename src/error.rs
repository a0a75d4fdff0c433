//! Classified authentication errors.
//!
//! Every failure that crosses the public contract is one of these variants.
//! The login dispatcher branches on [`ErrorKind`], and the UI renders
//! [`AuthError::user_message`], never the `Display` text, which may carry
//! provider detail.

use std::fmt::Write as _;
use thiserror::Error;

/// Failure classes used to decide recovery policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCredentials,
    NetworkFailure,
    ProviderFault,
    SessionReconciliationFailure,
    MalformedCacheEntry,
    LoginFailed,
    NotRunning,
}

/// One rejected attempt inside a merged login failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub error: AuthError,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("identity provider fault: {0}")]
    ProviderFault(String),
    #[error("session reconciliation failed: {0}")]
    SessionReconciliationFailure(String),
    #[error("malformed cache entry: {0}")]
    MalformedCacheEntry(String),
    /// Every login strategy failed; carries each attempt in order.
    #[error("login failed: {}", summarize(.attempts))]
    LoginFailed { attempts: Vec<StrategyFailure> },
    #[error("session manager is not running")]
    NotRunning,
}

fn summarize(attempts: &[StrategyFailure]) -> String {
    let mut out = String::new();
    for (index, attempt) in attempts.iter().enumerate() {
        if index > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{}: {}", attempt.strategy, attempt.error);
    }
    out
}

impl AuthError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            Self::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Self::ProviderFault(_) => ErrorKind::ProviderFault,
            Self::SessionReconciliationFailure(_) => ErrorKind::SessionReconciliationFailure,
            Self::MalformedCacheEntry(_) => ErrorKind::MalformedCacheEntry,
            Self::LoginFailed { .. } => ErrorKind::LoginFailed,
            Self::NotRunning => ErrorKind::NotRunning,
        }
    }

    /// The single human-readable line shown to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "Invalid login credentials.",
            Self::NetworkFailure(_) => {
                "Unable to reach the sign-in service. Check your connection and try again."
            }
            Self::ProviderFault(_) => {
                "The sign-in service is temporarily unavailable. Please try again later."
            }
            Self::SessionReconciliationFailure(_) => {
                "Your session is no longer valid. Please sign in again."
            }
            Self::MalformedCacheEntry(_) => {
                "Your saved session could not be restored. Please sign in again."
            }
            // The last attempt is the most recent thing the user waited on.
            Self::LoginFailed { attempts } => attempts
                .last()
                .map_or("Invalid login credentials.", |attempt| {
                    attempt.error.user_message()
                }),
            Self::NotRunning => "Sign-in is unavailable right now. Please restart the application.",
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::ProviderFault(format!("unreadable response: {err}"))
        } else if err.is_status() {
            Self::ProviderFault(err.to_string())
        } else {
            Self::NetworkFailure(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            AuthError::InvalidCredentials("bad".into()).kind(),
            ErrorKind::InvalidCredentials
        );
        assert_eq!(
            AuthError::NetworkFailure("down".into()).kind(),
            ErrorKind::NetworkFailure
        );
        assert_eq!(AuthError::NotRunning.kind(), ErrorKind::NotRunning);
    }

    #[test]
    fn login_failed_display_lists_every_attempt() {
        let err = AuthError::LoginFailed {
            attempts: vec![
                StrategyFailure {
                    strategy: "primary",
                    error: AuthError::InvalidCredentials("Invalid login credentials".into()),
                },
                StrategyFailure {
                    strategy: "fallback",
                    error: AuthError::InvalidCredentials("User not found".into()),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("primary: invalid credentials"));
        assert!(text.contains("fallback: invalid credentials: User not found"));
        assert_eq!(err.user_message(), "Invalid login credentials.");
    }

    #[test]
    fn login_failed_user_message_follows_last_attempt() {
        let err = AuthError::LoginFailed {
            attempts: vec![
                StrategyFailure {
                    strategy: "primary",
                    error: AuthError::InvalidCredentials("nope".into()),
                },
                StrategyFailure {
                    strategy: "fallback",
                    error: AuthError::NetworkFailure("connection refused".into()),
                },
            ],
        };
        assert_eq!(
            err.user_message(),
            AuthError::NetworkFailure(String::new()).user_message()
        );
    }

    #[test]
    fn user_message_never_leaks_detail() {
        let err = AuthError::ProviderFault("stack trace: secret-internal-host".into());
        assert!(!err.user_message().contains("secret-internal-host"));
    }
}
