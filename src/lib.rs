//! # Campus Auth (Session & Role Authorization Lifecycle)
//!
//! `campus_auth` owns the "who is signed in" question for a campus portal
//! client process. It mediates between a primary identity backend and a
//! secondary REST fallback, keeps the session in a local write-through cache
//! across restarts, deduplicates identity-change notifications, and derives
//! per-role permissions and the one-time post-login landing route.
//!
//! ## Session Ownership
//!
//! A single [`session::SessionLifecycleManager`] task owns the canonical
//! session. Every other component talks to it through a cloneable
//! [`session::SessionHandle`] (commands over a channel) or observes it through
//! a `watch` snapshot. There is no global state and no shared lock.
//!
//! ## Login Policy
//!
//! Login walks an ordered list of strategies (primary backend, then REST
//! fallback). Only an `InvalidCredentials` result moves on to the next
//! strategy; network and provider faults abort immediately. When every
//! strategy rejects the credentials the failures are merged into one
//! user-facing error.
//!
//! ## Reconciliation
//!
//! Identity-change events are processed in delivery order. A token that is
//! already held, or already being reconciled, is skipped. Every reconciliation
//! is tagged with a generation counter that `logout()` advances, so results
//! that complete after a sign-out are discarded instead of resurrecting a
//! session. Supplementary profile data is merged fire-and-forget and can never
//! change the role or authentication validity of a session.

pub mod authz;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod login;
pub mod session;

pub use self::error::{AuthError, ErrorKind};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
