//! Post-login landing routes.
//!
//! [`RedirectResolver`] hands out a role's landing path at most once per fresh
//! sign-in. The flag is only cleared by [`RedirectResolver::reset`], which the
//! session manager calls on sign-out, so reconciliations and token refreshes
//! never bounce the user back to the dashboard.

use super::role::Role;
use tracing::info;

/// Canonical landing path for a role.
#[must_use]
pub const fn landing_path(role: Role) -> &'static str {
    match role {
        Role::Administrator => "/admin/dashboard",
        Role::Instructor => "/faculty/dashboard",
        Role::Learner => "/student/dashboard",
        Role::Guardian => "/parent/dashboard",
        Role::FleetAdmin => "/transport/dashboard",
        Role::Operator => "/operator/dashboard",
    }
}

/// Destination for one-shot navigation requests.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator for headless use that only records the route in the log.
#[derive(Clone, Debug)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        info!(path, "post-login redirect");
    }
}

#[derive(Debug, Default)]
pub struct RedirectResolver {
    has_redirected: bool,
}

impl RedirectResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the landing path the first time it is called after a reset,
    /// `None` afterwards.
    pub fn resolve_once(&mut self, role: Role) -> Option<&'static str> {
        if self.has_redirected {
            return None;
        }
        self.has_redirected = true;
        Some(landing_path(role))
    }

    #[must_use]
    pub const fn has_redirected(&self) -> bool {
        self.has_redirected
    }

    pub fn reset(&mut self) {
        self.has_redirected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_once_until_reset() {
        let mut resolver = RedirectResolver::new();
        assert_eq!(
            resolver.resolve_once(Role::Instructor),
            Some("/faculty/dashboard")
        );
        assert_eq!(resolver.resolve_once(Role::Instructor), None);
        assert_eq!(resolver.resolve_once(Role::Administrator), None);
        assert!(resolver.has_redirected());

        resolver.reset();
        assert_eq!(
            resolver.resolve_once(Role::Administrator),
            Some("/admin/dashboard")
        );
    }

    #[test]
    fn every_role_has_a_distinct_landing_path() {
        let mut paths: Vec<_> = Role::ALL.into_iter().map(landing_path).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), Role::ALL.len());
    }
}
