//! Auth configuration: endpoints, cache keys and legacy login policy.

use regex::Regex;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_EVENT_BUFFER: usize = 64;
pub const DEFAULT_ADMIN_PATTERN: &str = r"^(?:ops-)?admin(?:[-_.][a-z0-9]+)*$";

pub const DEFAULT_SESSION_KEY: &str = "campus.auth.session";
pub const DEFAULT_TOKEN_KEY: &str = "campus.auth.token";
pub const DEFAULT_LOGIN_FLAG_KEY: &str = "campus.auth.logged_in";
pub const DEFAULT_PROVIDER_SESSION_KEY: &str = "campus.auth.provider_session";

/// Fixed keys of the three session cache entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKeys {
    pub session: String,
    pub token: String,
    pub login_flag: String,
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self {
            session: DEFAULT_SESSION_KEY.to_string(),
            token: DEFAULT_TOKEN_KEY.to_string(),
            login_flag: DEFAULT_LOGIN_FLAG_KEY.to_string(),
        }
    }
}

/// Legacy rule that lets administrator-looking identifiers reach the fallback
/// backend with an empty secret. Disabled unless explicitly turned on.
#[derive(Clone, Debug)]
pub struct AdminSecretPolicy {
    pattern: Option<Regex>,
}

impl AdminSecretPolicy {
    #[must_use]
    pub const fn disabled() -> Self {
        Self { pattern: None }
    }

    #[must_use]
    pub fn enabled(pattern: Regex) -> Self {
        Self {
            pattern: Some(pattern),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.pattern.is_some()
    }

    /// Whether an empty secret may be forwarded for this identifier.
    #[must_use]
    pub fn permits_empty_secret(&self, identifier: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&identifier.trim().to_ascii_lowercase()))
    }
}

impl Default for AdminSecretPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    cache_keys: CacheKeys,
    provider_session_key: String,
    admin_secret_policy: AdminSecretPolicy,
    request_timeout: Duration,
    event_buffer: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_keys: CacheKeys::default(),
            provider_session_key: DEFAULT_PROVIDER_SESSION_KEY.to_string(),
            admin_secret_policy: AdminSecretPolicy::disabled(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    #[must_use]
    pub fn with_cache_keys(mut self, keys: CacheKeys) -> Self {
        self.cache_keys = keys;
        self
    }

    #[must_use]
    pub fn with_provider_session_key(mut self, key: String) -> Self {
        self.provider_session_key = key;
        self
    }

    #[must_use]
    pub fn with_admin_secret_policy(mut self, policy: AdminSecretPolicy) -> Self {
        self.admin_secret_policy = policy;
        self
    }

    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    #[must_use]
    pub const fn cache_keys(&self) -> &CacheKeys {
        &self.cache_keys
    }

    #[must_use]
    pub fn provider_session_key(&self) -> &str {
        &self.provider_session_key
    }

    #[must_use]
    pub const fn admin_secret_policy(&self) -> &AdminSecretPolicy {
        &self.admin_secret_policy
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub const fn event_buffer(&self) -> usize {
        self.event_buffer
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
