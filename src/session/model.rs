//! Session value types.
//!
//! A [`Session`] is only constructible in the authenticated shape: it always
//! has a subject, a role from the closed [`Role`] set and a non-empty access
//! token. Its role and validity are private and have no setters; the only
//! mutations are token rotation for the same subject and additive profile
//! enrichment.

use crate::{
    authz::{PermissionRegistry, PermissionSet, Role},
    error::AuthError,
    identity::profile::Profile,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Externally observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Uninitialized,
    Restoring,
    Authenticated,
    Reconciling,
    Anonymous,
}

/// Which backend issued a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    #[default]
    Primary,
    Fallback,
}

/// Access and refresh tokens issued together.
#[derive(Clone)]
pub struct SessionTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

impl SessionTokens {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: refresh_token
                .filter(|token| !token.is_empty())
                .map(SecretString::from),
        }
    }
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &fingerprint(self.access_token.expose_secret()))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Identity fields as reported by a backend, before a session exists.
#[derive(Clone, Debug, Default)]
pub struct IdentityClaims {
    pub subject_id: String,
    pub email: String,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub raw_metadata: Map<String, Value>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    subject_id: String,
    email: String,
    role: Role,
    display_name: String,
    #[serde(serialize_with = "expose", deserialize_with = "conceal")]
    access_token: SecretString,
    #[serde(
        default,
        serialize_with = "expose_opt",
        deserialize_with = "conceal_opt"
    )]
    refresh_token: Option<SecretString>,
    #[serde(default)]
    raw_metadata: Map<String, Value>,
    #[serde(default)]
    department: Option<String>,
    authenticated: bool,
    issued_at: DateTime<Utc>,
    #[serde(default)]
    source: SessionSource,
}

impl Session {
    /// Build an authenticated session from backend claims.
    ///
    /// # Errors
    /// Returns `ProviderFault` when the backend omitted the subject or issued
    /// an empty access token; such a response can't back a session.
    pub fn authenticated(claims: IdentityClaims, tokens: SessionTokens) -> Result<Self, AuthError> {
        if claims.subject_id.trim().is_empty() {
            return Err(AuthError::ProviderFault(
                "identity response is missing a subject id".to_string(),
            ));
        }
        if tokens.access_token.expose_secret().is_empty() {
            return Err(AuthError::ProviderFault(
                "identity response is missing an access token".to_string(),
            ));
        }

        let role = Role::from_claim(claims.role.as_deref());
        let display_name = claims
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_display_name(&claims.email));

        Ok(Self {
            subject_id: claims.subject_id,
            email: claims.email,
            role,
            display_name,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            raw_metadata: claims.raw_metadata,
            department: None,
            authenticated: true,
            issued_at: Utc::now(),
            source: SessionSource::Primary,
        })
    }

    #[must_use]
    pub(crate) fn with_source(mut self, source: SessionSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn department(&self) -> Option<&str> {
        self.department.as_deref()
    }

    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub const fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub const fn raw_metadata(&self) -> &Map<String, Value> {
        &self.raw_metadata
    }

    #[must_use]
    pub const fn source(&self) -> SessionSource {
        self.source
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Permissions derived from the role; never stored independently.
    #[must_use]
    pub fn permissions(&self) -> &'static PermissionSet {
        PermissionRegistry::permissions(self.role)
    }

    #[must_use]
    pub fn token_matches(&self, token: &str) -> bool {
        self.access_token.expose_secret() == token
    }

    /// Invariant check used when restoring from an untrusted source.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.authenticated
            && !self.subject_id.is_empty()
            && !self.access_token.expose_secret().is_empty()
    }

    /// Adopt rotated tokens and refreshed non-identity fields for the same
    /// subject. Role and validity are left untouched.
    pub(crate) fn rotate(&mut self, claims: IdentityClaims, tokens: SessionTokens) {
        self.access_token = tokens.access_token;
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        if !claims.email.is_empty() {
            self.email = claims.email;
        }
        if let Some(name) = claims.display_name.filter(|name| !name.trim().is_empty()) {
            self.display_name = name;
        }
        for (key, value) in claims.raw_metadata {
            self.raw_metadata.insert(key, value);
        }
    }

    /// Merge supplementary profile fields. Existing metadata keys win.
    pub(crate) fn merge_profile(&mut self, profile: Profile) {
        if let Some(name) = profile.display_name.filter(|name| !name.trim().is_empty()) {
            self.display_name = name;
        }
        if profile.department.is_some() {
            self.department = profile.department;
        }
        for (key, value) in profile.extra {
            self.raw_metadata.entry(key).or_insert(value);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("display_name", &self.display_name)
            .field("access_token", &fingerprint(self.access_token.expose_secret()))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("department", &self.department)
            .field("authenticated", &self.authenticated)
            .field("issued_at", &self.issued_at)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view published to readers.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub status: AuthStatus,
    pub session: Option<Session>,
}

impl SessionSnapshot {
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self {
            status: AuthStatus::Uninitialized,
            session: None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_authenticated)
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_authenticated() && session.role() == role)
    }

    #[must_use]
    pub fn has_permission(&self, name: &str) -> bool {
        self.session.as_ref().is_some_and(|session| {
            session.is_authenticated() && session.permissions().allows_named(name)
        })
    }
}

/// Short, non-reversible token label for logs.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…({})", token.len())
}

fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn conceal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

#[allow(clippy::ref_option)]
fn expose_opt<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn conceal_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    Option::<String>::deserialize(deserializer).map(|value| value.map(SecretString::from))
}
