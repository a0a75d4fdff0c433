//! Identity backends and their change stream.
//!
//! The primary backend is consumed through [`IdentityBackend`]; its
//! identity-change notifications arrive on an [`AuthEventStream`] that the
//! subscriber owns and drops to unsubscribe. Backends publish through an
//! [`EventHub`].

pub mod fallback;
pub mod http;
pub mod profile;

use crate::{
    error::AuthError,
    session::model::{IdentityClaims, SessionTokens},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Kinds of identity-change notification a backend can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    UserUpdated,
    SignedOut,
    InitialSession,
}

impl AuthEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignedIn => "SIGNED_IN",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::SignedOut => "SIGNED_OUT",
            Self::InitialSession => "INITIAL_SESSION",
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub access_token: Option<SecretString>,
}

impl AuthEvent {
    #[must_use]
    pub fn new(kind: AuthEventKind, access_token: Option<&str>) -> Self {
        Self {
            kind,
            access_token: access_token.map(|token| SecretString::from(token.to_string())),
        }
    }
}

impl fmt::Debug for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEvent")
            .field("kind", &self.kind)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Receiving end of a backend's change stream. Dropping it unsubscribes.
pub struct AuthEventStream {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthEventStream {
    /// Next event in delivery order, or `None` once the backend is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event stream lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Publishing side of a change stream.
#[derive(Clone, Debug)]
pub struct EventHub {
    sender: broadcast::Sender<AuthEvent>,
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, kind: AuthEventKind, access_token: Option<&str>) {
        // No subscribers is fine; nobody is listening yet.
        let _ = self.sender.send(AuthEvent::new(kind, access_token));
    }

    #[must_use]
    pub fn subscribe(&self) -> AuthEventStream {
        AuthEventStream {
            receiver: self.sender.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Session as reported by an identity backend.
#[derive(Clone, Debug)]
pub struct ProviderSession {
    pub user: IdentityClaims,
    pub tokens: SessionTokens,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderSession {
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.tokens.access_token.expose_secret()
    }
}

/// Primary identity backend contract.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// # Errors
    /// `InvalidCredentials` when the backend rejects the pair, otherwise
    /// `NetworkFailure` or `ProviderFault`.
    async fn sign_in_with_password(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<ProviderSession, AuthError>;

    /// Canonical identity behind an access token.
    ///
    /// # Errors
    /// Any classified failure; callers treat every error as fatal for the
    /// token.
    async fn get_user(&self, access_token: &SecretString) -> Result<IdentityClaims, AuthError>;

    /// The backend's own view of the current session, if any.
    ///
    /// # Errors
    /// `NetworkFailure` or `ProviderFault` when the backend can't answer.
    async fn get_session(&self) -> Result<Option<ProviderSession>, AuthError>;

    fn subscribe(&self) -> AuthEventStream;

    /// Sign out at the backend. `None` signs out locally only.
    ///
    /// # Errors
    /// Returns the classified backend failure; local state is cleared anyway.
    async fn sign_out(&self, access_token: Option<&SecretString>) -> Result<(), AuthError>;
}

/// Map a provider user object (`id`, `email`, `user_metadata`,
/// `app_metadata`) into identity claims.
#[must_use]
pub fn claims_from_user(user: &Value) -> IdentityClaims {
    let user_metadata = user
        .get("user_metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let app_metadata = user.get("app_metadata").and_then(Value::as_object);

    let role = string_field(Some(&user_metadata), &["role"])
        .or_else(|| string_field(app_metadata, &["role"]))
        .or_else(|| user.get("role").and_then(Value::as_str).map(str::to_string))
        // GoTrue puts "authenticated" in the top-level role; it is not a portal role.
        .filter(|role| role != "authenticated");

    IdentityClaims {
        subject_id: user
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        email: user
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role,
        display_name: string_field(Some(&user_metadata), &["full_name", "name", "display_name"]),
        raw_metadata: user_metadata,
    }
}

fn string_field(object: Option<&Map<String, Value>>, keys: &[&str]) -> Option<String> {
    let object = object?;
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Human-readable message from a provider error body.
pub(crate) fn error_message(body: &Value) -> Option<String> {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claims_prefer_user_metadata_role() {
        let user = json!({
            "id": "b1f0",
            "email": "lin@campus.test",
            "role": "authenticated",
            "user_metadata": {"role": "instructor", "full_name": "Lin Wei"},
            "app_metadata": {"role": "administrator"}
        });
        let claims = claims_from_user(&user);
        assert_eq!(claims.subject_id, "b1f0");
        assert_eq!(claims.role.as_deref(), Some("instructor"));
        assert_eq!(claims.display_name.as_deref(), Some("Lin Wei"));
    }

    #[test]
    fn claims_ignore_gotrue_authenticated_role() {
        let user = json!({"id": "1", "email": "a@b.c", "role": "authenticated"});
        assert_eq!(claims_from_user(&user).role, None);
    }

    #[test]
    fn claims_fall_back_to_app_metadata() {
        let user = json!({"id": "1", "app_metadata": {"role": "operator"}});
        assert_eq!(claims_from_user(&user).role.as_deref(), Some("operator"));
    }

    #[test]
    fn error_message_checks_known_fields() {
        assert_eq!(
            error_message(&json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
            Some("Invalid login credentials".to_string())
        );
        assert_eq!(
            error_message(&json!({"msg": "Email not confirmed"})),
            Some("Email not confirmed".to_string())
        );
        assert_eq!(error_message(&json!({})), None);
    }

    #[tokio::test]
    async fn event_stream_delivers_in_order() {
        let hub = EventHub::new(8);
        let mut stream = hub.subscribe();
        hub.emit(AuthEventKind::SignedIn, Some("t1"));
        hub.emit(AuthEventKind::TokenRefreshed, Some("t2"));
        hub.emit(AuthEventKind::SignedOut, None);

        let kinds = [
            stream.next().await.map(|e| e.kind),
            stream.next().await.map(|e| e.kind),
            stream.next().await.map(|e| e.kind),
        ];
        assert_eq!(
            kinds,
            [
                Some(AuthEventKind::SignedIn),
                Some(AuthEventKind::TokenRefreshed),
                Some(AuthEventKind::SignedOut)
            ]
        );
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let hub = EventHub::new(8);
        let stream = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stream_ends_when_hub_is_dropped() {
        let hub = EventHub::new(8);
        let mut stream = hub.subscribe();
        drop(hub);
        assert!(stream.next().await.is_none());
    }
}
