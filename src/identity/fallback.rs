//! Secondary REST authentication backend.
//!
//! The fallback API speaks its own schema:
//!
//! ```text
//! POST {base}/auth/login  {"user_id": "...", "password": "..."}
//! 200 {"success": true, "user": {"id", "email", "role", "name"}, "session": ...}
//! any non-2xx, or {"success": false, "message": "..."}
//! ```
//!
//! Responses are normalized into a [`ProviderSession`] with missing fields
//! defaulted.

use super::{ProviderSession, error_message, http::parse_base_url};
use crate::{
    APP_USER_AGENT,
    error::AuthError,
    session::model::{IdentityClaims, SessionTokens},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{Instrument, debug, info_span, instrument};
use ulid::Ulid;
use url::Url;

const FALLBACK_TOKEN_PREFIX: &str = "fallback.";

#[async_trait]
pub trait FallbackIdentityClient: Send + Sync {
    /// # Errors
    /// `InvalidCredentials` for a rejected pair, otherwise `NetworkFailure`
    /// or `ProviderFault`.
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<ProviderSession, AuthError>;
}

pub struct RestFallbackClient {
    client: Client,
    login_url: Url,
}

impl RestFallbackClient {
    /// # Errors
    /// Returns an error if the URL is invalid or the client can't be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let login_url = parse_base_url(base_url)?
            .join("auth/login")
            .context("Failed to build fallback login URL")?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build fallback HTTP client")?;
        Ok(Self { client, login_url })
    }
}

#[async_trait]
impl FallbackIdentityClient for RestFallbackClient {
    #[instrument(skip(self, secret))]
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<ProviderSession, AuthError> {
        let span = info_span!(
            "fallback.login",
            http.method = "POST",
            url = %self.login_url
        );
        let response = self
            .client
            .post(self.login_url.clone())
            .json(&json!({ "user_id": identifier, "password": secret.expose_secret() }))
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        let body: Value = if status.is_success() {
            response.json().await?
        } else {
            response.json().await.unwrap_or(Value::Null)
        };

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(match status {
                StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::NOT_FOUND => AuthError::InvalidCredentials(message),
                _ => AuthError::ProviderFault(format!("{status}: {message}")),
            });
        }

        if body.get("success").and_then(Value::as_bool) != Some(true) {
            let message =
                error_message(&body).unwrap_or_else(|| "Invalid login credentials".to_string());
            return Err(AuthError::InvalidCredentials(message));
        }

        Ok(normalize(identifier, &body))
    }
}

/// Normalize a successful fallback response into the provider session shape.
#[must_use]
pub fn normalize(identifier: &str, body: &Value) -> ProviderSession {
    let user = body
        .get("user")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let text = |key: &str| user.get(key).and_then(Value::as_str).map(str::to_string);

    let subject_id = user
        .get("id")
        .and_then(|id| match id {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| identifier.to_string());
    let email = text("email").unwrap_or_else(|| {
        if identifier.contains('@') {
            identifier.to_string()
        } else {
            String::new()
        }
    });
    let role = text("role");
    if role.is_none() {
        debug!("fallback response carries no role");
    }

    let mut raw_metadata = Map::new();
    for (key, value) in &user {
        if !matches!(key.as_str(), "id" | "email" | "role" | "name") {
            raw_metadata.insert(key.clone(), value.clone());
        }
    }

    let (access_token, refresh_token) = session_tokens(body.get("session"));
    ProviderSession {
        user: IdentityClaims {
            subject_id,
            email,
            role,
            display_name: text("name"),
            raw_metadata,
        },
        tokens: SessionTokens::new(access_token, refresh_token),
        expires_at: None,
    }
}

/// The fallback `session` field is either a bare token string or an object.
/// A session without a usable token gets a locally minted opaque one.
fn session_tokens(session: Option<&Value>) -> (String, Option<String>) {
    let (access, refresh) = match session {
        Some(Value::String(token)) => (Some(token.clone()), None),
        Some(Value::Object(object)) => {
            let field = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
            (
                field("access_token").or_else(|| field("token")),
                field("refresh_token"),
            )
        }
        _ => (None, None),
    };
    let access = access
        .filter(|token| !token.is_empty())
        .unwrap_or_else(|| format!("{FALLBACK_TOKEN_PREFIX}{}", Ulid::new()));
    (access, refresh)
}
