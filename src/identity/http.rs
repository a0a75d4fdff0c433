//! GoTrue-compatible REST identity backend.
//!
//! Flow Overview:
//! - `sign_in_with_password` exchanges the pair at `/auth/v1/token?grant_type=password`.
//! - `get_user` resolves an access token at `/auth/v1/user`.
//! - `get_session` reads this backend's own persisted session and refreshes it
//!   at `/auth/v1/token?grant_type=refresh_token` once the access token expired.
//! - `sign_out` calls `/auth/v1/logout` and forgets the local session it
//!   signed out.
//!
//! The backend keeps its session under its own key in the shared key/value
//! store, separate from the application's session cache entries. Secrets and
//! tokens are never logged.

use super::{
    AuthEventKind, AuthEventStream, EventHub, IdentityBackend, ProviderSession, claims_from_user,
    error_message,
};
use crate::{
    APP_USER_AGENT,
    cache::KeyValueStore,
    error::AuthError,
    session::model::{IdentityClaims, SessionTokens},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{Instrument, debug, info_span, instrument, warn};
use url::Url;

/// Refresh slightly before the provider's deadline.
const EXPIRY_SKEW_SECONDS: i64 = 30;
const REFRESH_ATTEMPTS: u32 = 3;
const REFRESH_BACKOFF_BASE_MILLIS: u64 = 250;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Value,
}

/// Provider session as persisted by this backend.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Value,
}

impl StoredSession {
    fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_at
            .or_else(|| {
                response
                    .expires_in
                    .map(|seconds| Utc::now().timestamp() + seconds)
            })
            .or_else(|| jwt_expiry(&response.access_token));
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            user: response.user,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| exp <= now.timestamp() + EXPIRY_SKEW_SECONDS)
    }

    fn to_provider_session(&self) -> ProviderSession {
        ProviderSession {
            user: claims_from_user(&self.user),
            tokens: SessionTokens::new(self.access_token.clone(), self.refresh_token.clone()),
            expires_at: self
                .expires_at
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        }
    }
}

/// Read the `exp` claim of a JWT without verifying it; only used to decide
/// when to refresh.
#[must_use]
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = Base64UrlUnpadded::decode_vec(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp").and_then(Value::as_i64)
}

pub struct HttpIdentityBackend {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    store: Arc<dyn KeyValueStore>,
    session_key: String,
    events: EventHub,
}

impl HttpIdentityBackend {
    /// # Errors
    /// Returns an error if `base_url` is not an absolute http(s) URL or the
    /// HTTP client can't be built.
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        store: Arc<dyn KeyValueStore>,
        session_key: String,
        timeout: Duration,
        event_buffer: usize,
    ) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build identity HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            store,
            session_key,
            events: EventHub::new(event_buffer),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|err| AuthError::ProviderFault(format!("invalid endpoint {path}: {err}")))
    }

    fn authorized(&self, builder: RequestBuilder, bearer: Option<&SecretString>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.api_key);
        builder
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(token.expose_secret())
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<TokenResponse, AuthError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let span = info_span!(
            "identity.token",
            http.method = "POST",
            url = %self.base_url,
            grant_type
        );
        let response = self
            .authorized(self.client.post(url), None)
            .json(&body)
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(classify_status(status, &body));
        }

        response.json::<TokenResponse>().await.map_err(|err| {
            AuthError::ProviderFault(format!("unreadable token response: {err}"))
        })
    }

    fn load_stored(&self) -> Option<StoredSession> {
        let raw = match self.store.get(&self.session_key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("Failed to read provider session: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!("Discarding unreadable provider session: {err}");
                self.forget_stored();
                None
            }
        }
    }

    fn save_stored(&self, stored: &StoredSession) {
        let result = serde_json::to_string(stored)
            .map_err(std::io::Error::other)
            .and_then(|raw| self.store.set(&self.session_key, &raw));
        if let Err(err) = result {
            warn!("Failed to persist provider session: {err}");
        }
    }

    fn forget_stored(&self) {
        if let Err(err) = self.store.remove(&self.session_key) {
            warn!("Failed to remove provider session: {err}");
        }
    }

    /// Refresh with a short jittered backoff on network failures only.
    async fn refresh(&self, refresh_token: &str) -> Result<StoredSession, AuthError> {
        let mut last_error = AuthError::NetworkFailure("refresh not attempted".to_string());
        for attempt in 1..=REFRESH_ATTEMPTS {
            if attempt > 1 {
                let jitter = rand::thread_rng().gen_range(0..REFRESH_BACKOFF_BASE_MILLIS);
                let backoff = REFRESH_BACKOFF_BASE_MILLIS * 2u64.pow(attempt - 2) + jitter;
                warn!("Backing off for {backoff} ms before refreshing again");
                sleep(Duration::from_millis(backoff)).await;
            }

            match self
                .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
                .await
            {
                Ok(response) => return Ok(StoredSession::from_response(response)),
                Err(err @ AuthError::NetworkFailure(_)) => {
                    warn!("Failed to refresh provider session (attempt {attempt}): {err}");
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    #[instrument(skip(self, secret))]
    async fn sign_in_with_password(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<ProviderSession, AuthError> {
        let response = self
            .token_grant(
                "password",
                json!({ "email": identifier, "password": secret.expose_secret() }),
            )
            .await?;
        let stored = StoredSession::from_response(response);
        self.save_stored(&stored);
        self.events
            .emit(AuthEventKind::SignedIn, Some(&stored.access_token));
        Ok(stored.to_provider_session())
    }

    #[instrument(skip_all)]
    async fn get_user(&self, access_token: &SecretString) -> Result<IdentityClaims, AuthError> {
        let url = self.endpoint("auth/v1/user")?;
        let span = info_span!("identity.get_user", http.method = "GET", url = %url);
        let response = self
            .authorized(self.client.get(url), Some(access_token))
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(classify_status(status, &body));
        }

        let user: Value = response.json().await?;
        Ok(claims_from_user(&user))
    }

    #[instrument(skip_all)]
    async fn get_session(&self) -> Result<Option<ProviderSession>, AuthError> {
        let Some(stored) = self.load_stored() else {
            return Ok(None);
        };
        if !stored.is_expired(Utc::now()) {
            return Ok(Some(stored.to_provider_session()));
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            debug!("provider session expired without a refresh token");
            self.forget_stored();
            return Ok(None);
        };

        match self.refresh(refresh_token).await {
            Ok(mut refreshed) => {
                if refreshed.user.is_null() {
                    refreshed.user = stored.user;
                }
                self.save_stored(&refreshed);
                self.events
                    .emit(AuthEventKind::TokenRefreshed, Some(&refreshed.access_token));
                Ok(Some(refreshed.to_provider_session()))
            }
            Err(AuthError::InvalidCredentials(message)) => {
                debug!("refresh token rejected: {message}");
                self.forget_stored();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn subscribe(&self) -> AuthEventStream {
        self.events.subscribe()
    }

    /// Signing out a token only forgets the stored session if it still holds
    /// that token, so a late sign-out can't wipe a newer sign-in. The
    /// `SIGNED_OUT` event names the token that was signed out.
    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: Option<&SecretString>) -> Result<(), AuthError> {
        let stored_token = self.load_stored().map(|stored| stored.access_token);
        let signed_out = match access_token {
            Some(token) => {
                let token = token.expose_secret();
                if stored_token.as_deref() == Some(token) {
                    self.forget_stored();
                } else {
                    debug!("stored provider session belongs to another token, keeping it");
                }
                Some(token.to_string())
            }
            None => {
                self.forget_stored();
                stored_token
            }
        };

        let result = match access_token {
            Some(token) => {
                let url = self.endpoint("auth/v1/logout")?;
                let span = info_span!("identity.logout", http.method = "POST", url = %url);
                match self
                    .authorized(self.client.post(url), Some(token))
                    .send()
                    .instrument(span)
                    .await
                {
                    // An already-invalid token is as signed out as it gets.
                    Ok(response)
                        if response.status().is_success()
                            || response.status() == StatusCode::UNAUTHORIZED
                            || response.status() == StatusCode::FORBIDDEN =>
                    {
                        Ok(())
                    }
                    Ok(response) => {
                        let status = response.status();
                        let body: Value = response.json().await.unwrap_or(Value::Null);
                        Err(classify_status(status, &body))
                    }
                    Err(err) => Err(AuthError::from(err)),
                }
            }
            None => Ok(()),
        };

        // Nothing was signed in here when neither a token was given nor stored.
        if let Some(token) = signed_out {
            self.events.emit(AuthEventKind::SignedOut, Some(&token));
        }
        result
    }
}

/// Parse a base URL and make sure relative joins keep its path.
///
/// # Errors
/// Returns an error if the URL is not absolute http(s).
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("unsupported scheme {} in {raw}", url.scheme());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn classify_status(status: StatusCode, body: &Value) -> AuthError {
    let message = error_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::UNPROCESSABLE_ENTITY => AuthError::InvalidCredentials(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            AuthError::NetworkFailure(format!("{status}: {message}"))
        }
        _ => AuthError::ProviderFault(format!("{status}: {message}")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use axum::{
        Json, Router,
        extract::Query,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::{get, post},
    };
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    const KEY: &str = "campus.auth.provider_session";

    fn jwt_with_exp(exp: i64) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = Base64UrlUnpadded::encode_string(format!(r#"{{"exp":{exp}}}"#).as_bytes());
        format!("{header}.{payload}.sig")
    }

    async fn token(
        Query(params): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let user = json!({
            "id": "u-42",
            "email": "ada@campus.test",
            "role": "authenticated",
            "user_metadata": {"role": "instructor", "full_name": "Ada L."}
        });
        match params.get("grant_type").map(String::as_str) {
            Some("password") if body["password"] == "correct horse" => (
                AxumStatus::OK,
                Json(json!({
                    "access_token": "access-1",
                    "refresh_token": "refresh-1",
                    "expires_in": 3600,
                    "user": user
                })),
            ),
            Some("password") if body["password"] == "explode" => (
                AxumStatus::INTERNAL_SERVER_ERROR,
                Json(json!({"msg": "database unavailable"})),
            ),
            Some("password") => (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
            ),
            Some("refresh_token") if body["refresh_token"] == "refresh-1" => (
                AxumStatus::OK,
                Json(json!({
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                    "expires_in": 3600,
                    "user": user
                })),
            ),
            _ => (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": "invalid_grant", "error_description": "Invalid Refresh Token"})),
            ),
        }
    }

    async fn user(headers: HeaderMap) -> impl IntoResponse {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if bearer == "Bearer access-1" || bearer == "Bearer access-2" {
            (
                AxumStatus::OK,
                Json(json!({"id": "u-42", "email": "ada@campus.test", "user_metadata": {"role": "instructor"}})),
            )
        } else {
            (
                AxumStatus::UNAUTHORIZED,
                Json(json!({"msg": "invalid JWT"})),
            )
        }
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/logout", post(|| async { AxumStatus::NO_CONTENT }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn backend(url: &str, store: Arc<MemoryStore>) -> HttpIdentityBackend {
        HttpIdentityBackend::new(
            url,
            SecretString::from("anon-key"),
            store,
            KEY.to_string(),
            Duration::from_secs(5),
            16,
        )
        .unwrap()
    }

    #[test]
    fn jwt_expiry_reads_exp_claim() {
        assert_eq!(jwt_expiry(&jwt_with_exp(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.!!!.c"), None);
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let url = parse_base_url("https://id.campus.test/tenant").unwrap();
        assert_eq!(
            url.join("auth/v1/user").unwrap().as_str(),
            "https://id.campus.test/tenant/auth/v1/user"
        );
        assert!(parse_base_url("ftp://id.campus.test").is_err());
    }

    #[test]
    fn classify_status_maps_credentials_and_faults() {
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, &json!({"error_description": "Invalid login credentials"})),
            AuthError::InvalidCredentials(m) if m == "Invalid login credentials"
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, &Value::Null),
            AuthError::ProviderFault(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, &Value::Null),
            AuthError::NetworkFailure(_)
        ));
    }

    #[tokio::test]
    async fn sign_in_persists_and_emits() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        let backend = backend(&url, store.clone());
        let mut events = backend.subscribe();

        let session = backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("correct horse"))
            .await
            .unwrap();
        assert_eq!(session.access_token(), "access-1");
        assert_eq!(session.user.role.as_deref(), Some("instructor"));
        assert!(store.get(KEY).unwrap().is_some());

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, AuthEventKind::SignedIn);

        let current = backend.get_session().await.unwrap().unwrap();
        assert_eq!(current.access_token(), "access-1");
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let url = spawn_server().await;
        let backend = backend(&url, Arc::new(MemoryStore::new()));
        let err = backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("nope"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidCredentials("Invalid login credentials".to_string())
        );
    }

    #[tokio::test]
    async fn server_error_is_provider_fault() {
        let url = spawn_server().await;
        let backend = backend(&url, Arc::new(MemoryStore::new()));
        let err = backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("explode"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ProviderFault(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = backend(&format!("http://{addr}"), Arc::new(MemoryStore::new()));
        let err = backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn get_user_resolves_and_rejects() {
        let url = spawn_server().await;
        let backend = backend(&url, Arc::new(MemoryStore::new()));
        let claims = backend
            .get_user(&SecretString::from("access-1"))
            .await
            .unwrap();
        assert_eq!(claims.subject_id, "u-42");

        let err = backend
            .get_user(&SecretString::from("forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn expired_session_is_refreshed() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                KEY,
                &json!({
                    "access_token": jwt_with_exp(1),
                    "refresh_token": "refresh-1",
                    "user": {"id": "u-42"}
                })
                .to_string(),
            )
            .unwrap();
        let backend = backend(&url, store);
        let mut events = backend.subscribe();

        let session = backend.get_session().await.unwrap().unwrap();
        assert_eq!(session.access_token(), "access-2");
        assert_eq!(
            events.next().await.map(|e| e.kind),
            Some(AuthEventKind::TokenRefreshed)
        );
    }

    #[tokio::test]
    async fn rejected_refresh_forgets_session() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                KEY,
                &json!({"access_token": "old", "refresh_token": "stale", "expires_at": 1})
                    .to_string(),
            )
            .unwrap();
        let backend = backend(&url, store.clone());
        assert!(backend.get_session().await.unwrap().is_none());
        assert!(store.get(KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_provider_session_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "][").unwrap();
        let backend = backend("http://127.0.0.1:9", store.clone());
        assert!(backend.get_session().await.unwrap().is_none());
        assert!(store.get(KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_and_emits() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        let backend = backend(&url, store.clone());
        backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("correct horse"))
            .await
            .unwrap();
        let mut events = backend.subscribe();

        backend
            .sign_out(Some(&SecretString::from("access-1")))
            .await
            .unwrap();
        assert!(store.get(KEY).unwrap().is_none());
        let event = events.next().await.unwrap();
        assert_eq!(event.kind, AuthEventKind::SignedOut);
        assert_eq!(
            event.access_token.map(|t| t.expose_secret().to_string()),
            Some("access-1".to_string())
        );
    }

    #[tokio::test]
    async fn sign_out_of_old_token_keeps_newer_session() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        let backend = backend(&url, store.clone());
        backend
            .sign_in_with_password("ada@campus.test", &SecretString::from("correct horse"))
            .await
            .unwrap();
        let mut events = backend.subscribe();

        backend
            .sign_out(Some(&SecretString::from("access-0")))
            .await
            .unwrap();

        assert!(store.get(KEY).unwrap().is_some());
        let session = backend.get_session().await.unwrap().unwrap();
        assert_eq!(session.access_token(), "access-1");
        let event = events.next().await.unwrap();
        assert_eq!(
            event.access_token.map(|t| t.expose_secret().to_string()),
            Some("access-0".to_string())
        );
    }

    #[tokio::test]
    async fn local_sign_out_without_session_is_silent() {
        let url = spawn_server().await;
        let store = Arc::new(MemoryStore::new());
        let backend = backend(&url, store);
        let mut events = backend.subscribe();

        backend.sign_out(None).await.unwrap();
        backend.events.emit(AuthEventKind::InitialSession, None);

        assert_eq!(
            events.next().await.map(|e| e.kind),
            Some(AuthEventKind::InitialSession)
        );
    }
}
