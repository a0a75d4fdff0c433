//! Supplementary profile lookup.
//!
//! Profiles are enrichment only: a missing row or a failed request never
//! affects whether a session is valid.

use crate::{APP_USER_AGENT, error::AuthError, identity::error_message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{Instrument, info_span, instrument};
use url::Url;

/// Columns that describe identity and must not leak into session metadata.
const IDENTITY_COLUMNS: [&str; 3] = ["id", "email", "role"];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub extra: Map<String, Value>,
}

impl Profile {
    /// Build a profile from a profile table row.
    #[must_use]
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let display_name = ["full_name", "name", "display_name"]
            .iter()
            .find_map(|key| row.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let department = row
            .get("department")
            .and_then(Value::as_str)
            .map(str::to_string);
        let extra = row
            .iter()
            .filter(|(key, value)| !IDENTITY_COLUMNS.contains(&key.as_str()) && !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self {
            display_name,
            department,
            extra,
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// # Errors
    /// Returns a classified error when the store can't be queried. `Ok(None)`
    /// means no profile exists for the subject.
    async fn fetch_profile(
        &self,
        subject_id: &str,
        email: &str,
        access_token: &SecretString,
    ) -> Result<Option<Profile>, AuthError>;
}

/// Store that never has a profile.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProfileStore;

#[async_trait]
impl ProfileStore for NoProfileStore {
    async fn fetch_profile(
        &self,
        _subject_id: &str,
        _email: &str,
        _access_token: &SecretString,
    ) -> Result<Option<Profile>, AuthError> {
        Ok(None)
    }
}

/// PostgREST-style `profiles` table lookup keyed by email.
pub struct RestProfileStore {
    client: Client,
    base_url: Url,
    api_key: SecretString,
}

impl RestProfileStore {
    /// # Errors
    /// Returns an error if the URL is invalid or the client can't be built.
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let base_url = super::http::parse_base_url(base_url)?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build profile HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn profile_url(&self, email: &str) -> Result<Url, AuthError> {
        let mut url = self
            .base_url
            .join("rest/v1/profiles")
            .map_err(|err| AuthError::ProviderFault(format!("invalid profile endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("email", &format!("eq.{email}"))
            .append_pair("limit", "1");
        Ok(url)
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    #[instrument(skip(self, email, access_token))]
    async fn fetch_profile(
        &self,
        subject_id: &str,
        email: &str,
        access_token: &SecretString,
    ) -> Result<Option<Profile>, AuthError> {
        if email.is_empty() {
            return Ok(None);
        }
        let url = self.profile_url(email)?;
        let span = info_span!("profile.fetch", http.method = "GET", url = %self.base_url);
        let response = self
            .client
            .get(url)
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(access_token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(if status.is_server_error() {
                AuthError::ProviderFault(message)
            } else {
                AuthError::InvalidCredentials(message)
            });
        }

        let rows: Vec<Map<String, Value>> = response.json().await?;
        Ok(rows.first().map(Profile::from_row))
    }
}
