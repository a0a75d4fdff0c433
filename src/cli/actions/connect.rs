//! Wiring of the HTTP collaborators behind a session handle.

use crate::{
    cache::{FileStore, KeyValueStore},
    config::{AdminSecretPolicy, AuthConfig},
    identity::{fallback::RestFallbackClient, http::HttpIdentityBackend, profile::RestProfileStore},
    session::{ManagerBuilder, SessionHandle},
};
use anyhow::{Context, Result};
use regex::Regex;
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub identity_url: String,
    pub identity_api_key: SecretString,
    pub fallback_url: Option<String>,
    pub profile_url: Option<String>,
    pub cache_dir: PathBuf,
    pub request_timeout_seconds: u64,
    pub allow_empty_admin_secret: bool,
    pub admin_pattern: Regex,
}

impl Args {
    #[must_use]
    pub fn config(&self) -> AuthConfig {
        let policy = if self.allow_empty_admin_secret {
            AdminSecretPolicy::enabled(self.admin_pattern.clone())
        } else {
            AdminSecretPolicy::disabled()
        };
        AuthConfig::new()
            .with_admin_secret_policy(policy)
            .with_request_timeout_seconds(self.request_timeout_seconds)
    }

    /// Build the collaborators and spawn the session manager.
    ///
    /// # Errors
    /// Returns an error if the cache directory can't be opened or a URL is
    /// invalid.
    pub fn spawn(&self) -> Result<SessionHandle> {
        let config = self.config();
        let timeout = config.request_timeout();

        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::open(&self.cache_dir).with_context(|| {
                format!("Failed to open cache directory {}", self.cache_dir.display())
            })?,
        );
        let backend = HttpIdentityBackend::new(
            &self.identity_url,
            self.identity_api_key.clone(),
            store.clone(),
            config.provider_session_key().to_string(),
            timeout,
            config.event_buffer(),
        )
        .context("invalid --identity-url")?;

        let profile_url = self.profile_url.as_deref().unwrap_or(&self.identity_url);
        let profiles =
            RestProfileStore::new(profile_url, self.identity_api_key.clone(), timeout)
                .context("invalid --profile-url")?;

        let mut builder = ManagerBuilder::new(config, Arc::new(backend), store)
            .with_profile_store(Arc::new(profiles));
        if let Some(url) = &self.fallback_url {
            debug!(url, "fallback login enabled");
            let fallback = RestFallbackClient::new(url, timeout).context("invalid --fallback-url")?;
            builder = builder.with_fallback(Arc::new(fallback));
        }

        Ok(builder.spawn())
    }
}
