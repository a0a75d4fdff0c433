//! Ordered login strategies.
//!
//! A [`StrategyChain`] tries each [`AuthStrategy`] in order. Only
//! `InvalidCredentials` moves on to the next strategy; any other failure ends
//! the chain at once. Once more than one strategy has been tried, the
//! failures are reported together as [`AuthError::LoginFailed`].

use crate::{
    config::AdminSecretPolicy,
    error::{AuthError, ErrorKind, StrategyFailure},
    identity::{IdentityBackend, ProviderSession, fallback::FallbackIdentityClient},
    session::model::{Session, SessionSource},
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns the classified failure of this strategy.
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Session, AuthError>;
}

fn into_session(provider: ProviderSession, source: SessionSource) -> Result<Session, AuthError> {
    Session::authenticated(provider.user, provider.tokens).map(|session| session.with_source(source))
}

/// Password sign-in against the primary identity backend.
pub struct PrimaryStrategy {
    backend: Arc<dyn IdentityBackend>,
}

impl PrimaryStrategy {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AuthStrategy for PrimaryStrategy {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Session, AuthError> {
        if secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "a password is required".to_string(),
            ));
        }
        let provider = self.backend.sign_in_with_password(identifier, secret).await?;
        into_session(provider, SessionSource::Primary)
    }
}

/// Legacy REST login, consulted after the primary backend rejects the pair.
pub struct FallbackStrategy {
    client: Arc<dyn FallbackIdentityClient>,
    policy: AdminSecretPolicy,
}

impl FallbackStrategy {
    #[must_use]
    pub fn new(client: Arc<dyn FallbackIdentityClient>, policy: AdminSecretPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl AuthStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Session, AuthError> {
        if secret.expose_secret().is_empty() {
            if !self.policy.permits_empty_secret(identifier) {
                return Err(AuthError::InvalidCredentials(
                    "a password is required".to_string(),
                ));
            }
            warn!("Forwarding empty secret for administrator identifier");
        }
        let provider = self.client.authenticate(identifier, secret).await?;
        into_session(provider, SessionSource::Fallback)
    }
}

#[derive(Default)]
pub struct StrategyChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl StrategyChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the strategies in order until one succeeds.
    ///
    /// # Errors
    /// The first non-credential failure aborts the chain. Failures after the
    /// first attempt are merged into `LoginFailed`.
    #[instrument(skip(self, secret))]
    pub async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Session, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "an identifier is required".to_string(),
            ));
        }

        let mut attempts = Vec::new();
        for (index, strategy) in self.strategies.iter().enumerate() {
            let last = index + 1 == self.strategies.len();
            match strategy.authenticate(identifier, secret).await {
                Ok(session) => {
                    info!(
                        strategy = strategy.name(),
                        role = %session.role(),
                        "login succeeded"
                    );
                    return Ok(session);
                }
                Err(error) => {
                    debug!(strategy = strategy.name(), "login strategy failed: {error}");
                    let terminal = last || error.kind() != ErrorKind::InvalidCredentials;
                    if terminal && attempts.is_empty() {
                        return Err(error);
                    }
                    attempts.push(StrategyFailure {
                        strategy: strategy.name(),
                        error,
                    });
                    if terminal {
                        return Err(AuthError::LoginFailed { attempts });
                    }
                }
            }
        }

        Err(AuthError::ProviderFault(
            "no login strategy is configured".to_string(),
        ))
    }
}
