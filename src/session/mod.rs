//! Session lifecycle manager.
//!
//! One task owns the session. Callers hold a cloneable [`SessionHandle`] and
//! send it commands; readers watch [`SessionSnapshot`]s. Network work is
//! spawned and its result comes back to the owner as another command, so
//! command handling never awaits and events are applied strictly in the
//! order they are received.
//!
//! Every reconciliation is tagged with the generation active when it started.
//! Sign-out (explicit, backend-initiated or forced) and login commits advance
//! the generation, and results carrying an older tag are dropped. Logins are
//! tagged with the sign-out epoch instead: a login that completes after a
//! sign-out is rejected, but a concurrent reconciliation never cancels it.

pub mod model;

pub use self::model::{
    AuthStatus, IdentityClaims, Session, SessionSnapshot, SessionSource, SessionTokens,
    fingerprint,
};

use crate::{
    authz::{LogNavigator, Navigator, RedirectResolver, Role},
    cache::{KeyValueStore, SessionCache},
    config::AuthConfig,
    error::{AuthError, ErrorKind},
    identity::{
        AuthEvent, AuthEventKind, IdentityBackend, ProviderSession,
        fallback::FallbackIdentityClient,
        profile::{NoProfileStore, Profile, ProfileStore},
    },
    login::{FallbackStrategy, PrimaryStrategy, StrategyChain},
};
use secrecy::{ExposeSecret, SecretString};
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

const COMMAND_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Restore,
    Event(AuthEventKind),
}

enum Command {
    Initialize {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    BackendResolved {
        generation: u64,
        result: Result<Option<ProviderSession>, AuthError>,
    },
    Login {
        identifier: String,
        secret: SecretString,
        reply: oneshot::Sender<Result<Session, AuthError>>,
    },
    LoginFinished {
        epoch: u64,
        result: Result<Session, AuthError>,
        reply: oneshot::Sender<Result<Session, AuthError>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    ProviderEvent(AuthEvent),
    ReconcileFinished {
        token: String,
        generation: u64,
        trigger: Trigger,
        tokens: SessionTokens,
        result: Result<IdentityClaims, AuthError>,
    },
    ProfileFetched {
        generation: u64,
        subject_id: String,
        result: Result<Option<Profile>, AuthError>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct InFlight {
    generation: u64,
    waiters: Vec<oneshot::Sender<SessionSnapshot>>,
}

/// Wires collaborators together and spawns the manager task.
pub struct ManagerBuilder {
    config: AuthConfig,
    backend: Arc<dyn IdentityBackend>,
    store: Arc<dyn KeyValueStore>,
    fallback: Option<Arc<dyn FallbackIdentityClient>>,
    profiles: Arc<dyn ProfileStore>,
    navigator: Arc<dyn Navigator>,
}

impl ManagerBuilder {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        backend: Arc<dyn IdentityBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            fallback: None,
            profiles: Arc::new(NoProfileStore),
            navigator: Arc::new(LogNavigator),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackIdentityClient>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn with_profile_store(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Subscribe to the backend and start the manager task.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> SessionHandle {
        let mut strategies =
            StrategyChain::new().with_strategy(PrimaryStrategy::new(self.backend.clone()));
        if let Some(fallback) = self.fallback {
            strategies = strategies.with_strategy(FallbackStrategy::new(
                fallback,
                self.config.admin_secret_policy().clone(),
            ));
        }

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (snapshots, snapshot_rx) = watch::channel(SessionSnapshot::uninitialized());

        let forwarder = spawn_forwarder(self.backend.as_ref(), commands.downgrade());
        let manager = SessionLifecycleManager {
            backend: self.backend,
            profiles: self.profiles,
            strategies: Arc::new(strategies),
            cache: SessionCache::new(self.store, self.config.cache_keys().clone()),
            navigator: self.navigator,
            redirect: RedirectResolver::new(),
            session: None,
            generation: 0,
            sign_out_epoch: 0,
            started: false,
            init_waiters: Vec::new(),
            restore_token: None,
            in_flight: HashMap::new(),
            commands: commands.downgrade(),
            snapshots,
        };
        tokio::spawn(manager.run(receiver, forwarder));

        SessionHandle {
            commands,
            snapshots: snapshot_rx,
        }
    }
}

/// Forward backend events into the command queue until either side goes
/// away.
fn spawn_forwarder(
    backend: &dyn IdentityBackend,
    commands: mpsc::WeakSender<Command>,
) -> JoinHandle<()> {
    let mut events = backend.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Some(commands) = commands.upgrade() else {
                break;
            };
            if commands.send(Command::ProviderEvent(event)).await.is_err() {
                break;
            }
        }
    })
}

/// Single writer of the canonical session.
pub struct SessionLifecycleManager {
    backend: Arc<dyn IdentityBackend>,
    profiles: Arc<dyn ProfileStore>,
    strategies: Arc<StrategyChain>,
    cache: SessionCache,
    navigator: Arc<dyn Navigator>,
    redirect: RedirectResolver,
    session: Option<Session>,
    generation: u64,
    sign_out_epoch: u64,
    started: bool,
    init_waiters: Vec<oneshot::Sender<SessionSnapshot>>,
    restore_token: Option<String>,
    in_flight: HashMap<String, InFlight>,
    commands: mpsc::WeakSender<Command>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionLifecycleManager {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>, forwarder: JoinHandle<()>) {
        debug!("session manager started");
        while let Some(command) = receiver.recv().await {
            if let Command::Shutdown { reply } = command {
                let _ = reply.send(());
                break;
            }
            self.handle(command);
        }
        // Dropping the stream inside the forwarder unsubscribes from the backend.
        forwarder.abort();
        debug!("session manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize { reply } => self.initialize(reply),
            Command::BackendResolved { generation, result } => {
                self.backend_resolved(generation, result);
            }
            Command::Login {
                identifier,
                secret,
                reply,
            } => self.login(identifier, secret, reply),
            Command::LoginFinished {
                epoch,
                result,
                reply,
            } => self.login_finished(epoch, result, reply),
            Command::Logout { reply } => self.logout(reply),
            Command::ProviderEvent(event) => self.provider_event(event),
            Command::ReconcileFinished {
                token,
                generation,
                trigger,
                tokens,
                result,
            } => self.reconcile_finished(token, generation, trigger, tokens, result),
            Command::ProfileFetched {
                generation,
                subject_id,
                result,
            } => self.profile_fetched(generation, &subject_id, result),
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn status(&self) -> AuthStatus {
        if !self.init_waiters.is_empty() || self.restore_token.is_some() {
            AuthStatus::Restoring
        } else if self.session.is_some() {
            if self.in_flight.is_empty() {
                AuthStatus::Authenticated
            } else {
                AuthStatus::Reconciling
            }
        } else if self.started {
            AuthStatus::Anonymous
        } else {
            AuthStatus::Uninitialized
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            session: self.session.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn answer(&self, waiters: impl IntoIterator<Item = oneshot::Sender<SessionSnapshot>>) {
        let snapshot = self.snapshot();
        for waiter in waiters {
            let _ = waiter.send(snapshot.clone());
        }
    }

    /// Run `task` in the background and feed its result back as a command.
    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let command = task.await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(command).await;
            }
        });
    }

    fn initialize(&mut self, reply: oneshot::Sender<SessionSnapshot>) {
        self.started = true;

        // A second initialize joins the one already running.
        if let Some(entry) = self
            .restore_token
            .as_ref()
            .and_then(|token| self.in_flight.get_mut(token))
        {
            entry.waiters.push(reply);
            return;
        }
        if !self.init_waiters.is_empty() {
            self.init_waiters.push(reply);
            return;
        }

        if self.session.is_none() {
            if let Some(session) = self.cache.restore() {
                info!(
                    subject = %session.subject_id(),
                    role = %session.role(),
                    "restored cached session"
                );
                self.session = Some(session);
            }
        }
        self.init_waiters.push(reply);
        self.publish();

        let backend = self.backend.clone();
        let generation = self.generation;
        self.spawn_task(async move {
            let result = backend.get_session().await;
            Command::BackendResolved { generation, result }
        });
    }

    fn backend_resolved(
        &mut self,
        generation: u64,
        result: Result<Option<ProviderSession>, AuthError>,
    ) {
        if generation != self.generation {
            debug!("discarding stale backend session lookup");
            return;
        }
        let waiters = std::mem::take(&mut self.init_waiters);

        match result {
            Ok(Some(provider)) => {
                let token = provider.access_token().to_string();
                if self
                    .session
                    .as_ref()
                    .is_some_and(|session| session.token_matches(&token))
                {
                    debug!(token = %fingerprint(&token), "backend confirmed cached session");
                } else {
                    self.restore_token = Some(token.clone());
                    self.start_reconcile(token, provider.tokens, Trigger::Restore, waiters);
                    self.publish();
                    return;
                }
            }
            Ok(None) => match &self.session {
                Some(session) if session.source() == SessionSource::Fallback => {
                    debug!("keeping fallback session unknown to the primary backend");
                }
                Some(_) => {
                    info!("backend has no session, discarding cached session");
                    self.sign_out_locally();
                }
                None => {}
            },
            Err(err) => {
                if self.session.is_some() {
                    warn!("Backend verification failed, keeping cached session: {err}");
                } else {
                    warn!("Backend verification failed: {err}");
                }
            }
        }

        self.publish();
        self.answer(waiters);
    }

    fn start_reconcile(
        &mut self,
        token: String,
        tokens: SessionTokens,
        trigger: Trigger,
        waiters: Vec<oneshot::Sender<SessionSnapshot>>,
    ) {
        if let Some(entry) = self.in_flight.get_mut(&token) {
            entry.waiters.extend(waiters);
            return;
        }

        debug!(token = %fingerprint(&token), ?trigger, "reconciling");
        let generation = self.generation;
        self.in_flight.insert(
            token.clone(),
            InFlight {
                generation,
                waiters,
            },
        );

        let backend = self.backend.clone();
        self.spawn_task(async move {
            let result = backend.get_user(&tokens.access_token).await;
            Command::ReconcileFinished {
                token,
                generation,
                trigger,
                tokens,
                result,
            }
        });
    }

    fn reconcile_finished(
        &mut self,
        token: String,
        generation: u64,
        trigger: Trigger,
        tokens: SessionTokens,
        result: Result<IdentityClaims, AuthError>,
    ) {
        let entry = match self.in_flight.remove(&token) {
            Some(entry) if entry.generation == generation => entry,
            other => {
                if let Some(newer) = other {
                    self.in_flight.insert(token, newer);
                }
                debug!("discarding stale reconciliation");
                return;
            }
        };
        if self.restore_token.as_deref() == Some(token.as_str()) {
            self.restore_token = None;
        }

        match result {
            // Unreachable backend while restoring: keep whatever the cache gave us.
            Err(err)
                if trigger == Trigger::Restore
                    && matches!(
                        err.kind(),
                        ErrorKind::NetworkFailure | ErrorKind::ProviderFault
                    ) =>
            {
                if self.session.is_some() {
                    warn!("Backend verification failed, keeping cached session: {err}");
                } else {
                    warn!("Backend verification failed: {err}");
                }
            }
            result => {
                if let Err(err) =
                    result.and_then(|claims| self.apply_claims(claims, tokens, trigger))
                {
                    warn!("Reconciliation failed, signing out: {err}");
                    self.sign_out_locally();
                    self.spawn_backend_sign_out(SecretString::from(token));
                }
            }
        }

        self.publish();
        self.answer(entry.waiters);
    }

    fn apply_claims(
        &mut self,
        claims: IdentityClaims,
        tokens: SessionTokens,
        trigger: Trigger,
    ) -> Result<(), AuthError> {
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.subject_id() == claims.subject_id)
        {
            let role = Role::from_claim(claims.role.as_deref());
            if role != session.role() {
                return Err(AuthError::SessionReconciliationFailure(format!(
                    "role changed from {} to {role}",
                    session.role()
                )));
            }
            session.rotate(claims, tokens);
            debug!(subject = %session.subject_id(), "session reconciled");
        } else {
            let session = Session::authenticated(claims, tokens)
                .map_err(|err| AuthError::SessionReconciliationFailure(err.to_string()))?;
            info!(
                subject = %session.subject_id(),
                role = %session.role(),
                "session established from identity event"
            );
            let role = session.role();
            self.session = Some(session);
            if trigger == Trigger::Event(AuthEventKind::SignedIn) {
                self.redirect_once(role);
            }
        }

        self.persist();
        self.spawn_profile_fetch();
        Ok(())
    }

    fn login(
        &mut self,
        identifier: String,
        secret: SecretString,
        reply: oneshot::Sender<Result<Session, AuthError>>,
    ) {
        self.started = true;
        let strategies = self.strategies.clone();
        let epoch = self.sign_out_epoch;
        self.spawn_task(async move {
            let result = strategies.authenticate(&identifier, &secret).await;
            Command::LoginFinished {
                epoch,
                result,
                reply,
            }
        });
    }

    fn login_finished(
        &mut self,
        epoch: u64,
        result: Result<Session, AuthError>,
        reply: oneshot::Sender<Result<Session, AuthError>>,
    ) {
        let session = match result {
            Ok(session) => session,
            Err(err) => {
                info!(kind = ?err.kind(), "login rejected");
                let _ = reply.send(Err(err));
                return;
            }
        };

        if epoch != self.sign_out_epoch {
            info!(
                subject = %session.subject_id(),
                "signed out while the login was in flight, discarding it"
            );
            if session.source() == SessionSource::Primary {
                self.spawn_backend_sign_out(session.access_token().clone());
            }
            let _ = reply.send(Err(AuthError::SessionReconciliationFailure(
                "signed out while the login was in flight".to_string(),
            )));
            return;
        }

        info!(
            subject = %session.subject_id(),
            role = %session.role(),
            source = ?session.source(),
            "signed in"
        );
        let role = session.role();
        self.session = Some(session.clone());
        self.advance_generation();
        self.persist();
        self.redirect_once(role);
        self.spawn_profile_fetch();
        let _ = reply.send(Ok(session));
    }

    fn logout(&mut self, reply: oneshot::Sender<()>) {
        self.started = true;
        let token = self
            .session
            .as_ref()
            .filter(|session| session.source() == SessionSource::Primary)
            .map(|session| session.access_token().clone());
        self.sign_out_locally();
        info!("signed out");

        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.sign_out(token.as_ref()).await {
                warn!("Backend sign-out failed: {err}");
            }
            let _ = reply.send(());
        });
    }

    fn provider_event(&mut self, event: AuthEvent) {
        debug!(kind = %event.kind, "identity event");
        if event.kind == AuthEventKind::SignedOut {
            // A sign-out naming a token we neither hold nor reconcile is the
            // echo of a session that was already replaced.
            if let Some(token) = &event.access_token {
                let raw = token.expose_secret();
                let held = self
                    .session
                    .as_ref()
                    .is_some_and(|session| session.token_matches(raw));
                if !held && !self.in_flight.contains_key(raw) {
                    debug!(token = %fingerprint(raw), "sign-out for a token no longer held");
                    return;
                }
            }
            self.sign_out_locally();
            return;
        }

        let Some(token) = event.access_token else {
            debug!(kind = %event.kind, "identity event without a token ignored");
            return;
        };
        let raw = token.expose_secret();
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.token_matches(raw))
        {
            debug!(token = %fingerprint(raw), "token already held");
            return;
        }
        if self.in_flight.contains_key(raw) {
            debug!(token = %fingerprint(raw), "reconciliation already in flight");
            return;
        }

        self.start_reconcile(
            raw.to_string(),
            SessionTokens::new(raw, None),
            Trigger::Event(event.kind),
            Vec::new(),
        );
        self.publish();
    }

    fn profile_fetched(
        &mut self,
        generation: u64,
        subject_id: &str,
        result: Result<Option<Profile>, AuthError>,
    ) {
        if generation != self.generation {
            debug!("discarding stale profile");
            return;
        }
        match result {
            Ok(Some(profile)) => {
                let Some(session) = self
                    .session
                    .as_mut()
                    .filter(|session| session.subject_id() == subject_id)
                else {
                    return;
                };
                session.merge_profile(profile);
                self.persist();
                self.publish();
            }
            Ok(None) => debug!(subject = %subject_id, "no profile"),
            Err(err) => warn!("Profile lookup failed: {err}"),
        }
    }

    fn spawn_profile_fetch(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let profiles = self.profiles.clone();
        let subject_id = session.subject_id().to_string();
        let email = session.email().to_string();
        let token = session.access_token().clone();
        let generation = self.generation;
        self.spawn_task(async move {
            let result = profiles.fetch_profile(&subject_id, &email, &token).await;
            Command::ProfileFetched {
                generation,
                subject_id,
                result,
            }
        });
    }

    fn persist(&self) {
        if let Some(session) = &self.session {
            if let Err(err) = self.cache.persist(session) {
                warn!("Failed to persist session: {err}");
            }
        }
    }

    fn redirect_once(&mut self, role: Role) {
        if let Some(path) = self.redirect.resolve_once(role) {
            self.navigator.navigate(path);
        }
    }

    /// Invalidate everything started under the current generation.
    fn advance_generation(&mut self) {
        self.generation += 1;
        self.restore_token = None;
        let stale = std::mem::take(&mut self.in_flight);
        let waiters = std::mem::take(&mut self.init_waiters);
        self.publish();
        self.answer(
            stale
                .into_values()
                .flat_map(|entry| entry.waiters)
                .chain(waiters),
        );
    }

    /// Revoke `token` at the backend without waiting for it. The backend only
    /// forgets its own session if it still holds this token, and its
    /// `SIGNED_OUT` echo names the token, so a newer session survives.
    fn spawn_backend_sign_out(&self, token: SecretString) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.sign_out(Some(&token)).await {
                debug!("backend sign-out of a discarded session: {err}");
            }
        });
    }

    fn sign_out_locally(&mut self) {
        self.sign_out_epoch += 1;
        self.session = None;
        self.cache.clear();
        self.redirect.reset();
        self.advance_generation();
    }
}

/// Cloneable front door to the session manager.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AuthError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AuthError::NotRunning)?;
        response.await.map_err(|_| AuthError::NotRunning)
    }

    /// Restore from the cache, then settle against the backend.
    ///
    /// # Errors
    /// Returns `NotRunning` if the manager has stopped.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<SessionSnapshot, AuthError> {
        self.request(|reply| Command::Initialize { reply }).await
    }

    /// # Errors
    /// Returns the classified login failure, or `NotRunning`.
    #[instrument(skip(self, secret))]
    pub async fn login(&self, identifier: &str, secret: SecretString) -> Result<Session, AuthError> {
        let identifier = identifier.to_string();
        self.request(|reply| Command::Login {
            identifier,
            secret,
            reply,
        })
        .await?
    }

    /// Sign out locally at once and at the backend before returning.
    ///
    /// # Errors
    /// Returns `NotRunning` if the manager has stopped.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::Logout { reply }).await
    }

    /// Stop the manager and drop its backend subscription.
    ///
    /// # Errors
    /// Returns `NotRunning` if it had already stopped.
    pub async fn shutdown(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.snapshots.borrow().status
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.snapshots.borrow().is_authenticated()
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.snapshots.borrow().has_role(role)
    }

    #[must_use]
    pub fn has_permission(&self, name: &str) -> bool {
        self.snapshots.borrow().has_permission(name)
    }

    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.snapshots.borrow().session.clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryStore,
        identity::{AuthEventStream, EventHub},
    };
    use async_trait::async_trait;

    struct SilentBackend {
        events: EventHub,
    }

    #[async_trait]
    impl IdentityBackend for SilentBackend {
        async fn sign_in_with_password(
            &self,
            _identifier: &str,
            _secret: &SecretString,
        ) -> Result<ProviderSession, AuthError> {
            Err(AuthError::InvalidCredentials("no".into()))
        }

        async fn get_user(&self, _token: &SecretString) -> Result<IdentityClaims, AuthError> {
            Err(AuthError::InvalidCredentials("no".into()))
        }

        async fn get_session(&self) -> Result<Option<ProviderSession>, AuthError> {
            Ok(None)
        }

        fn subscribe(&self) -> AuthEventStream {
            self.events.subscribe()
        }

        async fn sign_out(&self, _token: Option<&SecretString>) -> Result<(), AuthError> {
            Ok(())
        }
    }

    fn spawn() -> (SessionHandle, EventHub) {
        let events = EventHub::new(8);
        let backend = Arc::new(SilentBackend {
            events: events.clone(),
        });
        let handle =
            ManagerBuilder::new(AuthConfig::new(), backend, Arc::new(MemoryStore::new())).spawn();
        (handle, events)
    }

    #[tokio::test]
    async fn starts_uninitialized_then_anonymous() {
        let (handle, _) = spawn();
        assert_eq!(handle.status(), AuthStatus::Uninitialized);
        let snapshot = handle.initialize().await.unwrap();
        assert_eq!(snapshot.status, AuthStatus::Anonymous);
        assert!(!handle.is_authenticated());
        assert!(handle.current_session().is_none());
    }

    #[tokio::test]
    async fn subscribes_on_spawn_and_unsubscribes_on_shutdown() {
        let (handle, events) = spawn();
        assert_eq!(events.subscriber_count(), 1);
        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        for _ in 0..50 {
            if events.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(events.subscriber_count(), 0);
        assert_eq!(handle.initialize().await.unwrap_err(), AuthError::NotRunning);
    }

    #[tokio::test]
    async fn failed_login_leaves_state_untouched() {
        let (handle, _) = spawn();
        handle.initialize().await.unwrap();
        let err = handle
            .login("ada@campus.test", SecretString::from("pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidCredentials);
        assert_eq!(handle.status(), AuthStatus::Anonymous);
    }
}
