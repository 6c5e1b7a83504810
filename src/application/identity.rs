use crate::application::policy::{Backend, RemoteScope, StoragePolicy};
use crate::domain::models::Session;
use crate::infrastructure::auth_client::{
    AuthHttpClient, AuthTokenResponse, PasswordCredentials, SignUpRequest, SignUpResponse,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex as AsyncMutex, broadcast};

const SESSION_LEEWAY_SECONDS: i64 = 60;
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub email_redirect_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired { email: String },
}

/// Handle returned by [`IdentityProvider::subscribe`]. Dropping it releases
/// the listener as well.
pub struct SessionSubscription {
    pub initial: Option<Session>,
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// Waits for the next session change; `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("session listener skipped {skipped} stale events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct IdentityProvider<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    config: AuthConfig,
    session_store: Arc<S>,
    auth_client: Arc<C>,
    current: RwLock<Option<Session>>,
    refresh_gate: AsyncMutex<()>,
    events: broadcast::Sender<SessionEvent>,
    now_provider: NowProvider,
}

impl<S, C> IdentityProvider<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    pub fn new(config: AuthConfig, session_store: Arc<S>, auth_client: Arc<C>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            session_store,
            auth_client,
            current: RwLock::new(None),
            refresh_gate: AsyncMutex::new(()),
            events,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn current_session(&self) -> Option<Session> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Registers for session changes and performs one eager fetch.
    pub async fn subscribe(&self) -> SessionSubscription {
        let receiver = self.events.subscribe();
        let initial = self.fetch_session().await;
        SessionSubscription { initial, receiver }
    }

    /// Loads the persisted session, refreshing it once when expired. Any
    /// failure is logged and leaves the session empty.
    pub async fn fetch_session(&self) -> Option<Session> {
        match self.load_or_refresh().await {
            Ok(session) => {
                self.set_current(session.clone());
                session
            }
            Err(error) => {
                log::warn!("session fetch failed: {error}");
                self.set_current(None);
                None
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, InfraError> {
        let credentials = validate_credentials(email, password)?;
        let email = credentials.email.clone();
        let response = self
            .auth_client
            .sign_up(SignUpRequest {
                credentials,
                email_redirect_to: self.config.email_redirect_to.clone(),
            })
            .await?;

        match response {
            SignUpResponse::Session(tokens) => {
                let session = self.session_from_response(tokens, None);
                self.establish(session.clone(), SessionEventKind::SignedIn)?;
                Ok(SignUpOutcome::SignedIn(session))
            }
            SignUpResponse::ConfirmationSent(user) => Ok(SignUpOutcome::ConfirmationRequired {
                email: user.email.unwrap_or(email),
            }),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, InfraError> {
        let credentials = validate_credentials(email, password)?;
        let response = self.auth_client.sign_in_with_password(credentials).await?;
        let session = self.session_from_response(response, None);
        self.establish(session.clone(), SessionEventKind::SignedIn)?;
        Ok(session)
    }

    /// Remote logout is best-effort; the local session is always dropped.
    pub async fn sign_out(&self) -> Result<(), InfraError> {
        let previous = self.current_session();
        if let Some(session) = &previous {
            if let Err(error) = self.auth_client.sign_out(&session.access_token).await {
                log::warn!("remote sign-out failed: {error}");
            }
        }

        self.set_current(None);
        let cleared = self.session_store.delete_session();
        self.emit(SessionEventKind::SignedOut, None);
        cleared
    }

    /// Serialised so concurrent fetches never spend the same refresh token
    /// twice; a waiter re-reads the store and finds the refreshed session.
    async fn load_or_refresh(&self) -> Result<Option<Session>, InfraError> {
        let _gate = self.refresh_gate.lock().await;
        let Some(stored) = self.session_store.load_session()? else {
            return Ok(None);
        };
        if stored.is_valid_at((self.now_provider)(), SESSION_LEEWAY_SECONDS) {
            return Ok(Some(stored));
        }

        let Some(refresh_token) = stored.refresh_token.clone() else {
            self.session_store.delete_session()?;
            return Ok(None);
        };

        match self.auth_client.refresh_session(&refresh_token).await {
            Ok(response) => {
                let session = self.session_from_response(response, Some(refresh_token));
                self.session_store.save_session(&session)?;
                self.emit(SessionEventKind::TokenRefreshed, Some(session.clone()));
                Ok(Some(session))
            }
            Err(InfraError::Auth(message)) => {
                log::info!("stored session was rejected on refresh: {message}");
                self.session_store.delete_session()?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn establish(&self, session: Session, kind: SessionEventKind) -> Result<(), InfraError> {
        self.session_store.save_session(&session)?;
        self.set_current(Some(session.clone()));
        self.emit(kind, Some(session));
        Ok(())
    }

    fn set_current(&self, session: Option<Session>) {
        match self.current.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    fn emit(&self, kind: SessionEventKind, session: Option<Session>) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(SessionEvent { kind, session });
    }

    fn session_from_response(
        &self,
        response: AuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> Session {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        Session {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            user: response.user,
        }
    }
}

impl<S, C> StoragePolicy for IdentityProvider<S, C>
where
    S: SessionStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    fn backend(&self) -> Backend {
        match self.current_session() {
            Some(session) => Backend::Remote(RemoteScope {
                owner_id: session.owner_id().to_string(),
                access_token: session.access_token,
            }),
            None => Backend::Local,
        }
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<PasswordCredentials, InfraError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(InfraError::Validation(
            "Please enter both email and password".to_string(),
        ));
    }
    Ok(PasswordCredentials {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionUser;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum FakeOutcome {
        Tokens(AuthTokenResponse),
        Confirmation,
        Rejected(String),
        Offline,
    }

    #[derive(Debug)]
    struct FakeAuthClient {
        sign_in: Mutex<FakeOutcome>,
        refresh: Mutex<FakeOutcome>,
        sign_up: Mutex<FakeOutcome>,
        sign_out_fails: bool,
        calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        sign_out_calls: AtomicUsize,
    }

    impl Default for FakeAuthClient {
        fn default() -> Self {
            Self {
                sign_in: Mutex::new(FakeOutcome::Tokens(tokens("access-1"))),
                refresh: Mutex::new(FakeOutcome::Tokens(tokens("access-refreshed"))),
                sign_up: Mutex::new(FakeOutcome::Confirmation),
                sign_out_fails: false,
                calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                sign_out_calls: AtomicUsize::new(0),
            }
        }
    }

    fn tokens(access_token: &str) -> AuthTokenResponse {
        AuthTokenResponse {
            access_token: access_token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_in: 3600,
            token_type: Some("bearer".to_string()),
            user: SessionUser {
                id: "user-1".to_string(),
                email: Some("ada@example.com".to_string()),
            },
        }
    }

    fn resolve(outcome: &Mutex<FakeOutcome>) -> Result<AuthTokenResponse, InfraError> {
        match outcome.lock().expect("fake outcome").clone() {
            FakeOutcome::Tokens(value) => Ok(value),
            FakeOutcome::Confirmation => Err(InfraError::Http("unexpected confirmation".to_string())),
            FakeOutcome::Rejected(message) => Err(InfraError::Auth(message)),
            FakeOutcome::Offline => Err(InfraError::Http("connection refused".to_string())),
        }
    }

    #[async_trait]
    impl AuthHttpClient for FakeAuthClient {
        async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.sign_up.lock().expect("fake outcome").clone();
            match outcome {
                FakeOutcome::Confirmation => Ok(SignUpResponse::ConfirmationSent(SessionUser {
                    id: "user-new".to_string(),
                    email: Some(request.credentials.email),
                })),
                FakeOutcome::Tokens(value) => Ok(SignUpResponse::Session(value)),
                FakeOutcome::Rejected(message) => Err(InfraError::Auth(message)),
                FakeOutcome::Offline => Err(InfraError::Http("connection refused".to_string())),
            }
        }

        async fn sign_in_with_password(
            &self,
            _credentials: PasswordCredentials,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            resolve(&self.sign_in)
        }

        async fn refresh_session(&self, _refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            resolve(&self.refresh)
        }

        async fn sign_out(&self, _access_token: &str) -> Result<(), InfraError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if self.sign_out_fails {
                return Err(InfraError::Http("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn provider(
        store: &Arc<InMemorySessionStore>,
        client: &Arc<FakeAuthClient>,
    ) -> IdentityProvider<InMemorySessionStore, FakeAuthClient> {
        IdentityProvider::new(AuthConfig::default(), Arc::clone(store), Arc::clone(client))
    }

    fn stored_session(expires_in_seconds: i64, refresh_token: Option<&str>) -> Session {
        Session {
            access_token: "stored-access".to_string(),
            refresh_token: refresh_token.map(ToOwned::to_owned),
            expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
            token_type: "bearer".to_string(),
            user: SessionUser {
                id: "user-1".to_string(),
                email: None,
            },
        }
    }

    #[tokio::test]
    async fn empty_credentials_short_circuit_before_any_request() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let identity = provider(&store, &client);

        assert!(matches!(identity.sign_in("  ", "secret").await, Err(InfraError::Validation(_))));
        assert!(matches!(identity.sign_up("ada@example.com", "").await, Err(InfraError::Validation(_))));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_in_persists_session_and_switches_policy_to_remote() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let identity = provider(&store, &client);
        assert_eq!(identity.backend(), Backend::Local);

        let mut subscription = identity.subscribe().await;
        assert_eq!(subscription.initial, None);

        let session = identity.sign_in("ada@example.com", "secret").await.expect("sign in");
        assert_eq!(session.owner_id(), "user-1");
        assert_eq!(store.load_session().expect("load"), Some(session.clone()));
        assert_eq!(
            identity.backend(),
            Backend::Remote(RemoteScope {
                owner_id: "user-1".to_string(),
                access_token: "access-1".to_string(),
            })
        );

        let event = subscription.next().await.expect("event");
        assert_eq!(event.kind, SessionEventKind::SignedIn);
        assert_eq!(event.session, Some(session));
    }

    #[tokio::test]
    async fn rejected_credentials_surface_service_message() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        *client.sign_in.lock().expect("fake outcome") = FakeOutcome::Rejected("Invalid login credentials".to_string());
        let identity = provider(&store, &client);

        match identity.sign_in("ada@example.com", "wrong").await {
            Err(InfraError::Auth(message)) => assert_eq!(message, "Invalid login credentials"),
            other => panic!("expected auth error, got {other:?}"),
        }
        assert_eq!(identity.current_session(), None);
    }

    #[tokio::test]
    async fn sign_up_without_auto_confirm_reports_confirmation() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let identity = provider(&store, &client);

        let outcome = identity.sign_up(" new@example.com ", "secret").await.expect("sign up");
        assert_eq!(
            outcome,
            SignUpOutcome::ConfirmationRequired {
                email: "new@example.com".to_string()
            }
        );
        assert_eq!(identity.backend(), Backend::Local);
    }

    #[tokio::test]
    async fn valid_stored_session_is_used_without_refresh() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(3600, Some("refresh"))).expect("save");
        let client = Arc::new(FakeAuthClient::default());
        let identity = provider(&store, &client);

        let session = identity.fetch_session().await.expect("session");
        assert_eq!(session.access_token, "stored-access");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_once_and_keeps_refresh_token() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-120, Some("refresh-old"))).expect("save");
        let client = Arc::new(FakeAuthClient::default());
        *client.refresh.lock().expect("fake outcome") = FakeOutcome::Tokens(AuthTokenResponse {
            refresh_token: None,
            ..tokens("access-refreshed")
        });
        let identity = provider(&store, &client);

        let subscription = identity.subscribe().await;
        let session = subscription.initial.clone().expect("refreshed session");
        assert_eq!(session.access_token, "access-refreshed");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-old"));
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn failed_refresh_leaves_session_empty_without_retry() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-120, Some("refresh-old"))).expect("save");
        let client = Arc::new(FakeAuthClient::default());
        *client.refresh.lock().expect("fake outcome") = FakeOutcome::Offline;
        let identity = provider(&store, &client);

        assert_eq!(identity.fetch_session().await, None);
        assert_eq!(identity.backend(), Backend::Local);
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(store.load_session().expect("load").is_some());
    }

    #[tokio::test]
    async fn rejected_refresh_discards_stored_session() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-120, Some("refresh-old"))).expect("save");
        let client = Arc::new(FakeAuthClient::default());
        *client.refresh.lock().expect("fake outcome") = FakeOutcome::Rejected("Invalid Refresh Token".to_string());
        let identity = provider(&store, &client);

        assert_eq!(identity.fetch_session().await, None);
        assert_eq!(store.load_session().expect("load"), None);
    }

    /// Refresh tokens are single use, as with rotation enabled on the service.
    #[derive(Debug, Default)]
    struct RotatingAuthClient {
        spent: Mutex<Vec<String>>,
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthHttpClient for RotatingAuthClient {
        async fn sign_up(&self, _request: SignUpRequest) -> Result<SignUpResponse, InfraError> {
            Err(InfraError::Http("sign up not expected".to_string()))
        }

        async fn sign_in_with_password(
            &self,
            _credentials: PasswordCredentials,
        ) -> Result<AuthTokenResponse, InfraError> {
            Err(InfraError::Http("sign in not expected".to_string()))
        }

        async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut spent = self.spent.lock().expect("spent tokens");
                if spent.iter().any(|token| token == refresh_token) {
                    return Err(InfraError::Auth("Invalid Refresh Token: Already Used".to_string()));
                }
                spent.push(refresh_token.to_string());
            }
            tokio::task::yield_now().await;
            Ok(AuthTokenResponse {
                refresh_token: Some("refresh-rotated".to_string()),
                ..tokens("access-new")
            })
        }

        async fn sign_out(&self, _access_token: &str) -> Result<(), InfraError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_refresh() {
        let store = Arc::new(InMemorySessionStore::default());
        store.save_session(&stored_session(-120, Some("refresh-old"))).expect("save");
        let client = Arc::new(RotatingAuthClient::default());
        let identity = IdentityProvider::new(AuthConfig::default(), Arc::clone(&store), Arc::clone(&client));

        let (subscription, fetched) = tokio::join!(identity.subscribe(), identity.fetch_session());

        let initial = subscription.initial.clone().expect("session from subscribe");
        let fetched = fetched.expect("session from fetch");
        assert_eq!(initial.access_token, "access-new");
        assert_eq!(fetched.access_token, "access-new");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(identity.current_session().map(|session| session.access_token), Some("access-new".to_string()));
        let stored = store.load_session().expect("load").expect("stored session");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-rotated"));
    }

    #[tokio::test]
    async fn sign_out_clears_locally_even_when_remote_logout_fails() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient {
            sign_out_fails: true,
            ..FakeAuthClient::default()
        });
        let identity = provider(&store, &client);
        identity.sign_in("ada@example.com", "secret").await.expect("sign in");
        let mut subscription = identity.subscribe().await;

        identity.sign_out().await.expect("sign out");
        assert_eq!(client.sign_out_calls.load(Ordering::SeqCst), 1);
        assert_eq!(identity.current_session(), None);
        assert_eq!(store.load_session().expect("load"), None);
        assert_eq!(identity.backend(), Backend::Local);

        let event = subscription.next().await.expect("event");
        assert_eq!(event.kind, SessionEventKind::SignedOut);
        assert_eq!(event.session, None);
    }
}
