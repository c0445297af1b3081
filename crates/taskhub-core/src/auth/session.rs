//! Session lifecycle: derives the current session from the stored token.
//!
//! The manager owns the token slot and the derived [`SessionState`]. The
//! state is published on a `tokio::sync::watch` channel so front ends can
//! observe transitions without polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::codec::{self, DecodeError};
use super::identity::{Authenticator, IdentityClient};
use super::store::TokenStore;
use crate::api::ApiError;
use crate::models::{Role, User};

/// Reasons a stored token does not yield a session.
/// All of them end the session the same way; the variant is only logged.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid token: {0}")]
    Decode(#[from] DecodeError),

    #[error("Token expired at {exp}")]
    Expired { exp: i64 },

    #[error("Identity lookup failed: {0}")]
    IdentityFetch(#[from] ApiError),
}

/// An authenticated user together with the role their token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Profile from the user service, with `role` taken from the token
    pub identity: User,
    pub role: Role,
    /// Token expiry, seconds since the Unix epoch
    pub expires_at: i64,
}

impl Session {
    fn new(mut identity: User, claims: &codec::Claims) -> Self {
        identity.role = claims.role;
        Self {
            identity,
            role: claims.role,
            expires_at: claims.exp,
        }
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::TeamLeader
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Loading,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&User> {
        self.session().map(|s| &s.identity)
    }

    pub fn role(&self) -> Option<Role> {
        self.session().map(|s| s.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.session().map(Session::is_admin).unwrap_or(false)
    }

    pub fn is_leader(&self) -> bool {
        self.session().map(Session::is_leader).unwrap_or(false)
    }

    /// True until the first validation run settles
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionState::Uninitialized | SessionState::Loading)
    }
}

/// Owns the bearer token and the session derived from it.
///
/// Every `init`, `login` and `logout` starts a new generation. A validation
/// run only publishes its outcome while its generation is still the latest,
/// so results land in last-assignment-wins order even though in-flight
/// identity lookups are never cancelled.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    identity: Arc<dyn IdentityClient>,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, identity: Arc<dyn IdentityClient>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            store,
            identity,
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current session state
    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Bearer token for outgoing requests, only while authenticated
    pub fn token(&self) -> Option<String> {
        if self.state.borrow().is_authenticated() {
            self.store.get()
        } else {
            None
        }
    }

    /// Derive the session from whatever token is already stored.
    /// Called once at application startup.
    pub async fn init(&self) {
        let generation = self.begin(None);
        debug!(generation, "Initializing session from stored token");
        self.validate(generation).await;
    }

    /// Store a freshly issued token and derive the session from it.
    /// A token that fails validation leaves the session anonymous.
    pub async fn login(&self, token: &str) {
        let generation = self.begin(Some(token));
        debug!(generation, "Validating new token");
        self.validate(generation).await;
    }

    /// Exchange credentials for a token, then [`login`](Self::login) with it.
    ///
    /// Errors from the login endpoint itself (wrong password, inactive
    /// account) are returned to the caller; the session is left untouched.
    pub async fn sign_in(
        &self,
        authenticator: &dyn Authenticator,
        username: &str,
        password: &str,
    ) -> Result<SessionState, ApiError> {
        let token = authenticator.authenticate(username, password).await?;
        self.login(&token).await;
        Ok(self.current())
    }

    /// Forget the token and the identity. Repeated calls are no-ops.
    pub fn logout(&self) {
        let changed = self.state.send_if_modified(|state| {
            self.generation.fetch_add(1, Ordering::Relaxed);
            self.store.clear();
            if *state == SessionState::Anonymous {
                false
            } else {
                *state = SessionState::Anonymous;
                true
            }
        });
        if changed {
            info!("Logged out");
        }
    }

    /// Detach from the session at application shutdown.
    /// Pending validation runs are discarded; the stored token is kept.
    pub fn teardown(&self) {
        self.state.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::Relaxed);
            *state = SessionState::Uninitialized;
        });
        debug!("Session manager torn down");
    }

    /// Start a new generation, storing `token` under the same lock so a
    /// superseded run can never clear it.
    fn begin(&self, token: Option<&str>) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(token) = token {
                self.store.set(token);
            }
            *state = SessionState::Loading;
        });
        generation
    }

    async fn validate(&self, generation: u64) {
        let outcome = match self.store.get() {
            Some(token) => Some(self.resolve(&token).await),
            None => None,
        };

        let mut applied = false;
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::Relaxed) != generation {
                return false;
            }
            applied = true;
            *state = match &outcome {
                Some(Ok(session)) => SessionState::Authenticated(session.clone()),
                Some(Err(_)) => {
                    self.store.clear();
                    SessionState::Anonymous
                }
                None => SessionState::Anonymous,
            };
            true
        });

        if !applied {
            debug!(generation, "Discarding superseded session result");
            return;
        }
        match outcome {
            Some(Ok(session)) => {
                info!(username = %session.username(), role = %session.role, "Session authenticated");
            }
            Some(Err(e)) => warn!(error = %e, "Session invalidated, logging out"),
            None => debug!("No stored token, session is anonymous"),
        }
    }

    async fn resolve(&self, token: &str) -> Result<Session, SessionError> {
        let claims = codec::decode(token)?;
        if codec::is_expired(&claims) {
            return Err(SessionError::Expired { exp: claims.exp });
        }
        let identity = self.identity.fetch_self(token).await?;
        Ok(Session::new(identity, &claims))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::auth::codec::encode_unsigned;
    use crate::auth::MemoryTokenStore;

    fn user(username: &str) -> User {
        User {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: username.to_string(),
            last_name: "Tester".to_string(),
            role: Role::Member,
            active: true,
        }
    }

    fn token(sub: &str, role: &str, exp: i64) -> String {
        encode_unsigned(&json!({"sub": sub, "role": role, "exp": exp}))
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    /// Pauses the first lookup until released
    #[derive(Default)]
    struct Gate {
        started: Notify,
        release: Notify,
    }

    #[derive(Default)]
    struct FakeIdentity {
        users: HashMap<String, User>,
        calls: AtomicUsize,
        gate: Option<Arc<Gate>>,
    }

    impl FakeIdentity {
        fn with(token: &str, user: User) -> Self {
            let mut fake = Self::default();
            fake.users.insert(token.to_string(), user);
            fake
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn fetch_self(&self, token: &str) -> Result<User, ApiError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let (0, Some(gate)) = (call, &self.gate) {
                gate.started.notify_one();
                gate.release.notified().await;
            }
            self.users
                .get(token)
                .cloned()
                .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
        }
    }

    struct FakeAuthenticator {
        token: Option<String>,
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<String, ApiError> {
            self.token.clone().ok_or(ApiError::Unauthorized)
        }
    }

    fn manager(store: Arc<MemoryTokenStore>, identity: Arc<FakeIdentity>) -> SessionManager {
        SessionManager::new(store, identity)
    }

    #[tokio::test]
    async fn test_init_without_token_is_anonymous() {
        let store = Arc::new(MemoryTokenStore::new());
        let identity = Arc::new(FakeIdentity::default());
        let manager = manager(store, identity.clone());

        assert_eq!(manager.current(), SessionState::Uninitialized);
        assert!(manager.current().is_pending());
        manager.init().await;
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn test_init_with_valid_stored_token() {
        let admin = token("alice", "admin", future_exp());
        let store = Arc::new(MemoryTokenStore::with_token(admin.clone()));
        let identity = Arc::new(FakeIdentity::with(&admin, user("alice")));
        let manager = manager(store, identity);

        manager.init().await;
        let state = manager.current();
        assert!(state.is_authenticated());
        assert_eq!(state.identity().map(|u| u.username.as_str()), Some("alice"));
        assert_eq!(manager.token(), Some(admin));
    }

    #[tokio::test]
    async fn test_login_admin_token() {
        let admin = token("alice", "admin", future_exp());
        let store = Arc::new(MemoryTokenStore::new());
        let identity = Arc::new(FakeIdentity::with(&admin, user("alice")));
        let manager = manager(store.clone(), identity.clone());

        manager.login(&admin).await;
        let state = manager.current();
        assert!(state.is_authenticated());
        assert!(state.is_admin());
        assert!(!state.is_leader());
        assert_eq!(state.role(), Some(Role::Admin));
        // Token role wins over the profile's role
        assert_eq!(state.identity().map(|u| u.role), Some(Role::Admin));
        assert_eq!(store.get(), Some(admin));
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test]
    async fn test_role_predicates_follow_token_role() {
        for (role, admin, leader) in [
            ("admin", true, false),
            ("team_leader", false, true),
            ("member", false, false),
        ] {
            let t = token("bob", role, future_exp());
            let identity = Arc::new(FakeIdentity::with(&t, user("bob")));
            let manager = manager(Arc::new(MemoryTokenStore::new()), identity);
            manager.login(&t).await;
            let state = manager.current();
            assert_eq!(state.role().map(|r| r.as_str()), Some(role));
            assert_eq!(state.is_admin(), admin, "is_admin for {}", role);
            assert_eq!(state.is_leader(), leader, "is_leader for {}", role);
        }
    }

    #[tokio::test]
    async fn test_login_with_undecodable_token_clears_store() {
        for bad in ["", "garbage", "a.b", "a.@@@.c", "a.b.c.d"] {
            let store = Arc::new(MemoryTokenStore::new());
            let identity = Arc::new(FakeIdentity::default());
            let manager = manager(store.clone(), identity.clone());

            manager.login(bad).await;
            assert_eq!(manager.current(), SessionState::Anonymous, "token {:?}", bad);
            assert_eq!(store.get(), None);
            assert_eq!(identity.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_login_with_expired_token_skips_fetch() {
        let expired = token("carol", "member", Utc::now().timestamp() - 60);
        let store = Arc::new(MemoryTokenStore::new());
        let identity = Arc::new(FakeIdentity::with(&expired, user("carol")));
        let manager = manager(store.clone(), identity.clone());

        manager.login(&expired).await;
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(store.get(), None);
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_with_token_expiring_now_is_rejected() {
        let expiring = token("carol", "member", Utc::now().timestamp());
        let store = Arc::new(MemoryTokenStore::new());
        let identity = Arc::new(FakeIdentity::with(&expiring, user("carol")));
        let manager = manager(store.clone(), identity.clone());

        manager.login(&expiring).await;
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn test_identity_not_found_logs_out() {
        let valid = token("dave", "member", future_exp());
        let store = Arc::new(MemoryTokenStore::with_token(valid.clone()));
        let identity = Arc::new(FakeIdentity::default());
        let manager = manager(store.clone(), identity.clone());

        manager.init().await;
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(store.get(), None);
        assert_eq!(identity.calls(), 1);
        assert_eq!(manager.token(), None);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let t = token("erin", "team_leader", future_exp());
        let store = Arc::new(MemoryTokenStore::new());
        let identity = Arc::new(FakeIdentity::with(&t, user("erin")));
        let manager = manager(store.clone(), identity);
        manager.login(&t).await;
        assert!(manager.current().is_authenticated());

        let mut rx = manager.subscribe();
        rx.borrow_and_update();

        manager.logout();
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(store.get(), None);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        manager.logout();
        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(store.get(), None);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_logout_wins_over_pending_login() {
        let t = token("frank", "admin", future_exp());
        let gate = Arc::new(Gate::default());
        let mut fake = FakeIdentity::with(&t, user("frank"));
        fake.gate = Some(gate.clone());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = Arc::new(manager(store.clone(), Arc::new(fake)));

        let pending = {
            let manager = manager.clone();
            let t = t.clone();
            tokio::spawn(async move { manager.login(&t).await })
        };

        gate.started.notified().await;
        assert_eq!(manager.current(), SessionState::Loading);
        manager.logout();
        gate.release.notify_one();
        pending.await.unwrap();

        assert_eq!(manager.current(), SessionState::Anonymous);
        assert_eq!(store.get(), None);
    }

    #[tokio::test]
    async fn test_later_login_wins_over_slower_earlier_login() {
        let first = token("grace", "member", future_exp());
        let second = token("heidi", "team_leader", future_exp());
        let gate = Arc::new(Gate::default());
        let mut fake = FakeIdentity::with(&first, user("grace"));
        fake.users.insert(second.clone(), user("heidi"));
        fake.gate = Some(gate.clone());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = Arc::new(manager(store.clone(), Arc::new(fake)));

        let pending = {
            let manager = manager.clone();
            let first = first.clone();
            tokio::spawn(async move { manager.login(&first).await })
        };

        gate.started.notified().await;
        manager.login(&second).await;
        gate.release.notify_one();
        pending.await.unwrap();

        let state = manager.current();
        assert_eq!(state.identity().map(|u| u.username.as_str()), Some("heidi"));
        assert!(state.is_leader());
        assert_eq!(store.get(), Some(second));
    }

    /// Holds `set` for one token open until the test resumes it
    struct PausingStore {
        inner: MemoryTokenStore,
        pause_on: String,
        written: Mutex<Option<mpsc::Sender<()>>>,
        resume: Mutex<mpsc::Receiver<()>>,
    }

    impl TokenStore for PausingStore {
        fn get(&self) -> Option<String> {
            self.inner.get()
        }

        fn set(&self, token: &str) {
            self.inner.set(token);
            if token == self.pause_on {
                if let Some(written) = self.written.lock().unwrap().take() {
                    written.send(()).unwrap();
                    self.resume.lock().unwrap().recv().unwrap();
                }
            }
        }

        fn clear(&self) {
            self.inner.clear()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_earlier_login_does_not_clear_later_token() {
        let first = token("grace", "member", future_exp());
        let second = token("heidi", "team_leader", future_exp());
        let gate = Arc::new(Gate::default());
        // `first` has no profile, so its lookup fails once released
        let mut fake = FakeIdentity::with(&second, user("heidi"));
        fake.gate = Some(gate.clone());

        let (written_tx, written_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let store = Arc::new(PausingStore {
            inner: MemoryTokenStore::new(),
            pause_on: second.clone(),
            written: Mutex::new(Some(written_tx)),
            resume: Mutex::new(resume_rx),
        });
        let manager = Arc::new(SessionManager::new(store.clone(), Arc::new(fake)));

        let pending = {
            let manager = manager.clone();
            let first = first.clone();
            tokio::spawn(async move { manager.login(&first).await })
        };
        gate.started.notified().await;

        let later = {
            let manager = manager.clone();
            let second = second.clone();
            std::thread::spawn(move || {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(manager.login(&second))
            })
        };

        tokio::task::spawn_blocking(move || written_rx.recv().unwrap())
            .await
            .unwrap();
        gate.release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        resume_tx.send(()).unwrap();

        later.join().unwrap();
        pending.await.unwrap();

        let state = manager.current();
        assert_eq!(state.identity().map(|u| u.username.as_str()), Some("heidi"));
        assert_eq!(store.get(), Some(second));
    }

    #[tokio::test]
    async fn test_sign_in_success_and_rejection() {
        let t = token("ivan", "member", future_exp());
        let identity = Arc::new(FakeIdentity::with(&t, user("ivan")));
        let manager = manager(Arc::new(MemoryTokenStore::new()), identity);

        let rejected = FakeAuthenticator { token: None };
        let err = manager.sign_in(&rejected, "ivan", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(manager.current(), SessionState::Uninitialized);

        let accepted = FakeAuthenticator { token: Some(t) };
        let state = manager.sign_in(&accepted, "ivan", "secret").await.unwrap();
        assert!(state.is_authenticated());
        assert!(!state.is_admin());
        assert!(!state.is_leader());
    }

    #[tokio::test]
    async fn test_teardown_discards_pending_result() {
        let t = token("judy", "admin", future_exp());
        let gate = Arc::new(Gate::default());
        let mut fake = FakeIdentity::with(&t, user("judy"));
        fake.gate = Some(gate.clone());
        let store = Arc::new(MemoryTokenStore::with_token(t.clone()));
        let manager = Arc::new(manager(store.clone(), Arc::new(fake)));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.init().await })
        };

        gate.started.notified().await;
        manager.teardown();
        gate.release.notify_one();
        pending.await.unwrap();

        assert_eq!(manager.current(), SessionState::Uninitialized);
        assert_eq!(store.get(), Some(t));
    }
}
