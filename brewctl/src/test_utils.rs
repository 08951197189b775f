//! Shared test fixtures: mock identity provider, in-memory state builders.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::users::ResolvedIdentity,
    auth::{
        provider::{IdentityProvider, ProviderError, SessionTokens},
        route_guard::RouteGuard,
        session_bridge::SessionBridge,
    },
    config::{Config, SessionCookieConfig},
    db::token_store::{MemoryTokenStore, TokenStore},
    signing,
    storage::UploadGrantIssuer,
};

/// In-memory identity provider with switchable failure modes.
///
/// `set_unreachable` simulates a provider outage (connect failures,
/// timeouts); `set_reject_exchange` simulates the provider answering and
/// refusing (deleted subject, revoked account).
#[derive(Default)]
pub struct MockIdentityProvider {
    users: DashMap<String, (String, ResolvedIdentity)>,
    identities: DashMap<Uuid, ResolvedIdentity>,
    sessions: DashMap<String, ResolvedIdentity>,
    unreachable: AtomicBool,
    reject_exchange: AtomicBool,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user for password login (and for session exchange).
    pub fn register_user(&self, email: &str, password: &str, identity: ResolvedIdentity) {
        self.users
            .insert(email.to_string(), (password.to_string(), identity.clone()));
        self.register_identity(identity);
    }

    /// Register a subject for administrative session exchange only.
    pub fn register_identity(&self, identity: ResolvedIdentity) {
        self.identities.insert(identity.subject_id, identity);
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_reject_exchange(&self, value: bool) {
        self.reject_exchange.store(value, Ordering::SeqCst);
    }

    /// Drop all live sessions, simulating provider-side session expiry.
    pub fn expire_all_sessions(&self) {
        self.sessions.clear();
    }

    fn check_reachable(&self) -> Result<(), ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ProviderError::Unreachable("mock outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn mint_session(&self, identity: &ResolvedIdentity) -> SessionTokens {
        let tokens = SessionTokens {
            access_token: format!("mock-access-{}", Uuid::new_v4()),
            refresh_token: format!("mock-refresh-{}", Uuid::new_v4()),
        };
        self.sessions
            .insert(tokens.access_token.clone(), identity.clone());
        tokens
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn session_from_token(
        &self,
        access_token: &str,
    ) -> Result<Option<ResolvedIdentity>, ProviderError> {
        self.check_reachable()?;
        Ok(self.sessions.get(access_token).map(|s| s.value().clone()))
    }

    async fn admin_issue_session(
        &self,
        subject_id: Uuid,
    ) -> Result<SessionTokens, ProviderError> {
        self.check_reachable()?;
        if self.reject_exchange.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("exchange disabled".to_string()));
        }
        match self.identities.get(&subject_id) {
            Some(identity) => Ok(self.mint_session(&identity)),
            None => Err(ProviderError::Rejected(format!(
                "unknown subject {subject_id}"
            ))),
        }
    }

    async fn set_session(
        &self,
        tokens: &SessionTokens,
    ) -> Result<ResolvedIdentity, ProviderError> {
        self.check_reachable()?;
        self.sessions
            .get(&tokens.access_token)
            .map(|s| s.value().clone())
            .ok_or_else(|| ProviderError::Rejected("unknown session tokens".to_string()))
    }

    async fn password_sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(SessionTokens, ResolvedIdentity), ProviderError> {
        self.check_reachable()?;
        match self.users.get(email) {
            Some(entry) if entry.0 == password => {
                let identity = entry.1.clone();
                Ok((self.mint_session(&identity), identity))
            }
            _ => Err(ProviderError::Rejected(
                "invalid email or password".to_string(),
            )),
        }
    }
}

/// A standard-issue non-admin identity.
pub fn test_identity() -> ResolvedIdentity {
    ResolvedIdentity {
        subject_id: Uuid::new_v4(),
        email: "taster@example.com".to_string(),
        display_name: Some("Test Taster".to_string()),
        is_admin: false,
    }
}

pub fn admin_identity() -> ResolvedIdentity {
    ResolvedIdentity {
        subject_id: Uuid::new_v4(),
        email: "brewmaster@example.com".to_string(),
        display_name: Some("Brewmaster".to_string()),
        is_admin: true,
    }
}

pub fn test_session_cookie_config() -> SessionCookieConfig {
    SessionCookieConfig::default()
}

/// Everything a handler test needs: mock provider, memory store, and an
/// `AppState` wired the same way `Application::new` wires production.
pub struct TestHarness {
    pub provider: Arc<MockIdentityProvider>,
    pub store: Arc<MemoryTokenStore>,
    pub state: AppState,
}

impl TestHarness {
    pub fn new() -> Self {
        let config = test_config();
        let provider = Arc::new(MockIdentityProvider::new());
        let store = Arc::new(MemoryTokenStore::new());
        let provider_dyn: Arc<dyn IdentityProvider> = provider.clone();
        let store_dyn: Arc<dyn TokenStore> = store.clone();

        let secret = config.secret_key.clone().expect("test config has a secret");
        let bridge = Arc::new(SessionBridge::new(
            Arc::clone(&provider_dyn),
            Arc::clone(&store_dyn),
            secret,
            config.auth.session.clone(),
            config.auth.remember_ttl,
        ));
        let guard = Arc::new(RouteGuard::new(
            config.auth.protected_paths.clone(),
            config.auth.login_path.clone(),
        ));
        let grant_issuer =
            Arc::new(UploadGrantIssuer::new(&config.storage).expect("test storage config"));

        let state = AppState::builder()
            .config(config)
            .provider(provider_dyn)
            .token_store(store_dyn)
            .bridge(bridge)
            .guard(guard)
            .grant_issuer(grant_issuer)
            .build();

        Self {
            provider,
            store,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        crate::router(self.state.clone())
    }

    /// Log in through the mock provider and return a `Cookie` header value
    /// bearing the session token.
    pub async fn login_session_cookie(&self, email: &str, password: &str) -> String {
        let (tokens, _) = self
            .provider
            .password_sign_in(email, password)
            .await
            .expect("login should succeed");
        format!(
            "{}={}",
            self.state.config.auth.session.cookie_name, tokens.access_token
        )
    }

    /// Issue a remember token and return a `Cookie` header value bearing it.
    pub async fn remember_cookie(&self, subject_id: Uuid) -> String {
        let set_cookie = self
            .state
            .bridge
            .issue_remember_cookie(subject_id)
            .await
            .expect("issue remember token");
        set_cookie.split(';').next().unwrap().to_string()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.secret_key = Some(signing::generate_secret());
    config.storage.access_key_id = "AKIATEST".to_string();
    config.storage.secret_access_key = "test-secret".to_string();
    config
}
