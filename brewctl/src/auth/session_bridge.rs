//! Session bridge: per-request identity resolution.
//!
//! The bridge is the orchestrator between three parties that disagree about
//! state: the stateless request (cookies only), the identity provider (owns
//! sessions), and the token store (owns revocation). Per request it runs a
//! strict sequence:
//!
//! 1. live provider session -> done, identity
//! 2. no/invalid remember cookie -> done, anonymous
//! 3. store says revoked or unknown -> done, anonymous, clear cookie
//! 4. exchange the remember token for a fresh provider session
//! 5. on success, rotate the token (single-use) and set fresh cookies
//!
//! Cookie writes are deferred: `resolve` returns `Set-Cookie` values and the
//! middleware applies them to the response actually sent. Every failure path
//! degrades to anonymous - trust failures never become response errors.
//!
//! Concurrent requests bearing the same remember token may both reach step 4;
//! the store's compare-and-revoke elects one rotation winner and the loser
//! keeps its fresh provider session without a replacement remember cookie.
//! Multiple live sessions per subject are acceptable.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, header::COOKIE};
use tracing::{debug, instrument, trace, warn};

use crate::{
    api::models::users::ResolvedIdentity,
    auth::{
        provider::{IdentityProvider, ProviderError, SessionTokens},
        token::{self, RememberToken},
    },
    config::SessionCookieConfig,
    db::{
        models::remember_tokens::RememberTokenRecord,
        token_store::{ConsumeOutcome, TokenStore},
    },
    errors::Error,
    types::{SubjectId, abbrev_uuid},
};

/// Outcome of one bridge run: the resolved identity (if any) and the
/// deferred `Set-Cookie` values to apply to the response.
#[derive(Debug, Default)]
pub struct Resolution {
    pub identity: Option<ResolvedIdentity>,
    pub cookies: Vec<String>,
}

impl Resolution {
    fn anonymous(cookies: Vec<String>) -> Self {
        Self {
            identity: None,
            cookies,
        }
    }
}

pub struct SessionBridge {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    secret: String,
    cookies: SessionCookieConfig,
    remember_ttl: Duration,
}

impl SessionBridge {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
        secret: String,
        cookies: SessionCookieConfig,
        remember_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            secret,
            cookies,
            remember_ttl,
        }
    }

    /// Resolve the identity for one request. Infallible by design: every
    /// failure degrades to anonymous.
    #[instrument(skip_all)]
    pub async fn resolve(&self, headers: &HeaderMap) -> Resolution {
        // 1. An existing live provider session wins outright.
        if let Some(access_token) = find_cookie(headers, &self.cookies.cookie_name) {
            match self.provider.session_from_token(&access_token).await {
                Ok(Some(identity)) => {
                    trace!(subject = %abbrev_uuid(&identity.subject_id), "live provider session");
                    return Resolution {
                        identity: Some(identity),
                        cookies: Vec::new(),
                    };
                }
                Ok(None) => trace!("session cookie present but not live"),
                Err(e) => warn!("session verification failed: {e}"),
            }
        }

        // 2. Fall back to the remember-me cookie.
        let Some(raw) = find_cookie(headers, &self.cookies.remember_cookie_name) else {
            return Resolution::anonymous(Vec::new());
        };

        let token = match token::decode(&raw, &self.secret) {
            Ok(token) => token,
            Err(e) => {
                debug!("remember cookie rejected: {e}");
                return Resolution::anonymous(vec![self.clear_cookie(&self.cookies.remember_cookie_name)]);
            }
        };

        self.exchange_remember_token(token).await
    }

    /// Steps 3-5: revocation check, session exchange, rotation.
    async fn exchange_remember_token(&self, token: RememberToken) -> Resolution {
        let clear = vec![self.clear_cookie(&self.cookies.remember_cookie_name)];

        // 3. The store is the authoritative override: a revoked or unknown id
        // never validates, however good the signature.
        match self.store.lookup(token.token_id).await {
            Ok(Some(record)) if record.is_live(chrono::Utc::now()) => {}
            Ok(_) => {
                debug!(token_id = %abbrev_uuid(&token.token_id), "remember token revoked or unknown");
                return Resolution::anonymous(clear);
            }
            Err(e) => {
                // Store outage: fail closed for this request, keep the cookie.
                warn!("token store lookup failed: {e}");
                return Resolution::anonymous(Vec::new());
            }
        }

        // 4. Exchange: administrative, non-password session mint. A provider
        // rejection invalidates the token; an outage does not.
        let tokens = match self.provider.admin_issue_session(token.subject_id).await {
            Ok(tokens) => tokens,
            Err(ProviderError::Unreachable(e)) => {
                warn!("session exchange unreachable, keeping remember token: {e}");
                return Resolution::anonymous(Vec::new());
            }
            Err(e) => {
                warn!(token_id = %abbrev_uuid(&token.token_id), "session exchange rejected: {e}");
                if let Err(e) = self.store.revoke(token.token_id).await {
                    warn!("failed to revoke rejected token: {e}");
                }
                return Resolution::anonymous(clear);
            }
        };

        let identity = match self.provider.set_session(&tokens).await {
            Ok(identity) => identity,
            Err(ProviderError::Unreachable(e)) => {
                warn!("session validation unreachable: {e}");
                return Resolution::anonymous(Vec::new());
            }
            Err(e) => {
                warn!("minted session rejected: {e}");
                if let Err(e) = self.store.revoke(token.token_id).await {
                    warn!("failed to revoke rejected token: {e}");
                }
                return Resolution::anonymous(clear);
            }
        };

        // 5. Rotate: single-use. The store elects exactly one winner among
        // concurrent bearers; losers keep their session but no new cookie.
        let mut cookies = Vec::new();
        match self.store.consume(token.token_id).await {
            Ok(ConsumeOutcome::Consumed { subject_id }) => {
                match self.issue_remember_cookie(subject_id).await {
                    Ok(cookie) => cookies.push(cookie),
                    Err(e) => warn!("failed to issue replacement remember token: {e}"),
                }
            }
            Ok(outcome) => {
                debug!(token_id = %abbrev_uuid(&token.token_id), ?outcome, "lost rotation race");
            }
            Err(e) => warn!("token rotation failed: {e}"),
        }

        cookies.extend(self.session_cookies(&tokens));
        Resolution {
            identity: Some(identity),
            cookies,
        }
    }

    /// Encode a fresh remember token, persist its record, and return the
    /// cookie to set. Used at login (with "remember me") and at rotation.
    pub async fn issue_remember_cookie(&self, subject_id: SubjectId) -> Result<String, Error> {
        let (token, value) =
            token::encode(subject_id, self.remember_ttl, &self.secret).map_err(|e| {
                Error::Internal {
                    operation: format!("encode remember token: {e}"),
                }
            })?;

        self.store
            .put(RememberTokenRecord::new(
                token.token_id,
                token.subject_id,
                token.expires_at,
            ))
            .await?;

        Ok(self.build_cookie(
            &self.cookies.remember_cookie_name,
            &value,
            Some(self.remember_ttl.as_secs()),
        ))
    }

    /// Session cookies for a freshly minted provider session.
    pub fn session_cookies(&self, tokens: &SessionTokens) -> Vec<String> {
        vec![
            self.build_cookie(&self.cookies.cookie_name, &tokens.access_token, None),
            self.build_cookie(
                &self.cookies.refresh_cookie_name,
                &tokens.refresh_token,
                None,
            ),
        ]
    }

    /// Clearing cookies for logout.
    pub fn clear_all_cookies(&self) -> Vec<String> {
        vec![
            self.clear_cookie(&self.cookies.cookie_name),
            self.clear_cookie(&self.cookies.refresh_cookie_name),
            self.clear_cookie(&self.cookies.remember_cookie_name),
        ]
    }

    /// Decode the remember token presented on a request, if any. Used by
    /// logout to find what to revoke; decode failures are simply `None`.
    pub fn presented_remember_token(&self, headers: &HeaderMap) -> Option<RememberToken> {
        let raw = find_cookie(headers, &self.cookies.remember_cookie_name)?;
        token::decode(&raw, &self.secret).ok()
    }

    fn build_cookie(&self, name: &str, value: &str, max_age: Option<u64>) -> String {
        let mut cookie = format!("{name}={value}; Path=/; HttpOnly");
        if self.cookies.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}", self.cookies.cookie_same_site));
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        cookie
    }

    fn clear_cookie(&self, name: &str) -> String {
        self.build_cookie(name, "", Some(0))
    }
}

/// Find a cookie value by name across all `Cookie` headers.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(cookie_str) = header.to_str() else {
            continue;
        };
        for cookie in cookie_str.split(';') {
            if let Some((cookie_name, value)) = cookie.trim().split_once('=') {
                if cookie_name == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
