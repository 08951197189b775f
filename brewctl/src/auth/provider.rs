//! Identity provider abstraction layer.
//!
//! The platform consumes an external identity provider; it never stores
//! passwords or user records itself. This module defines the
//! [`IdentityProvider`] trait the session bridge is built against, and the
//! production [`HttpIdentityProvider`] which talks to the provider's REST
//! surface with a service key and verifies session access tokens locally
//! (they are HS256 JWTs signed with a secret shared by the provider).

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{api::models::users::ResolvedIdentity, config::IdentityConfig, types::SubjectId};

/// Result type for identity provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur while talking to the identity provider.
///
/// The split between `Rejected` and `Unreachable` is load-bearing: the
/// session bridge revokes a remember token only when the provider answered
/// and said no, never when the provider could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered and refused (bad credentials, unknown subject,
    /// revoked account). The presented credential is genuinely invalid.
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// The provider could not be reached or did not answer in time.
    /// Treated as a transient outage, never as proof of invalidity.
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with something we could not interpret.
    #[error("identity provider response malformed: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Unreachable(err.to_string())
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

/// A session pair as minted by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Claims carried in the provider's access token JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: SubjectId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl From<SessionClaims> for ResolvedIdentity {
    fn from(claims: SessionClaims) -> Self {
        Self {
            subject_id: claims.sub,
            email: claims.email,
            display_name: claims.name,
            is_admin: claims.admin,
        }
    }
}

/// Abstract identity provider interface.
///
/// Implementors resolve live sessions, mint sessions administratively for the
/// remember-me exchange, and back the password login endpoint.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the identity behind an access token, if the session is live.
    ///
    /// `Ok(None)` means "no live session" (expired, forged, garbage) - an
    /// expected outcome, not an error.
    async fn session_from_token(&self, access_token: &str) -> Result<Option<ResolvedIdentity>>;

    /// Administratively mint a fresh session for a subject.
    ///
    /// This is the remember-me exchange: no password involved, authenticated
    /// by the service key. Idempotent per subject - a subject may hold
    /// several live sessions at once.
    async fn admin_issue_session(&self, subject_id: SubjectId) -> Result<SessionTokens>;

    /// Validate freshly minted tokens and resolve the identity they carry.
    async fn set_session(&self, tokens: &SessionTokens) -> Result<ResolvedIdentity>;

    /// Password login on behalf of the user.
    async fn password_sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(SessionTokens, ResolvedIdentity)>;
}

/// Production identity provider client.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: Url,
    service_key: String,
    jwt_secret: String,
}

#[derive(Serialize)]
struct PasswordGrantRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct AdminSessionRequest {
    user_id: SubjectId,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let base_url = Url::parse(&config.base_url)?;

        Ok(Self {
            http,
            base_url,
            service_key: config.service_key.clone(),
            jwt_secret: config.jwt_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Malformed(format!("bad endpoint path {path}: {e}")))
    }

    /// Verify an access token locally and extract its claims.
    ///
    /// Client-side failures (expired, bad signature, garbage) come back as
    /// `Ok(None)`; only key-level misconfiguration is an error.
    fn verify_access_token(&self, access_token: &str) -> Result<Option<SessionClaims>> {
        let key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::default();

        match decode::<SessionClaims>(access_token, &key, &validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature
                | jsonwebtoken::errors::ErrorKind::ExpiredSignature
                | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
                | jsonwebtoken::errors::ErrorKind::ImmatureSignature
                | jsonwebtoken::errors::ErrorKind::Base64(_)
                | jsonwebtoken::errors::ErrorKind::Json(_)
                | jsonwebtoken::errors::ErrorKind::Utf8(_)
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Ok(None),
                _ => Err(ProviderError::Malformed(format!("JWT verification: {e}"))),
            },
        }
    }

    async fn session_tokens_from_response(&self, response: reqwest::Response) -> Result<SessionTokens> {
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Unreachable(format!(
                "provider returned {status}"
            )));
        }

        Ok(response.json::<SessionTokens>().await?)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn session_from_token(&self, access_token: &str) -> Result<Option<ResolvedIdentity>> {
        Ok(self
            .verify_access_token(access_token)?
            .map(ResolvedIdentity::from))
    }

    async fn admin_issue_session(&self, subject_id: SubjectId) -> Result<SessionTokens> {
        let url = self.endpoint("admin/sessions")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.service_key)
            .json(&AdminSessionRequest {
                user_id: subject_id,
            })
            .send()
            .await?;

        self.session_tokens_from_response(response).await
    }

    async fn set_session(&self, tokens: &SessionTokens) -> Result<ResolvedIdentity> {
        match self.verify_access_token(&tokens.access_token)? {
            Some(claims) => Ok(claims.into()),
            None => Err(ProviderError::Rejected(
                "minted session tokens did not verify".to_string(),
            )),
        }
    }

    async fn password_sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(SessionTokens, ResolvedIdentity)> {
        let url = self.endpoint("token?grant_type=password")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.service_key)
            .json(&PasswordGrantRequest { email, password })
            .send()
            .await?;

        let tokens = self.session_tokens_from_response(response).await?;
        let identity = self.set_session(&tokens).await?;
        Ok((tokens, identity))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    use super::*;

    const JWT_SECRET: &str = "test-secret-key-for-provider-jwts";

    fn test_provider() -> HttpIdentityProvider {
        // Mirror main.rs: install the rustls crypto provider before building a
        // TLS client. Idempotent across tests sharing the process.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        HttpIdentityProvider::new(&IdentityConfig {
            base_url: "http://localhost:9999/".to_string(),
            service_key: "service-key".to_string(),
            jwt_secret: JWT_SECRET.to_string(),
            timeout: std::time::Duration::from_secs(1),
        })
        .unwrap()
    }

    fn make_access_token(subject: SubjectId, expires_in_secs: i64) -> String {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: subject,
            email: "taster@example.com".to_string(),
            name: Some("Taster".to_string()),
            admin: false,
            exp: (now + chrono::Duration::seconds(expires_in_secs)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_live_session_resolves() {
        let provider = test_provider();
        let subject = Uuid::new_v4();
        let token = make_access_token(subject, 3600);

        let identity = provider.session_from_token(&token).await.unwrap().unwrap();
        assert_eq!(identity.subject_id, subject);
        assert_eq!(identity.email, "taster@example.com");
        assert!(!identity.is_admin);
    }

    #[tokio::test]
    async fn test_expired_session_is_none() {
        let provider = test_provider();
        let token = make_access_token(Uuid::new_v4(), -3600);

        assert!(provider.session_from_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_session_is_none() {
        let provider = test_provider();

        for garbage in ["", "not.a.jwt", "too.many.parts.in.this.token"] {
            assert!(
                provider.session_from_token(garbage).await.unwrap().is_none(),
                "expected None for {garbage:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_wrong_signing_secret_is_none() {
        let provider = test_provider();
        let claims = SessionClaims {
            sub: Uuid::new_v4(),
            email: "x@example.com".to_string(),
            name: None,
            admin: false,
            exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
            iat: Utc::now().timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"a-different-secret"),
        )
        .unwrap();

        assert!(provider.session_from_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_session_rejects_invalid_tokens() {
        let provider = test_provider();
        let tokens = SessionTokens {
            access_token: "garbage".to_string(),
            refresh_token: "garbage".to_string(),
        };

        let err = provider.set_session(&tokens).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unreachable() {
        // Nothing listens on the test base_url port
        let provider = test_provider();
        let err = provider
            .admin_issue_session(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }
}
