//! Route protection middleware and identity extractors.
//!
//! The middleware runs the session bridge for every request, stores the
//! resolved identity in request extensions, enforces the route guard, and
//! applies the bridge's deferred cookie writes to the response actually sent.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::{
    AppState,
    api::models::users::ResolvedIdentity,
    auth::route_guard::RouteClass,
    errors::{Error, Result},
};

/// Middleware wrapping every route: resolves identity, enforces path policy,
/// applies deferred cookies.
pub async fn session_bridge_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolution = state.bridge.resolve(request.headers()).await;

    let class = state.guard.classify(request.uri().path());
    let authenticated = resolution.identity.is_some();
    let is_admin = resolution
        .identity
        .as_ref()
        .is_some_and(|identity| identity.is_admin);

    let mut response = match class {
        RouteClass::RequiresAuth | RouteClass::AdminOnly if !authenticated => {
            state.guard.redirect_to_login(request.uri())
        }
        RouteClass::AdminOnly if !is_admin => Error::InsufficientPermissions {
            resource: request.uri().path().to_string(),
        }
        .into_response(),
        _ => {
            if let Some(identity) = resolution.identity.clone() {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
    };

    // Deferred cookie writes land on whatever response is actually sent,
    // including redirects.
    for cookie in &resolution.cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("dropping unencodable cookie: {e}"),
        }
    }

    response
}

/// Extractor for handlers that require an authenticated caller.
pub struct CurrentIdentity(pub ResolvedIdentity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or(Error::Unauthenticated { message: None })
    }
}

/// Extractor for handlers that work with or without an identity.
pub struct MaybeIdentity(pub Option<ResolvedIdentity>);

impl FromRequestParts<AppState> for MaybeIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self> {
        Ok(MaybeIdentity(
            parts.extensions.get::<ResolvedIdentity>().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode, header};
    use axum_test::TestServer;
    use serde_json::json;

    use crate::{
        api::models::users::IdentityResponse,
        test_utils::{TestHarness, admin_identity, test_identity},
    };

    #[tokio::test]
    async fn test_guard_redirects_unauthenticated_page_request() {
        let harness = TestHarness::new();
        let server = TestServer::new(harness.router()).unwrap();

        let response = server.get("/mypage/favorites").await;
        response.assert_status(StatusCode::SEE_OTHER);

        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("/login?redirectTo="));
        assert!(location.contains("%2Fmypage%2Ffavorites"));
    }

    #[tokio::test]
    async fn test_guard_passes_public_paths_through() {
        let harness = TestHarness::new();
        let server = TestServer::new(harness.router()).unwrap();

        // No route is mounted for pages; pass-through means the router's 404,
        // not a redirect.
        let response = server.get("/breweries").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_guard_passes_authenticated_page_request() {
        let harness = TestHarness::new();
        harness
            .provider
            .register_user("taster@example.com", "pw", test_identity());
        let cookie = harness.login_session_cookie("taster@example.com", "pw").await;

        let server = TestServer::new(harness.router()).unwrap();
        let response = server
            .get("/mypage/favorites")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_path_forbidden_for_non_admin() {
        let harness = TestHarness::new();
        harness
            .provider
            .register_user("taster@example.com", "pw", test_identity());
        let cookie = harness.login_session_cookie("taster@example.com", "pw").await;

        let server = TestServer::new(harness.router()).unwrap();
        let response = server
            .get("/admin/moderation")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_path_passes_admin_through() {
        let harness = TestHarness::new();
        harness
            .provider
            .register_user("brewmaster@example.com", "pw", admin_identity());
        let cookie = harness
            .login_session_cookie("brewmaster@example.com", "pw")
            .await;

        let server = TestServer::new(harness.router()).unwrap();
        let response = server
            .get("/admin/moderation")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    /// The full continuity path: provider session gone, remember cookie
    /// silently re-establishes it and rotates on the response.
    #[tokio::test]
    async fn test_silent_reauth_after_provider_session_expiry() {
        let harness = TestHarness::new();
        let identity = test_identity();
        harness
            .provider
            .register_user("taster@example.com", "pw", identity.clone());

        let server = TestServer::new(harness.router()).unwrap();

        // Login with remember-me, capturing cookies
        let login = server
            .post("/api/auth/login")
            .json(&json!({
                "email": "taster@example.com",
                "password": "pw",
                "remember_me": true,
            }))
            .await;
        login.assert_status(StatusCode::OK);

        let cookie_pairs: Vec<String> = login
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string())
            .collect();
        let request_cookies = cookie_pairs.join("; ");

        // The provider forgets every session (expiry)
        harness.provider.expire_all_sessions();

        // The same cookies still authenticate - silently
        let response = server
            .get("/api/auth/me")
            .add_header(
                header::COOKIE,
                HeaderValue::from_str(&request_cookies).unwrap(),
            )
            .await;
        response.assert_status(StatusCode::OK);

        let body: IdentityResponse = response.json();
        assert_eq!(body.id, identity.subject_id);

        // The response carries a fresh session and a rotated remember token
        let refreshed: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(refreshed.iter().any(|c| c.starts_with("bh_session=")));
        let new_remember = refreshed
            .iter()
            .find(|c| c.starts_with("bh_remember=") && !c.contains("Max-Age=0"))
            .expect("rotated remember cookie");
        let old_remember = cookie_pairs
            .iter()
            .find(|c| c.starts_with("bh_remember="))
            .unwrap();
        assert_ne!(
            new_remember.split(';').next().unwrap(),
            old_remember.as_str()
        );
    }

    #[tokio::test]
    async fn test_anonymous_api_request_is_unauthorized_not_redirected() {
        let harness = TestHarness::new();
        let server = TestServer::new(harness.router()).unwrap();

        let response = server.get("/api/auth/me").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
