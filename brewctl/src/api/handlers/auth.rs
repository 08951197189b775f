use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use tracing::warn;

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, LoginRequest, LoginResponse, LogoutQuery,
            LogoutResponse,
        },
        users::IdentityResponse,
    },
    auth::{middleware::CurrentIdentity, middleware::MaybeIdentity, provider::ProviderError},
    db::token_store::TokenStore,
    errors::Error,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<LoginResponse, Error> {
    // Password verification is the identity provider's job; we only broker
    // the session and (optionally) a remember-me token.
    let (tokens, identity) = state
        .provider
        .password_sign_in(&request.email, &request.password)
        .await
        .map_err(|e| match e {
            ProviderError::Rejected(_) => Error::Unauthenticated {
                message: Some("Invalid email or password".to_string()),
            },
            other => Error::Internal {
                operation: format!("sign in with identity provider: {other}"),
            },
        })?;

    let mut cookies = state.bridge.session_cookies(&tokens);
    if request.remember_me {
        match state.bridge.issue_remember_cookie(identity.subject_id).await {
            Ok(cookie) => cookies.push(cookie),
            // A failed remember-token issue degrades the login, not fails it
            Err(e) => warn!("could not issue remember token at login: {e}"),
        }
    }

    Ok(LoginResponse {
        auth_response: AuthResponse {
            user: identity.into(),
            message: "Login successful".to_string(),
        },
        cookies,
    })
}

/// Logout: revoke the presented remember token (or all of the subject's
/// tokens with `?everywhere=true`) and clear every auth cookie.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "authentication",
    params(
        ("everywhere" = Option<bool>, Query, description = "Revoke all remember tokens for the subject"),
    ),
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    Query(query): Query<LogoutQuery>,
    MaybeIdentity(identity): MaybeIdentity,
    headers: HeaderMap,
) -> Result<LogoutResponse, Error> {
    match state.bridge.presented_remember_token(&headers) {
        Some(token) if query.everywhere => {
            state
                .token_store
                .revoke_all_for_subject(token.subject_id)
                .await?;
        }
        Some(token) => {
            state.token_store.revoke(token.token_id).await?;
        }
        None if query.everywhere => {
            // No remember cookie on this client, but the session identity
            // still tells us whose tokens to sweep.
            if let Some(identity) = identity {
                state
                    .token_store
                    .revoke_all_for_subject(identity.subject_id)
                    .await?;
            }
        }
        None => {}
    }

    Ok(LogoutResponse {
        auth_response: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookies: state.bridge.clear_all_cookies(),
    })
}

/// Current identity
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "authentication",
    responses(
        (status = 200, description = "Current identity", body = IdentityResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn me(CurrentIdentity(identity): CurrentIdentity) -> Json<IdentityResponse> {
    Json(identity.into())
}
