//! API request/response models for authentication.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use super::users::IdentityResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Issue a long-lived remember-me token alongside the session.
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: IdentityResponse,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LogoutQuery {
    /// Revoke every remember-me token for the subject, not just the
    /// presented one.
    #[serde(default)]
    pub everywhere: bool,
}

/// Login response: JSON body plus the session/remember cookies.
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookies: Vec<String>,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        with_cookies(
            (StatusCode::OK, Json(self.auth_response)).into_response(),
            &self.cookies,
        )
    }
}

/// Logout response: JSON body plus clearing cookies.
pub struct LogoutResponse {
    pub auth_response: AuthSuccessResponse,
    pub cookies: Vec<String>,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        with_cookies(
            (StatusCode::OK, Json(self.auth_response)).into_response(),
            &self.cookies,
        )
    }
}

fn with_cookies(mut response: Response, cookies: &[String]) -> Response {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("dropping unencodable cookie: {e}"),
        }
    }
    response
}
