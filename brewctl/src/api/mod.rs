//! HTTP API surface.
//!
//! Handlers and their request/response models, plus the OpenAPI document
//! served at `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::uploads::create_upload_url,
    ),
    components(schemas(
        models::auth::LoginRequest,
        models::auth::AuthResponse,
        models::auth::AuthSuccessResponse,
        models::users::IdentityResponse,
        models::users::ResolvedIdentity,
        models::uploads::UploadUrlRequest,
        models::uploads::UploadUrlResponse,
    )),
    tags(
        (name = "authentication", description = "Session and remember-me management"),
        (name = "uploads", description = "Presigned upload grants"),
    )
)]
pub struct ApiDoc;
