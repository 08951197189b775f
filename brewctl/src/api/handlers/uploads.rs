use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::uploads::{UploadUrlRequest, UploadUrlResponse},
    auth::middleware::CurrentIdentity,
    errors::Error,
    storage::UploadCategory,
};

/// Issue a presigned upload URL
///
/// Grants the caller a time-boxed PUT of exactly one derived object key.
/// Upload bytes never pass through this service.
#[utoipa::path(
    post,
    path = "/api/uploads/sign",
    request_body = UploadUrlRequest,
    tag = "uploads",
    responses(
        (status = 200, description = "Upload grant issued", body = UploadUrlResponse),
        (status = 400, description = "Invalid content type or category"),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all, fields(category = %request.category))]
pub async fn create_upload_url(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(request): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, Error> {
    let category: UploadCategory = request.category.parse()?;

    let grant = state.grant_issuer.issue(
        identity.subject_id,
        &request.filename,
        &request.content_type,
        category,
    )?;

    Ok(Json(grant.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode, header};
    use axum_test::TestServer;
    use serde_json::json;

    use crate::{
        api::models::uploads::UploadUrlResponse,
        test_utils::{TestHarness, test_identity},
    };

    async fn authed_server(harness: &TestHarness) -> (TestServer, String) {
        let identity = test_identity();
        harness
            .provider
            .register_user("taster@example.com", "hops4life", identity.clone());
        let cookie = harness
            .login_session_cookie("taster@example.com", "hops4life")
            .await;
        (TestServer::new(harness.router()).unwrap(), cookie)
    }

    #[tokio::test]
    async fn test_upload_sign_requires_authentication() {
        let harness = TestHarness::new();
        let server = TestServer::new(harness.router()).unwrap();

        let response = server
            .post("/api/uploads/sign")
            .json(&json!({
                "filename": "pale-ale.png",
                "contentType": "image/png",
                "category": "beers",
            }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_sign_issues_grant() {
        let harness = TestHarness::new();
        let (server, cookie) = authed_server(&harness).await;

        let response = server
            .post("/api/uploads/sign")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .json(&json!({
                "filename": "My Beer!!.PNG",
                "contentType": "image/png",
                "category": "beers",
            }))
            .await;

        response.assert_status(StatusCode::OK);
        let body: UploadUrlResponse = response.json();
        assert!(body.object_key.starts_with("beers/"));
        assert!(body.object_key.ends_with(".png"));
        assert!(body.object_key.contains("My_Beer__"));
        assert!(body.presigned_url.as_str().contains("X-Amz-Signature="));
        assert!(body.public_url.as_str().ends_with(&body.object_key));
    }

    #[tokio::test]
    async fn test_upload_sign_rejects_svg() {
        let harness = TestHarness::new();
        let (server, cookie) = authed_server(&harness).await;

        let response = server
            .post("/api/uploads/sign")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .json(&json!({
                "filename": "logo.svg",
                "contentType": "image/svg+xml",
                "category": "beers",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("unsupported content type"));
    }

    #[tokio::test]
    async fn test_upload_sign_rejects_unknown_category() {
        let harness = TestHarness::new();
        let (server, cookie) = authed_server(&harness).await;

        let response = server
            .post("/api/uploads/sign")
            .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
            .json(&json!({
                "filename": "notes.png",
                "contentType": "image/png",
                "category": "documents",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("unknown upload category"));
    }
}
