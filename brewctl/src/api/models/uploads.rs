//! API request/response models for upload grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::storage::UploadGrant;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    #[schema(value_type = String, format = "uri")]
    pub presigned_url: Url,
    #[schema(value_type = String, format = "uri")]
    pub public_url: Url,
    pub object_key: String,
    pub expires_at: DateTime<Utc>,
}

impl From<UploadGrant> for UploadUrlResponse {
    fn from(grant: UploadGrant) -> Self {
        Self {
            presigned_url: grant.signed_url,
            public_url: grant.public_url,
            object_key: grant.object_key,
            expires_at: grant.expires_at,
        }
    }
}
