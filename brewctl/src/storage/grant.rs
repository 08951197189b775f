//! Upload grant issuance.
//!
//! Validates an upload request against policy, derives a collision-resistant
//! object key namespaced per category and subject, and presigns a time-boxed
//! PUT for exactly that key. Grants are never stored - they expire by
//! construction because the signature embeds the expiry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::{
    config::StorageConfig,
    errors::Error,
    storage::presign::StorageSigner,
    types::SubjectId,
};

/// Fixed allow-list of upload categories. The category is the first path
/// segment of every object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Beers,
    Breweries,
    Avatars,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Beers => "beers",
            UploadCategory::Breweries => "breweries",
            UploadCategory::Avatars => "avatars",
        }
    }
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beers" => Ok(UploadCategory::Beers),
            "breweries" => Ok(UploadCategory::Breweries),
            "avatars" => Ok(UploadCategory::Avatars),
            other => Err(Error::BadRequest {
                message: format!("unknown upload category '{other}'"),
            }),
        }
    }
}

/// A time-boxed, single-key upload authorization.
#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub object_key: String,
    pub signed_url: Url,
    pub public_url: Url,
    pub expires_at: DateTime<Utc>,
}

/// Issues upload grants against one bucket.
pub struct UploadGrantIssuer {
    signer: StorageSigner,
    public_base_url: String,
    url_expiry: std::time::Duration,
    cache_control: String,
}

/// Maximum length of the sanitized filename stem inside an object key.
const MAX_STEM_LEN: usize = 48;

impl UploadGrantIssuer {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let signer = StorageSigner::new(
            &config.endpoint,
            &config.region,
            &config.bucket,
            &config.access_key_id,
            &config.secret_access_key,
        )?;
        // Validate the public base URL at construction, not per request
        Url::parse(&config.public_base_url)?;

        Ok(Self {
            signer,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            url_expiry: config.url_expiry,
            cache_control: config.cache_control.clone(),
        })
    }

    /// Validate the request and issue a grant.
    ///
    /// The signed URL authorizes one PUT of one key within the expiry window;
    /// the cache-control header is part of the signature so the client cannot
    /// change cache policy.
    pub fn issue(
        &self,
        subject_id: SubjectId,
        filename: &str,
        content_type: &str,
        category: UploadCategory,
    ) -> Result<UploadGrant, Error> {
        let default_extension = validate_content_type(content_type)?;
        let object_key = derive_object_key(category, subject_id, filename, default_extension);

        let presigned = self
            .signer
            .presign_put(
                &object_key,
                self.url_expiry,
                &[
                    ("cache-control", self.cache_control.as_str()),
                    ("content-type", content_type),
                ],
            )
            .map_err(|e| Error::Internal {
                operation: format!("sign upload URL: {e}"),
            })?;

        let public_url = Url::parse(&format!("{}/{}", self.public_base_url, object_key))
            .map_err(|e| Error::Internal {
                operation: format!("build public URL: {e}"),
            })?;

        Ok(UploadGrant {
            object_key,
            signed_url: presigned.url,
            public_url,
            expires_at: presigned.expires_at,
        })
    }
}

/// Check the declared content type against the image allow-list and return
/// the canonical extension for it.
fn validate_content_type(content_type: &str) -> Result<&'static str, Error> {
    match content_type {
        "image/png" => Ok("png"),
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        "image/avif" => Ok("avif"),
        other => Err(Error::BadRequest {
            message: format!("unsupported content type '{other}' - expected an image"),
        }),
    }
}

/// Derive the object key:
/// `{category}/{subject}/{ms-timestamp}-{sanitized-stem}-{random}.{ext}`.
///
/// Timestamp plus random suffix give practical uniqueness without any
/// coordination; the per-subject segment namespaces users apart.
fn derive_object_key(
    category: UploadCategory,
    subject_id: SubjectId,
    filename: &str,
    default_extension: &str,
) -> String {
    let (stem, extension) = split_filename(filename);

    let mut sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized.truncate(MAX_STEM_LEN);
    if sanitized.is_empty() {
        sanitized.push_str("upload");
    }

    let extension = extension
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| default_extension.to_string());

    let timestamp = Utc::now().timestamp_millis();
    let suffix = random_suffix();

    format!("{category}/{subject_id}/{timestamp}-{sanitized}-{suffix}.{extension}")
}

fn split_filename(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (filename, None),
    }
}

/// Six hex characters of randomness.
fn random_suffix() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 3];
    rand::rng().fill_bytes(&mut bytes);
    crate::signing::hex_encode(&bytes)
}
