//! Database models for remember-me tokens.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::SubjectId;

/// Database entity model.
///
/// The cookie's HMAC proves authenticity; this row is the revocation
/// authority. Once `revoked_at` is set, the token id never validates again
/// even while its signature and expiry remain good.
#[derive(Debug, Clone, FromRow)]
pub struct RememberTokenRecord {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RememberTokenRecord {
    /// Build a fresh, unrevoked record for a newly encoded token.
    pub fn new(id: Uuid, subject_id: SubjectId, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            subject_id,
            expires_at,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    /// Whether this record can still validate a presented token.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}
