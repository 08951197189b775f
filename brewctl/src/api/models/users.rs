//! API models for identities.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::SubjectId;

/// The identity resolved for one request.
///
/// Ephemeral: derived per-request by the session bridge from provider session
/// claims and never persisted by this service - the identity provider owns
/// the durable user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedIdentity {
    #[schema(value_type = Uuid)]
    pub subject_id: SubjectId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

/// Identity as returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdentityResponse {
    #[schema(value_type = Uuid)]
    pub id: SubjectId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

impl From<ResolvedIdentity> for IdentityResponse {
    fn from(identity: ResolvedIdentity) -> Self {
        Self {
            id: identity.subject_id,
            email: identity.email,
            display_name: identity.display_name,
            is_admin: identity.is_admin,
        }
    }
}
