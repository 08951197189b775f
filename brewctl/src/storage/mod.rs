//! Object-storage access issuance.
//!
//! The platform never proxies upload bytes and never hands out bucket
//! credentials. Instead, [`grant::UploadGrantIssuer`] mints presigned PUT
//! URLs ([`presign::StorageSigner`]) scoped to a single derived object key
//! and a short expiry window.

pub mod grant;
pub mod presign;

pub use grant::{UploadCategory, UploadGrant, UploadGrantIssuer};
