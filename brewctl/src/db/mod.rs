//! Database layer.
//!
//! The only table this crate owns is the remember-token registry; everything
//! else (users, content, favorites) belongs to external systems. Access goes
//! through the [`token_store::TokenStore`] trait so the session bridge is
//! constructed against an explicit store rather than a process-wide handle.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod token_store;
