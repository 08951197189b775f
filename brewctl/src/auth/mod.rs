//! Authentication core.
//!
//! This module implements the credential-continuity path of the platform:
//!
//! - [`token`]: remember-me token codec (signed, expiring, opaque cookie)
//! - [`provider`]: identity provider abstraction and HTTP client
//! - [`session_bridge`]: per-request identity resolution and token rotation
//! - [`route_guard`]: path policy and login redirects
//! - [`middleware`]: axum glue wiring the above into the router
//!
//! # Flow
//!
//! Every request passes through the session bridge. A live provider session
//! short-circuits; otherwise the bridge attempts a silent re-authentication
//! from the remember-me cookie: decode and verify, check the revocation
//! registry, exchange for a fresh provider session, rotate the token. All
//! failures degrade to anonymous.
//!
//! # Trust boundaries
//!
//! The remember token's HMAC proves we minted it; the token store decides
//! whether it is still live; the identity provider decides whether the
//! subject still exists. All three must agree before a request is
//! authenticated silently.

pub mod middleware;
pub mod provider;
pub mod route_guard;
pub mod session_bridge;
pub mod token;
