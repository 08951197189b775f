//! Database repositories.
//!
//! - [`remember_tokens::PostgresTokenStore`]: durable remember-token registry

pub mod remember_tokens;

pub use remember_tokens::PostgresTokenStore;
