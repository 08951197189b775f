//! Database entity models.

pub mod remember_tokens;
