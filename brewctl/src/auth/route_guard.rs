//! Route guard: path classification and login redirects.
//!
//! A static rule table, loaded once from configuration, classifies request
//! paths by longest matching prefix. The guard is pure - its only output is
//! a classification or a redirect response carrying the original path so the
//! user lands back where they started after logging in.

use axum::{
    http::Uri,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// What a path requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Public,
    RequiresAuth,
    AdminOnly,
}

/// A single protected-path rule. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedPathRule {
    pub prefix: String,
    pub class: RouteClass,
}

/// Longest-prefix path classifier.
pub struct RouteGuard {
    /// Rules sorted by descending prefix length so the first match wins.
    rules: Vec<ProtectedPathRule>,
    login_path: String,
}

impl RouteGuard {
    pub fn new(mut rules: Vec<ProtectedPathRule>, login_path: impl Into<String>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            rules,
            login_path: login_path.into(),
        }
    }

    /// Classify a request path against the rule table.
    ///
    /// A rule matches at path-segment boundaries only: `/submit` covers
    /// `/submit` and `/submit/beer`, not `/submitted`.
    pub fn classify(&self, path: &str) -> RouteClass {
        for rule in &self.rules {
            if let Some(rest) = path.strip_prefix(rule.prefix.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    return rule.class;
                }
            }
        }
        RouteClass::Public
    }

    /// Build the redirect-to-login response for an unauthenticated request,
    /// preserving the original path and query as `redirectTo`.
    pub fn redirect_to_login(&self, original: &Uri) -> Response {
        let return_path = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| original.path());
        let encoded: String = form_urlencoded::byte_serialize(return_path.as_bytes()).collect();
        Redirect::to(&format!("{}?redirectTo={}", self.login_path, encoded)).into_response()
    }
}
