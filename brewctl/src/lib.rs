//! # brewctl: Session and Storage Core for the Brauhaus Platform
//!
//! `brewctl` is the credential-continuity and object-storage access-issuance
//! core of a brewery review platform. The content site itself (breweries,
//! beers, favorites, page rendering) lives elsewhere; this service owns the
//! two trust-boundary problems that need careful engineering:
//!
//! 1. **Remember-me continuity.** The identity provider's sessions are short
//!    lived. A signed, single-use, revocable remember-me token lets the
//!    middleware silently re-establish a session after provider expiry,
//!    without ever re-prompting for a password and without the token being
//!    replayable once used.
//! 2. **Upload grants.** Clients upload images directly to object storage.
//!    Rather than proxying bytes or sharing bucket credentials, the service
//!    mints presigned PUT URLs scoped to exactly one derived object key with
//!    a short expiry and a signed cache policy.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for
//! the HTTP layer and uses PostgreSQL for the one piece of state this
//! service owns: the remember-token revocation registry.
//!
//! ### Request Flow
//!
//! Every request passes through the session bridge middleware
//! ([`auth::middleware`]). The bridge ([`auth::session_bridge`]) asks the
//! identity provider for a live session first; failing that it attempts the
//! remember-me path: decode and verify the cookie ([`auth::token`]), check
//! the revocation registry ([`db::token_store`]), exchange the token for a
//! fresh provider session ([`auth::provider`]), and rotate the token so it
//! is never accepted twice. The route guard ([`auth::route_guard`]) then
//! applies path policy with the resolved identity: protected pages redirect
//! to login with the original path preserved, API handlers reject with 401
//! through the [`auth::middleware::CurrentIdentity`] extractor.
//!
//! Every trust failure along the way degrades to an anonymous request;
//! authentication never crashes the pipeline.
//!
//! ### Upload Grants
//!
//! The upload endpoint validates the declared content type and category,
//! derives a namespaced object key, and signs a time-boxed PUT
//! ([`storage`]). The signature covers the key, the method, the expiry and
//! the cache-control header, so the grant authorizes exactly one upload and
//! nothing else.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use brewctl::{Application, Config, telemetry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = brewctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod signing;
pub mod storage;
pub mod telemetry;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;

use crate::{
    auth::{
        middleware::session_bridge_middleware,
        provider::{HttpIdentityProvider, IdentityProvider},
        route_guard::RouteGuard,
        session_bridge::SessionBridge,
    },
    db::{handlers::PostgresTokenStore, token_store::TokenStore},
    storage::UploadGrantIssuer,
};

pub use config::Config;
pub use types::{SubjectId, TokenId};

/// Application state shared across all request handlers.
///
/// Collaborators are injected explicitly at construction - there is no
/// process-wide lazily initialized client anywhere in this crate.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub provider: Arc<dyn IdentityProvider>,
    pub token_store: Arc<dyn TokenStore>,
    pub bridge: Arc<SessionBridge>,
    pub guard: Arc<RouteGuard>,
    pub grant_issuer: Arc<UploadGrantIssuer>,
}

/// Get the brewctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Build the service router.
///
/// The session bridge middleware is attached with `layer`, so it also runs
/// for unmatched paths - the route guard must see page requests the API
/// router has no routes for.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(api::handlers::auth::login))
        .route("/api/auth/logout", post(api::handlers::auth::logout))
        .route("/api/auth/me", get(api::handlers::auth::me))
        .route(
            "/api/uploads/sign",
            post(api::handlers::uploads::create_upload_url),
        )
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/health", get(health))
        .layer(from_fn_with_state(
            state.clone(),
            session_bridge_middleware,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(api::ApiDoc::openapi())
}

/// The assembled application, ready to serve.
pub struct Application {
    state: AppState,
}

impl Application {
    /// Connect to the database, run migrations, and wire every component.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.check()?;
        let secret = config
            .secret_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("secret_key is required to sign remember tokens"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool.max_connections)
            .min_connections(config.database.pool.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.pool.acquire_timeout_secs))
            .connect(&config.database.url)
            .await?;
        migrator().run(&pool).await?;

        let token_store: Arc<dyn TokenStore> = Arc::new(PostgresTokenStore::new(pool));
        let provider: Arc<dyn IdentityProvider> =
            Arc::new(HttpIdentityProvider::new(&config.identity)?);

        let bridge = Arc::new(SessionBridge::new(
            Arc::clone(&provider),
            Arc::clone(&token_store),
            secret,
            config.auth.session.clone(),
            config.auth.remember_ttl,
        ));
        let guard = Arc::new(RouteGuard::new(
            config.auth.protected_paths.clone(),
            config.auth.login_path.clone(),
        ));
        let grant_issuer = Arc::new(UploadGrantIssuer::new(&config.storage)?);

        let state = AppState::builder()
            .config(config)
            .provider(provider)
            .token_store(token_store)
            .bridge(bridge)
            .guard(guard)
            .grant_issuer(grant_issuer)
            .build();

        Ok(Self { state })
    }

    /// Serve until the shutdown future resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("brewctl listening on {addr}");

        // Hourly sweep of expired remember-token rows. Revocation correctness
        // never depends on this; it only bounds table growth.
        let store = Arc::clone(&self.state.token_store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
            loop {
                interval.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!("purged {purged} expired remember tokens"),
                    Err(e) => tracing::warn!("remember-token purge failed: {e}"),
                }
            }
        });

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;

        telemetry::shutdown_telemetry();
        Ok(())
    }
}
