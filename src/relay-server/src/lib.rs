//! Fetch relay server - single-hop HTTP forward proxy with CORS.
//!
//! This crate provides:
//! - A catch-all relay endpoint taking the target as the `url` query parameter
//! - Target validation against the relay policy (scheme, allowlist, private hosts)
//! - Header sanitization in both directions
//! - CORS preflight handling and CORS/security headers on relayed responses
//! - A bounded forward timeout and request body limit
//!
//! The policy lives in the `relay-policy` crate and is resolved once at
//! startup; this crate wires it into an axum server.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod cors;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod response;
pub mod state;
pub mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ServerConfig;
pub use error::{RelayError, RelayResult};
pub use executor::ProxyOutcome;
pub use state::AppState;
pub use upstream::{ReqwestUpstream, Upstream};

/// Run the server with the given configuration.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    run_with_shutdown(config, std::future::pending()).await
}

/// Run the server with graceful shutdown support.
pub async fn run_with_shutdown<F>(config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let policy = config.resolve_policy();
    info!(
        allowed_domains = ?policy.allowed_domains(),
        allowed_origins = ?policy.allowed_origins(),
        timeout_secs = policy.timeout().as_secs(),
        max_body_bytes = policy.max_body_bytes(),
        resolve_hosts = policy.resolve_hosts(),
        max_redirects = policy.max_redirects(),
        "Relay policy resolved"
    );

    let state = Arc::new(AppState::new(policy)?);
    let app = create_router_with_state(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Starting fetch relay on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    create_router_with_state(Arc::new(state))
}

/// Create the application router with an Arc-wrapped state.
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handlers::relay)
        .layer(axum::middleware::from_fn(middleware::timing_middleware))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
