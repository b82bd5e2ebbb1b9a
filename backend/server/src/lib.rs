//! # Kindness Documentation
//!
//! Backend for sharing acts of kindness. Every act a signed-in user submits grows a
//! decoration on their personal tree.
//!
//!
//!
//! # General Infrastructure
//! - Upstream gateway authenticates users and forwards the numeric id in `x-user-id`
//! - Anonymous submissions are accepted but never decorate a tree
//! - State lives either in memory (single instance, development) or in Redis
//!
//!
//!
//! # Tree Rewards
//!
//! **Goal**: Every owned act carries exactly one auto-placed decoration, no matter how the
//! act arrived or how many requests race to read the tree.
//!
//! - Acts are decorated in creation order, the act number decides milestone rewards
//! - 5th act is a star, 10th a light, 15th a garland, 25th a snowflake
//! - Other acts draw from a pool that widens as the act count grows
//! - Tier levels follow act counts: up to 10, 25, 50, 100, then above
//! - Reads of the tree fill in missing decorations lazily, guarded per user
//!
//!
//!
//! # Notes
//!
//! ## Redis
//! Records are stored as JSON strings. Sorted sets scored by creation time keep the global
//! feed and each user's acts and decorations in order. Every write is one atomic pipeline.
//!
//!
//!
//! # Setup
//!
//! Environment variables, all optional.
//! ```sh
//! RUST_PORT=1111
//! STORE_BACKEND=memory # or redis
//! REDIS_URL=redis://127.0.0.1:6379
//! CORS_MAX_AGE_SECS=3600
//! RUST_LOG=kindness=debug
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::time::Duration;

use axum::http::{HeaderName, Method, header::CONTENT_TYPE};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod acts;
pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod models;
pub mod redis_store;
pub mod routes;
pub mod state;
pub mod tree;
pub mod utils;

use config::Config;
use error::StartupError;
use routes::{USER_HEADER, router};
use state::AppState;

pub async fn start_server() -> Result<(), StartupError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(USER_HEADER)])
        .max_age(Duration::from_secs(state.config.cors_max_age_secs));

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = router(state).layer(cors);

    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
