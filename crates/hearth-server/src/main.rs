//! # hearth-server
//!
//! HTTP/WebSocket backend for the Hearth chat application.
//!
//! This binary provides:
//! - **Cookie sessions** built on signed access/refresh tokens, with silent
//!   access-token renewal
//! - **Friend invites** with live notifications over a per-user WebSocket
//! - **Private and group chats** whose messages fan out to every connected tab
//! - **REST API** (axum) for credentials, friends and chats
//! - **Per-IP rate limiting** on the credential routes

mod api;
mod auth;
mod chats;
mod config;
mod connection;
mod error;
mod friends;
mod hub;
mod notify;
mod rate_limit;
mod session;
mod ws;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hearth_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hearth_server=debug")),
        )
        .init();

    info!("Starting Hearth server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let tokens = config.token_service();
    let http_addr = config.http_addr;

    let app_state = AppState::new(db, tokens, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Rate limiter cleanup (every 5 minutes, forget addresses idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rl.purge_idle(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Purged idle rate-limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
