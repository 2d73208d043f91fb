//! API server for First Process invitations
//!
//! Serves the session bridge, password, invitation and membership endpoints
//! over REST.

mod app;
mod config;
mod routes;
mod session;
mod state;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fp_api_server=debug,fp_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!("Using data directory: {:?}", config.data_dir);

    let bind_addr = config.bind_addr;
    let state = AppState::new(config).await?;
    let app = app::router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("REST API listening on {}", bind_addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
