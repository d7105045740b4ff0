//! # roost server
//!
//! Realtime presence and message-delivery server for buddy-list chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roost
//!
//! # Run with environment variables
//! ROOST_PORT=8080 ROOST_HOST=0.0.0.0 roost
//! ```
//!
//! Configuration is read from `roost.toml` if present (see [`config`]).

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use roost_core::{
    IdleMonitor, MessageDispatcher, PresenceFanout, RedeliveryCoordinator, SessionRegistry,
};
use roost_store::MemoryStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roost=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting roost server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Wire the core. Everything is constructed here and injected; the
    // registry is owned by this startup sequence, not a process-wide global.
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let redelivery = Arc::new(RedeliveryCoordinator::new(
        Arc::clone(&registry),
        store.clone(),
    ));
    let fanout = Arc::new(PresenceFanout::new(
        Arc::clone(&registry),
        store.clone(),
        store.clone(),
        redelivery,
    ));
    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&registry),
        store.clone(),
        store.clone(),
    ));

    // The idle sweep runs for the lifetime of the server and is stopped
    // deterministically after serve returns.
    let idle_monitor = IdleMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&fanout),
        config.idle_config(),
    );
    let idle_handle = idle_monitor.spawn();

    let state = Arc::new(handlers::AppState {
        registry,
        fanout,
        dispatcher,
        config,
    });

    handlers::run_server(state).await?;

    idle_handle.shutdown().await;
    tracing::info!("roost server stopped");

    Ok(())
}
