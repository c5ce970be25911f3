mod auth;
mod config;
mod error;
mod handlers;
mod internal;
mod monitor;
mod queue;
mod state;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::MasterConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let config = MasterConfig::from_env()?;
    let addr = config.addr.clone();
    let state = AppState::new(config);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de heartbeats en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::monitor_workers(monitor_state).await;
    });

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("señal de apagado recibida");
        })
        .await?;
    Ok(())
}
