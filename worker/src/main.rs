mod batch;
mod config;
mod processor;
mod reconcile;
mod remote;
mod source;
mod worker;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    worker::run(config).await
}
