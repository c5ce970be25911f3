use anyhow::{Context, Result};
use std::{env, time::Duration};

pub const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_STORE_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// URL base del master.
    /// - En Docker: MASTER_URL=http://master:8080
    /// - Local: default http://localhost:8080
    pub master_url: String,
    pub api_key: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Intentos por llamada al almacenamiento antes de darlo por caído.
    pub store_max_attempts: u32,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("API_KEY").context("falta la variable de entorno API_KEY")?;

        Ok(Self {
            master_url: env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_key,
            batch_size: env_or("BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            poll_interval: Duration::from_millis(env_or("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            heartbeat_interval: Duration::from_secs(env_or(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            store_max_attempts: env_or("STORE_MAX_ATTEMPTS", DEFAULT_STORE_MAX_ATTEMPTS).max(1),
        })
    }
}
