use anyhow::{Context, Result};
use std::{env, path::PathBuf, time::Duration};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_WORKER_DEAD_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub addr: String,
    pub api_key: String,
    /// Directorio donde se guardan los archivos subidos.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Sin heartbeat durante este tiempo, el worker se da por muerto.
    pub worker_dead_timeout: Duration,
    /// Entregas de un mismo mensaje antes de marcar la tarea FAILED.
    pub max_delivery_attempts: u32,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("API_KEY").context("falta la variable de entorno API_KEY")?;

        Ok(Self {
            addr: env::var("MASTER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            api_key,
            upload_dir: PathBuf::from(
                env::var("UPLOAD_DIR").unwrap_or_else(|_| "/data/uploads".to_string()),
            ),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            worker_dead_timeout: Duration::from_secs(env_or(
                "WORKER_DEAD_TIMEOUT_SECS",
                DEFAULT_WORKER_DEAD_TIMEOUT_SECS,
            )),
            max_delivery_attempts: env_or("MAX_DELIVERY_ATTEMPTS", DEFAULT_MAX_DELIVERY_ATTEMPTS)
                .max(1),
        })
    }
}
