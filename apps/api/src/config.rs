use anyhow::{bail, Context, Result};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Process configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
///
/// Fish CRM credentials are not here: they live in the store as `SyncConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub crm_timeout: Duration,
    pub watcher_rescan: Duration,
    pub bulk_batch_delay: Duration,
    pub processor_id: String,
    pub watcher_autostart: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let store_backend = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        };
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(require_env("DATABASE_URL")?),
            StoreBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        Ok(Config {
            store_backend,
            database_url,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            crm_timeout: Duration::from_secs(parse_env("CRM_TIMEOUT_SECS", 30)?),
            watcher_rescan: Duration::from_secs(parse_env("WATCHER_RESCAN_SECS", 30)?),
            bulk_batch_delay: Duration::from_millis(parse_env("BULK_BATCH_DELAY_MS", 1000)?),
            processor_id: std::env::var("PROCESSOR_ID")
                .unwrap_or_else(|_| "submission-watcher".to_string()),
            watcher_autostart: parse_env("WATCHER_AUTOSTART", true)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .ok()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
