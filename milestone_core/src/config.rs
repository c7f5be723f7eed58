use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub data_dir: PathBuf,
    pub tx_status_ttl: Duration,
    pub tx_status_sweep: Duration,
    pub http_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("data"),
            tx_status_ttl: Duration::from_secs(600),
            tx_status_sweep: Duration::from_secs(60),
            http_workers: 4,
        }
    }
}

impl Config {
    /// Reads `.env` if present, then the process environment. Unset variables
    /// fall back to [`Config::default`].
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Config::default();

        let bind = std::env::var("PROOF_API_BIND").unwrap_or(defaults.bind);
        let data_dir = std::env::var("PROOF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let tx_status_ttl = secs_var("TX_STATUS_TTL_SECS")?.unwrap_or(defaults.tx_status_ttl);
        let tx_status_sweep = secs_var("TX_STATUS_SWEEP_SECS")?
            .unwrap_or(defaults.tx_status_sweep)
            .max(Duration::from_secs(1));
        let http_workers = match std::env::var("HTTP_WORKERS") {
            Ok(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("HTTP_WORKERS must be a number, got '{raw}'"))?
                .max(1),
            Err(_) => defaults.http_workers,
        };

        Ok(Self {
            bind,
            data_dir,
            tx_status_ttl,
            tx_status_sweep,
            http_workers,
        })
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs = raw
                .parse::<u64>()
                .with_context(|| format!("{name} must be a number of seconds, got '{raw}'"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
