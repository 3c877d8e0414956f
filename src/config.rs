use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub max_txn_attempts: u32,
    pub low_utilization_threshold: u32,
    pub reconcile_interval_secs: u64,
    pub enable_auto_reconcile: bool,
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8189,
            data_dir: PathBuf::from("data/ledger"),
            max_txn_attempts: 4,
            low_utilization_threshold: 25,
            reconcile_interval_secs: 300,
            enable_auto_reconcile: true,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("LEDGER_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("LEDGER_PORT") {
            cfg.server_port = port.parse().context("LEDGER_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("LEDGER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(attempts) = env::var("MAX_TXN_ATTEMPTS") {
            cfg.max_txn_attempts = attempts
                .parse()
                .context("MAX_TXN_ATTEMPTS must be a positive integer")?;
        }
        if let Ok(threshold) = env::var("LOW_UTILIZATION_THRESHOLD") {
            cfg.low_utilization_threshold = threshold
                .parse()
                .context("LOW_UTILIZATION_THRESHOLD must be an integer percentage")?;
        }
        if let Ok(interval) = env::var("RECONCILE_INTERVAL_SECS") {
            cfg.reconcile_interval_secs = interval
                .parse()
                .context("RECONCILE_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(flag) = env::var("ENABLE_AUTO_RECONCILE") {
            cfg.enable_auto_reconcile = parse_bool(&flag)
                .with_context(|| format!("ENABLE_AUTO_RECONCILE is invalid: {flag}"))?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.max_txn_attempts == 0 {
            anyhow::bail!("MAX_TXN_ATTEMPTS must be greater than zero");
        }
        if self.low_utilization_threshold > 100 {
            anyhow::bail!("LOW_UTILIZATION_THRESHOLD must be between 0 and 100");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be greater than zero");
        }

        Ok(())
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}
