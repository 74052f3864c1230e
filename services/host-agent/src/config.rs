//! Configuration for the host agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::application::{AppConfig, DEFAULT_BACKOFF_BASE, DEFAULT_MAXIMUM_RETRY};
use crate::controller::ControllerOptions;

/// Host agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for per-VM state directories.
    pub state_dir: PathBuf,

    /// SQLite database path.
    pub database_path: PathBuf,

    /// Full resync interval in seconds.
    pub resync_period_secs: u64,

    /// Number of reconcile workers.
    pub workers: usize,

    /// Resync everything when the controller starts.
    pub resync_on_start: bool,

    /// Failed passes allowed before a VM is marked failed.
    pub maximum_retry: u32,

    /// Provider used when a spec names none.
    pub default_provider: String,

    /// Restrict resyncs to one namespace.
    pub namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Keep everything in-process: no host devices, no database.
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let state_dir = var("KILN_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/kiln"));

        let database_path = var("KILN_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("kiln.db"));

        let resync_period_secs: u64 = var("KILN_RESYNC_PERIOD_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(600);

        let workers: usize = var("KILN_WORKERS")
            .and_then(|s| s.parse().ok())
            .filter(|w| *w > 0)
            .unwrap_or(10);

        let resync_on_start = var("KILN_RESYNC_ON_START")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(true);

        let maximum_retry: u32 = var("KILN_MAXIMUM_RETRY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAXIMUM_RETRY);

        let default_provider =
            var("KILN_DEFAULT_PROVIDER").unwrap_or_else(|| "firecracker".to_string());

        let namespace = var("KILN_NAMESPACE").filter(|ns| !ns.is_empty());

        let log_level = var("KILN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = var("KILN_DEV_MODE")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(false);

        Ok(Self {
            state_dir,
            database_path,
            resync_period_secs,
            workers,
            resync_on_start,
            maximum_retry,
            default_provider,
            namespace,
            log_level,
            dev_mode,
        })
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            root_state_dir: self.state_dir.clone(),
            maximum_retry: self.maximum_retry,
            default_provider: self.default_provider.clone(),
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            workers: self.workers,
            resync_period: Duration::from_secs(self.resync_period_secs),
            resync_on_start: self.resync_on_start,
            namespace: self.namespace.clone(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
