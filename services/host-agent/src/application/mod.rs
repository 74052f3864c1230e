//! Application use cases: reconciliation, spec commands and queries.
//!
//! [`App`] implements every use case trait over an injected [`Ports`]
//! bundle. Passes for the same VM are serialized with a per-VM lock.

mod commands;
mod errors;
mod query;
mod reconcile;
mod usecases;

use std::path::PathBuf;
use std::time::Duration;

use kiln_id::VmId;
use kiln_reconcile::{Actuator, CancelToken, KeyedLocks};

use crate::ports::Ports;

pub use commands::{CreateMicroVmRequest, INSTANCE_ID_KEY};
pub use errors::AppError;
pub use usecases::{MicroVmCommandUseCases, MicroVmQueryUseCases, ReconcileMicroVmsUseCase};

/// Default number of failed passes before a VM is marked failed.
pub const DEFAULT_MAXIMUM_RETRY: u32 = 10;

/// Backoff unit: a VM that failed `n` times waits `n` times this long.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root for per-VM state directories.
    pub root_state_dir: PathBuf,
    pub maximum_retry: u32,
    /// Provider used when a spec names none.
    pub default_provider: String,
    pub backoff_base: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_state_dir: PathBuf::from("/var/lib/kiln"),
            maximum_retry: DEFAULT_MAXIMUM_RETRY,
            default_provider: "firecracker".to_string(),
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

/// The host agent application.
#[derive(Debug)]
pub struct App {
    config: AppConfig,
    ports: Ports,
    actuator: Actuator,
    locks: KeyedLocks<String>,
    cancel: CancelToken,
}

impl App {
    pub fn new(config: AppConfig, ports: Ports) -> Self {
        Self {
            config,
            ports,
            actuator: Actuator::new(),
            locks: KeyedLocks::new(),
            cancel: CancelToken::never(),
        }
    }

    /// Stops in-flight plans between steps once `cancel` fires.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }
}

/// Lock key for a VM. The UID is left out so that `ns/name` and
/// `ns/name/uid` serialize against each other.
fn lock_key(id: &VmId) -> String {
    format!("{}/{}", id.namespace(), id.name())
}
