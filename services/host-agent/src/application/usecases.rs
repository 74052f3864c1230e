use async_trait::async_trait;
use kiln_id::VmId;

use super::{AppError, CreateMicroVmRequest};
use crate::models::{MicroVm, RuntimeStatus};

/// Converges stored specs with the host.
#[async_trait]
pub trait ReconcileMicroVmsUseCase: Send + Sync {
    /// Runs one reconciliation pass for a VM.
    async fn reconcile_microvm(&self, id: &VmId) -> Result<(), AppError>;

    /// Lists every stored VM, optionally in one namespace, for a full pass.
    ///
    /// Callers queue the returned IDs themselves; nothing is published.
    async fn resync_microvms(&self, namespace: Option<&str>) -> Result<Vec<VmId>, AppError>;
}

/// Spec mutations.
#[async_trait]
pub trait MicroVmCommandUseCases: Send + Sync {
    async fn create_microvm(&self, request: CreateMicroVmRequest) -> Result<MicroVm, AppError>;

    /// Tombstones a VM; the delete itself happens on reconciliation.
    async fn delete_microvm(&self, uid: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait MicroVmQueryUseCases: Send + Sync {
    async fn get_microvm(&self, uid: &str) -> Result<MicroVm, AppError>;

    async fn get_all_microvm(&self, namespace: Option<&str>) -> Result<Vec<MicroVm>, AppError>;

    /// Status derived from the provider and the tombstone. `Unknown` when
    /// no such VM is stored.
    async fn get_microvm_status(&self, id: &VmId) -> Result<RuntimeStatus, AppError>;
}
