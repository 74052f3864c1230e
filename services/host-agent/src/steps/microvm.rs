//! Hypervisor provider steps.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Procedure};
use tracing::{debug, info};

use super::names;
use crate::models::MicroVm;
use crate::ports::{MicroVmProviderState, MicroVmService};

async fn provider_state(provider: &dyn MicroVmService, vm: &MicroVm) -> Result<MicroVmProviderState> {
    provider
        .state(&vm.id.to_string())
        .await
        .context("checking if microvm is running")
}

/// Creates the VM in the provider.
///
/// Requires every mount and interface status to be populated.
pub struct MicroVmCreate {
    provider: Arc<dyn MicroVmService>,
}

impl MicroVmCreate {
    pub fn new(provider: Arc<dyn MicroVmService>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Procedure<MicroVm> for MicroVmCreate {
    fn name(&self) -> &str {
        names::MICROVM_CREATE
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let state = provider_state(self.provider.as_ref(), vm).await?;
        Ok(state == MicroVmProviderState::Pending)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        info!(vmid = %vm.id, provider = %vm.spec.provider, "Creating microvm");
        self.provider
            .create(vm)
            .await
            .context("creating microvm")?;
        Ok(vec![])
    }
}

/// Boots the VM.
pub struct MicroVmStart {
    provider: Arc<dyn MicroVmService>,
}

impl MicroVmStart {
    pub fn new(provider: Arc<dyn MicroVmService>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Procedure<MicroVm> for MicroVmStart {
    fn name(&self) -> &str {
        names::MICROVM_START
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let state = provider_state(self.provider.as_ref(), vm).await?;
        Ok(state != MicroVmProviderState::Running)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        info!(vmid = %vm.id, "Starting microvm");
        self.provider
            .start(vm)
            .await
            .context("starting microvm")?;
        Ok(vec![])
    }
}

/// Removes the VM from the provider.
pub struct MicroVmDelete {
    provider: Arc<dyn MicroVmService>,
}

impl MicroVmDelete {
    pub fn new(provider: Arc<dyn MicroVmService>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Procedure<MicroVm> for MicroVmDelete {
    fn name(&self) -> &str {
        names::MICROVM_DELETE
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let state = provider_state(self.provider.as_ref(), vm).await?;
        let gone = matches!(
            state,
            MicroVmProviderState::Pending | MicroVmProviderState::Unknown
        );
        debug!(vmid = %vm.id, %state, "Checked provider state before delete");
        Ok(!gone)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        info!(vmid = %vm.id, "Deleting microvm");
        self.provider
            .delete(&vm.id.to_string())
            .await
            .context("deleting microvm")?;
        Ok(vec![])
    }
}
