use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Plan};

use super::create::create_steps;
use super::names;
use crate::models::MicroVm;
use crate::ports::Ports;

/// Converges a live VM towards its spec. Used for every non-deleted pass.
///
/// Providers with [`AutoStart`](crate::models::Capability::AutoStart) boot
/// the VM on create, so no start step is planned for them.
pub struct MicroVmCreateOrUpdatePlan {
    state_dir: PathBuf,
    ports: Ports,
}

impl MicroVmCreateOrUpdatePlan {
    pub fn new(state_dir: impl Into<PathBuf>, ports: Ports) -> Self {
        Self {
            state_dir: state_dir.into(),
            ports,
        }
    }
}

#[async_trait]
impl Plan<MicroVm> for MicroVmCreateOrUpdatePlan {
    fn name(&self) -> &str {
        names::MICROVM_CREATE_UPDATE
    }

    async fn create(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        create_steps(vm, &self.ports, &self.state_dir, true).await
    }
}
