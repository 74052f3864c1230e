use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Plan};
use tracing::debug;

use super::{names, StepList};
use crate::models::MicroVm;
use crate::ports::Ports;
use crate::steps::{vm_state_dir, DirDelete, IfaceDelete, MicroVmDelete};

/// Tears a tombstoned VM down: provider delete, interfaces, state dir.
///
/// Images are not unmounted here; the image service owns their lifetime.
pub struct MicroVmDeletePlan {
    state_dir: PathBuf,
    ports: Ports,
}

impl MicroVmDeletePlan {
    pub fn new(state_dir: impl Into<PathBuf>, ports: Ports) -> Self {
        Self {
            state_dir: state_dir.into(),
            ports,
        }
    }
}

#[async_trait]
impl Plan<MicroVm> for MicroVmDeletePlan {
    fn name(&self) -> &str {
        names::MICROVM_DELETE
    }

    async fn create(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        if !vm.spec.is_deleted() {
            return Ok(vec![]);
        }

        let provider = self.ports.provider(&vm.spec.provider)?;
        debug!(vmid = %vm.id, "Building delete steps");

        let vm: &MicroVm = vm;
        let mut steps = StepList::new(vm);

        steps
            .add(MicroVmDelete::new(provider))
            .await
            .context("adding microvm delete step")?;

        for iface in &vm.spec.network_interfaces {
            steps
                .add(IfaceDelete::new(
                    iface.guest_device_name.clone(),
                    self.ports.network.clone(),
                ))
                .await
                .context("adding delete network interface step")?;
        }

        steps
            .add(DirDelete::new(
                vm_state_dir(&self.state_dir, &vm.id),
                self.ports.fs.clone(),
            ))
            .await
            .context("adding state dir delete step")?;

        Ok(steps.into_steps())
    }
}
