use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Plan};
use tracing::debug;

use super::{names, StepList};
use crate::models::{Capability, MicroVm, MicroVmState};
use crate::ports::Ports;
use crate::steps::{
    CloudInitDiskMount, IfaceCreate, InitrdMount, KernelMount, MicroVmCreate, MicroVmStart, StateDirCreate,
    VolumeMount,
};

/// Brings a new VM up: state directory, mounts, cloud-init mounts for
/// additional volumes, interfaces, create, start.
///
/// The start step is always included, whatever the provider's capabilities.
pub struct MicroVmCreatePlan {
    state_dir: PathBuf,
    ports: Ports,
}

impl MicroVmCreatePlan {
    pub fn new(state_dir: impl Into<PathBuf>, ports: Ports) -> Self {
        Self {
            state_dir: state_dir.into(),
            ports,
        }
    }
}

#[async_trait]
impl Plan<MicroVm> for MicroVmCreatePlan {
    fn name(&self) -> &str {
        names::MICROVM_CREATE
    }

    async fn create(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        create_steps(vm, &self.ports, &self.state_dir, false).await
    }
}

/// Steps shared by the create and create-or-update plans.
///
/// With `skip_autostart`, `microvm_start` is left out for providers that
/// boot on create.
pub(super) async fn create_steps(
    vm: &mut MicroVm,
    ports: &Ports,
    state_dir: &Path,
    skip_autostart: bool,
) -> Result<Vec<BoxProcedure<MicroVm>>> {
    if vm.spec.is_deleted() {
        return Ok(vec![]);
    }

    let provider = ports.provider(&vm.spec.provider)?;

    vm.status.ensure_maps();
    if vm.status.state == MicroVmState::Pending {
        vm.status.state = MicroVmState::Created;
    }
    for id in vm.spec.volumes().map(|v| v.id.clone()).collect::<Vec<_>>() {
        vm.status.volume_mut(&id);
    }
    for guest in vm
        .spec
        .network_interfaces
        .iter()
        .map(|i| i.guest_device_name.clone())
        .collect::<Vec<_>>()
    {
        vm.status.interface_mut(&guest);
    }

    debug!(vmid = %vm.id, "Building create steps");
    let vm: &MicroVm = vm;
    let mut steps = StepList::new(vm);

    steps
        .add(StateDirCreate::new(state_dir, ports.fs.clone()))
        .await
        .context("adding state dir step")?;

    for volume in vm.spec.volumes() {
        if let Some(container) = volume.source.container.as_ref() {
            steps
                .add(VolumeMount::new(
                    volume.id.clone(),
                    container.image.clone(),
                    ports.images.clone(),
                ))
                .await
                .context("adding volume mount step")?;
        }
    }

    if !vm.spec.kernel.image.is_empty() {
        steps
            .add(KernelMount::new(ports.images.clone()))
            .await
            .context("adding kernel mount step")?;
    }

    if vm.spec.initrd.is_some() {
        steps
            .add(InitrdMount::new(ports.images.clone()))
            .await
            .context("adding initrd mount step")?;
    }

    if !vm.spec.additional_volumes.is_empty() {
        steps
            .add(CloudInitDiskMount::new())
            .await
            .context("adding cloud-init disk mount step")?;
    }

    for iface in &vm.spec.network_interfaces {
        steps
            .add(IfaceCreate::new(iface.clone(), ports.network.clone()))
            .await
            .context("adding create network interface step")?;
    }

    steps
        .add(MicroVmCreate::new(provider.clone()))
        .await
        .context("adding microvm create step")?;

    if !(skip_autostart && provider.capabilities().has(Capability::AutoStart)) {
        steps
            .add(MicroVmStart::new(provider))
            .await
            .context("adding microvm start step")?;
    }

    Ok(steps.into_steps())
}
