//! MicroVM aggregate: spec, status and lifecycle state.

use std::collections::BTreeMap;

use kiln_id::VmId;
use serde::{Deserialize, Serialize};

use super::{Mount, NetworkInterface, NetworkInterfaceStatus, Volume, VolumeStatus};

/// A microVM: identity, desired spec and observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroVm {
    pub id: VmId,

    /// Incremented by the repository on every save.
    #[serde(default)]
    pub version: u64,

    pub spec: MicroVmSpec,

    #[serde(default)]
    pub status: MicroVmStatus,
}

impl MicroVm {
    pub fn new(id: VmId, spec: MicroVmSpec) -> Self {
        Self {
            id,
            version: 0,
            spec,
            status: MicroVmStatus::default(),
        }
    }
}

/// Desired state of a microVM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroVmSpec {
    /// Name of the hypervisor provider that runs this VM.
    #[serde(default)]
    pub provider: String,

    pub kernel: Kernel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd: Option<Initrd>,

    pub vcpu: u32,

    pub memory_mb: u32,

    /// Interfaces in guest order.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<Volume>,

    #[serde(default)]
    pub additional_volumes: Vec<Volume>,

    /// Free-form metadata exposed to the guest.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,

    /// Unix seconds.
    #[serde(default)]
    pub updated_at: i64,

    /// Unix seconds. Non-zero marks the VM for teardown.
    #[serde(default)]
    pub deleted_at: i64,
}

impl MicroVmSpec {
    /// Whether this spec has been tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at != 0
    }

    /// Root volume first, then additional volumes in order.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.root_volume.iter().chain(self.additional_volumes.iter())
    }
}

/// Kernel to boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    /// Container image holding the kernel. Empty means none configured.
    #[serde(default)]
    pub image: String,

    /// Path of the kernel binary inside the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Kernel command line arguments.
    #[serde(default)]
    pub cmdline: BTreeMap<String, String>,

    /// Whether the provider should add `ip=` network config to the cmdline.
    #[serde(default)]
    pub add_network_config: bool,
}

/// Initial ramdisk to boot with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initrd {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Lifecycle state recorded in the status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicroVmState {
    #[default]
    Pending,
    Created,
    Failed,
    Deleting,
}

impl MicroVmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for MicroVmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller sees of a VM: the provider's view, or `Deleting` once the
/// spec is tombstoned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Pending,
    Stopped,
    Running,
    Deleting,
    #[default]
    Unknown,
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Deleting => "deleting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Observed state of a microVM.
///
/// The maps stay `None` until the first reconciliation pass initialises
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroVmStatus {
    #[serde(default)]
    pub state: MicroVmState,

    /// Per-VM state directory. Empty until created.
    #[serde(default)]
    pub runtime_state_dir: String,

    /// Keyed by volume ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, VolumeStatus>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_mount: Option<Mount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd_mount: Option<Mount>,

    /// Keyed by guest device name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interfaces: Option<BTreeMap<String, NetworkInterfaceStatus>>,

    /// Failed passes since the last success.
    #[serde(default)]
    pub retry: u32,

    /// Unix seconds before which no pass should run. Zero means no backoff.
    #[serde(default)]
    pub not_before: i64,
}

impl MicroVmStatus {
    /// Initialises the volume and interface maps if they are still unset.
    pub fn ensure_maps(&mut self) {
        self.volumes.get_or_insert_with(BTreeMap::new);
        self.network_interfaces.get_or_insert_with(BTreeMap::new);
    }

    pub fn volume(&self, id: &str) -> Option<&VolumeStatus> {
        self.volumes.as_ref()?.get(id)
    }

    /// Status entry for a volume, created if missing.
    pub fn volume_mut(&mut self, id: &str) -> &mut VolumeStatus {
        self.volumes
            .get_or_insert_with(BTreeMap::new)
            .entry(id.to_string())
            .or_default()
    }

    pub fn interface(&self, guest_device_name: &str) -> Option<&NetworkInterfaceStatus> {
        self.network_interfaces.as_ref()?.get(guest_device_name)
    }

    /// Status entry for an interface, created if missing.
    pub fn interface_mut(&mut self, guest_device_name: &str) -> &mut NetworkInterfaceStatus {
        self.network_interfaces
            .get_or_insert_with(BTreeMap::new)
            .entry(guest_device_name.to_string())
            .or_default()
    }
}
