//! Reconciliation steps for microVMs.
//!
//! Each step is a [`Procedure`](kiln_reconcile::Procedure) over
//! [`MicroVm`](crate::models::MicroVm). Steps record what they did in the
//! VM's status, and later steps in the same pass read it: `microvm_create`
//! expects every mount and interface status to have been filled in by the
//! steps before it.

mod cloudinit;
mod error;
mod microvm;
mod network;
mod runtime;

pub use cloudinit::{CloudInitDiskMount, VENDOR_DATA_KEY};
pub use error::StepError;
pub use microvm::{MicroVmCreate, MicroVmDelete, MicroVmStart};
pub use network::{IfaceCreate, IfaceDelete};
pub use runtime::{vm_state_dir, DirDelete, InitrdMount, KernelMount, StateDirCreate, VolumeMount};

/// Step names, as they appear in logs.
pub mod names {
    pub const MICROVM_STATE_DIR_CREATE: &str = "microvm_state_dir_create";
    pub const RUNTIME_VOLUME_MOUNT: &str = "runtime_volume_mount";
    pub const RUNTIME_KERNEL_MOUNT: &str = "runtime_kernel_mount";
    pub const RUNTIME_INITRD_MOUNT: &str = "runtime_initrd_mount";
    pub const CLOUDINIT_DISK_MOUNT: &str = "cloudinit_disk_mount";
    pub const NETWORK_IFACE_CREATE: &str = "network_iface_create";
    pub const NETWORK_IFACE_DELETE: &str = "network_iface_delete";
    pub const MICROVM_CREATE: &str = "microvm_create";
    pub const MICROVM_START: &str = "microvm_start";
    pub const MICROVM_DELETE: &str = "microvm_delete";
    pub const IO_DELETE_DIR: &str = "io_delete_dir";
}
