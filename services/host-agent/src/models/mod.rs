//! Domain models for microVMs on this host.
//!
//! A [`MicroVm`] pairs the desired [`MicroVmSpec`] with the observed
//! [`MicroVmStatus`]. The status is the ledger of what reconciliation has
//! already done; steps read and extend it in place.

mod capability;
mod microvm;
mod network;
mod volume;

pub use capability::{Capabilities, Capability};
pub use microvm::{
    Initrd, Kernel, MicroVm, MicroVmSpec, MicroVmState, MicroVmStatus, RuntimeStatus,
};
pub use network::{IfaceType, NetworkInterface, NetworkInterfaceStatus, StaticAddress};
pub use volume::{
    ContainerVolumeSource, ImageUse, Mount, MountType, Volume, VolumeSource, VolumeStatus,
};
