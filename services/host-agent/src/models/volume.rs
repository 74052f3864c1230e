use serde::{Deserialize, Serialize};

/// A volume attached to a microVM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume ID. Key for the status map.
    pub id: String,

    /// Mount point inside the guest.
    #[serde(default)]
    pub mount_point: String,

    #[serde(default)]
    pub is_read_only: bool,

    #[serde(default)]
    pub source: VolumeSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<u32>,
}

/// Where a volume's content comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerVolumeSource>,
}

/// A volume backed by a container image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerVolumeSource {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<Mount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
    /// A block device.
    #[default]
    Dev,
    /// A directory on the host.
    HostPath,
}

/// A mounted image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub mount_type: MountType,
    pub source: String,
}

/// What an image is mounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageUse {
    Volume,
    Kernel,
    Initrd,
}
