use serde::{Deserialize, Serialize};

/// Kind of host device backing a guest interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfaceType {
    #[default]
    Tap,
    Macvtap,
}

impl std::fmt::Display for IfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tap => f.write_str("tap"),
            Self::Macvtap => f.write_str("macvtap"),
        }
    }
}

/// A guest network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Device name inside the guest (e.g. `eth0`). Key for the status map.
    pub guest_device_name: String,

    #[serde(default)]
    pub interface_type: IfaceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_mac: Option<String>,

    /// Bridge to attach a tap device to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_name: Option<String>,

    /// Whether the guest may reach the metadata service over this interface.
    #[serde(default)]
    pub allow_metadata_requests: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_address: Option<StaticAddress>,
}

/// Static IP configuration for an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddress {
    /// CIDR, e.g. `169.254.0.1/16`.
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default)]
    pub nameservers: Vec<String>,
}

/// Host side of a guest interface, as discovered or created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceStatus {
    /// Host device name. Empty until the interface step names it.
    #[serde(default)]
    pub host_device_name: String,

    /// Kernel interface index.
    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub mac_address: String,
}
