//! Cloud-init vendor data for additional volumes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kiln_reconcile::{BoxProcedure, Procedure};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::names;
use super::StepError;
use crate::models::{MicroVm, Volume};

/// Metadata key holding base64-encoded cloud-init vendor data.
pub const VENDOR_DATA_KEY: &str = "vendor-data";

const CLOUD_CONFIG_HEADER: &str = "## template: jinja\n#cloud-config\n\n";

/// fstab fields applied to every entry that leaves them out.
const MOUNT_DEFAULT_FIELDS: [&str; 6] = ["None", "None", "auto", "defaults,nofail", "0", "2"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct VendorData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mounts: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mount_default_fields: Vec<String>,

    /// Everything else in the document, kept as written.
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

impl VendorData {
    fn decode(encoded: &str) -> Result<Self> {
        let raw = STANDARD.decode(encoded).context("decoding vendor data")?;
        let text = String::from_utf8(raw).context("vendor data is not utf-8")?;

        let blank = text.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#')
        });
        if blank {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&text).context("parsing vendor data yaml")
    }

    fn encode(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self).context("serializing vendor data yaml")?;
        Ok(STANDARD.encode(format!("{CLOUD_CONFIG_HEADER}{yaml}")))
    }

    fn has_device(&self, device: &str) -> bool {
        self.mounts
            .iter()
            .any(|m| m.first().map(String::as_str) == Some(device))
    }

    fn has_mount_point(&self, mount_point: &str) -> bool {
        self.mounts
            .iter()
            .any(|m| m.get(1).map(String::as_str) == Some(mount_point))
    }
}

/// Guest block device of the additional volume at `index`. The root volume
/// is always `vda`.
fn guest_device(index: usize) -> Result<String, StepError> {
    u8::try_from(index)
        .ok()
        .and_then(|i| b'b'.checked_add(i))
        .filter(u8::is_ascii_lowercase)
        .map(|letter| format!("vd{}", letter as char))
        .ok_or(StepError::GuestDevicesExhausted(index))
}

/// Additional volumes with a guest mount point, with their device index.
fn mountable(vm: &MicroVm) -> impl Iterator<Item = (usize, &Volume)> {
    vm.spec
        .additional_volumes
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.mount_point.is_empty())
}

/// Asks cloud-init to mount every additional volume at its mount point.
///
/// Entries already present in the vendor data are left alone, as are any
/// other keys it carries.
#[derive(Debug, Default)]
pub struct CloudInitDiskMount;

impl CloudInitDiskMount {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Procedure<MicroVm> for CloudInitDiskMount {
    fn name(&self) -> &str {
        names::CLOUDINIT_DISK_MOUNT
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let mut volumes = mountable(vm).peekable();
        if volumes.peek().is_none() {
            return Ok(false);
        }

        let Some(encoded) = vm.spec.metadata.get(VENDOR_DATA_KEY) else {
            return Ok(true);
        };
        let vendor_data = VendorData::decode(encoded)?;
        Ok(volumes.any(|(_, v)| !vendor_data.has_mount_point(&v.mount_point)))
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        debug!(vmid = %vm.id, "Adding cloud-init mounts for additional volumes");

        let mut vendor_data = match vm.spec.metadata.get(VENDOR_DATA_KEY) {
            Some(encoded) => VendorData::decode(encoded)?,
            None => VendorData::default(),
        };

        for (index, volume) in mountable(vm) {
            let device = guest_device(index)?;
            if !vendor_data.has_device(&device) {
                vendor_data
                    .mounts
                    .push(vec![device, volume.mount_point.clone()]);
            }
        }
        vendor_data.mount_default_fields =
            MOUNT_DEFAULT_FIELDS.iter().map(ToString::to_string).collect();

        let encoded = vendor_data.encode()?;
        vm.spec
            .metadata
            .insert(VENDOR_DATA_KEY.to_string(), encoded);
        Ok(vec![])
    }
}
