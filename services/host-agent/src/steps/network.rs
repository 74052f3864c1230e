//! Host network interface steps.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Procedure};
use tracing::debug;

use super::names;
use super::StepError;
use crate::models::{IfaceType, MicroVm, NetworkInterface};
use crate::network::new_iface_name;
use crate::ports::{DeleteIfaceInput, IfaceCreateInput, NetworkService};

/// Ensures the host device for one guest interface exists.
///
/// Records host device name, index and MAC under the guest device name.
pub struct IfaceCreate {
    iface: NetworkInterface,
    network: Arc<dyn NetworkService>,
}

impl IfaceCreate {
    pub fn new(iface: NetworkInterface, network: Arc<dyn NetworkService>) -> Self {
        Self { iface, network }
    }
}

#[async_trait]
impl Procedure<MicroVm> for IfaceCreate {
    fn name(&self) -> &str {
        names::NETWORK_IFACE_CREATE
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let device = match vm.status.interface(&self.iface.guest_device_name) {
            Some(status) if !status.host_device_name.is_empty() => &status.host_device_name,
            _ => return Ok(true),
        };

        let exists = self
            .network
            .iface_exists(device)
            .await
            .with_context(|| format!("checking if network interface {device} exists"))?;
        Ok(!exists)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        let guest = &self.iface.guest_device_name;
        if guest.is_empty() {
            return Err(StepError::GuestDeviceNameRequired.into());
        }

        let device_name = {
            let status = vm.status.interface_mut(guest);
            if status.host_device_name.is_empty() {
                status.host_device_name = new_iface_name(self.iface.interface_type);
            }
            status.host_device_name.clone()
        };

        let exists = self
            .network
            .iface_exists(&device_name)
            .await
            .context("checking if networking interface exists")?;

        let details = if exists {
            debug!(vmid = %vm.id, iface = %guest, device = %device_name, "Reusing existing interface");
            self.network
                .iface_details(&device_name)
                .await
                .context("getting interface details")?
        } else {
            // Metadata traffic is served from the tap itself, so it stays off the bridge.
            let attach = !(self.iface.interface_type == IfaceType::Tap
                && self.iface.allow_metadata_requests);

            debug!(vmid = %vm.id, iface = %guest, device = %device_name, attach, "Creating interface");
            self.network
                .iface_create(IfaceCreateInput {
                    device_name: device_name.clone(),
                    iface_type: self.iface.interface_type,
                    mac: self.iface.guest_mac.clone(),
                    attach,
                    bridge_name: self.iface.bridge_name.clone(),
                })
                .await
                .context("creating network interface")?
        };

        let status = vm.status.interface_mut(guest);
        status.host_device_name = device_name;
        status.index = details.index;
        status.mac_address = details.mac;

        Ok(vec![])
    }
}

/// Removes the host device recorded for one guest interface.
pub struct IfaceDelete {
    guest_device_name: String,
    network: Arc<dyn NetworkService>,
}

impl IfaceDelete {
    pub fn new(guest_device_name: impl Into<String>, network: Arc<dyn NetworkService>) -> Self {
        Self {
            guest_device_name: guest_device_name.into(),
            network,
        }
    }

    fn host_device<'a>(&self, vm: &'a MicroVm) -> Option<&'a str> {
        vm.status
            .interface(&self.guest_device_name)
            .map(|s| s.host_device_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[async_trait]
impl Procedure<MicroVm> for IfaceDelete {
    fn name(&self) -> &str {
        names::NETWORK_IFACE_DELETE
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let Some(device) = self.host_device(vm) else {
            return Ok(false);
        };

        self.network
            .iface_exists(device)
            .await
            .with_context(|| format!("checking if network interface {device} exists"))
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        let device = self
            .host_device(vm)
            .ok_or_else(|| StepError::MissingStatusInfo(self.guest_device_name.clone()))?
            .to_string();

        let exists = self
            .network
            .iface_exists(&device)
            .await
            .context("checking if networking interface exists")?;
        if !exists {
            return Ok(vec![]);
        }

        debug!(vmid = %vm.id, device = %device, "Deleting interface");
        self.network
            .iface_delete(DeleteIfaceInput {
                device_name: device,
            })
            .await
            .context("deleting networking interface")?;

        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNetworkService;
    use crate::models::MicroVmSpec;
    use kiln_id::VmId;

    fn tap(guest: &str) -> NetworkInterface {
        NetworkInterface {
            guest_device_name: guest.to_string(),
            interface_type: IfaceType::Tap,
            ..Default::default()
        }
    }

    fn test_vm() -> MicroVm {
        MicroVm::new(VmId::parse("ns/vm1").unwrap(), MicroVmSpec::default())
    }

    #[tokio::test]
    async fn test_create_names_and_records_device() {
        let network = Arc::new(MockNetworkService::new());
        let step = IfaceCreate::new(tap("eth0"), network.clone());
        let mut vm = test_vm();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();

        let status = vm.status.interface("eth0").unwrap();
        assert!(status.host_device_name.starts_with("kt"));
        assert_eq!(status.host_device_name.len(), 9);
        assert!(status.index > 0);
        assert!(!status.mac_address.is_empty());
        assert!(network.iface_exists(&status.host_device_name).await.unwrap());
        assert!(!step.should_do(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_reuses_existing_device() {
        let network = Arc::new(MockNetworkService::new());
        let existing = network.add_existing("ktabcdefg", IfaceType::Tap);
        let step = IfaceCreate::new(tap("eth0"), network.clone());
        let mut vm = test_vm();
        vm.status.interface_mut("eth0").host_device_name = "ktabcdefg".to_string();

        step.execute(&mut vm).await.unwrap();

        let status = vm.status.interface("eth0").unwrap();
        assert_eq!(status.index, existing.index);
        assert_eq!(status.mac_address, existing.mac);
        assert!(network.created().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_tap_is_not_attached() {
        let network = Arc::new(MockNetworkService::new());
        let iface = NetworkInterface {
            allow_metadata_requests: true,
            bridge_name: Some("br0".to_string()),
            ..tap("eth0")
        };
        let step = IfaceCreate::new(iface, network.clone());
        let mut vm = test_vm();

        step.execute(&mut vm).await.unwrap();

        let created = network.created();
        assert_eq!(created.len(), 1);
        assert!(!created[0].attach);
    }

    #[tokio::test]
    async fn test_macvtap_prefix() {
        let network = Arc::new(MockNetworkService::new());
        let iface = NetworkInterface {
            interface_type: IfaceType::Macvtap,
            ..tap("eth1")
        };
        let step = IfaceCreate::new(iface, network.clone());
        let mut vm = test_vm();

        step.execute(&mut vm).await.unwrap();
        let created = network.created();
        assert!(created[0].device_name.starts_with("kvt"));
        assert!(created[0].attach);
    }

    #[tokio::test]
    async fn test_create_requires_guest_name() {
        let step = IfaceCreate::new(tap(""), Arc::new(MockNetworkService::new()));
        let mut vm = test_vm();
        let err = step.execute(&mut vm).await.err().unwrap();
        assert_eq!(
            err.downcast_ref::<StepError>(),
            Some(&StepError::GuestDeviceNameRequired)
        );
    }

    #[tokio::test]
    async fn test_delete_skips_without_status() {
        let step = IfaceDelete::new("eth0", Arc::new(MockNetworkService::new()));
        let mut vm = test_vm();
        assert!(!step.should_do(&vm).await.unwrap());

        let err = step.execute(&mut vm).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<StepError>(),
            Some(StepError::MissingStatusInfo(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_device() {
        let network = Arc::new(MockNetworkService::new());
        network.add_existing("ktabcdefg", IfaceType::Tap);
        let step = IfaceDelete::new("eth0", network.clone());
        let mut vm = test_vm();
        vm.status.interface_mut("eth0").host_device_name = "ktabcdefg".to_string();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();
        assert!(!network.iface_exists("ktabcdefg").await.unwrap());
        assert!(!step.should_do(&vm).await.unwrap());
    }
}
