use anyhow::Context;
use async_trait::async_trait;
use kiln_events::{MicroVmEvent, TOPIC_MICROVM_EVENTS};
use kiln_id::VmId;
use tracing::{info, instrument};
use ulid::Ulid;

use super::{lock_key, App, AppError, MicroVmCommandUseCases};
use crate::models::{
    Capability, IfaceType, MicroVm, MicroVmSpec, MicroVmState, NetworkInterface, StaticAddress,
};
use crate::ports::GetOptions;

/// Metadata key carrying the instance ID handed to the guest.
pub const INSTANCE_ID_KEY: &str = "instance-id";

const METADATA_IFACE: &str = "eth0";
const METADATA_IFACE_MAC: &str = "AA:FF:00:00:00:01";
const METADATA_IFACE_ADDRESS: &str = "169.254.0.1/16";

/// A new microVM to store.
#[derive(Debug, Clone, Default)]
pub struct CreateMicroVmRequest {
    /// Generated when absent.
    pub name: Option<String>,
    /// The default namespace when absent.
    pub namespace: Option<String>,
    pub spec: MicroVmSpec,
}

fn metadata_interface() -> NetworkInterface {
    NetworkInterface {
        guest_device_name: METADATA_IFACE.to_string(),
        interface_type: IfaceType::Tap,
        guest_mac: Some(METADATA_IFACE_MAC.to_string()),
        allow_metadata_requests: true,
        static_address: Some(StaticAddress {
            address: METADATA_IFACE_ADDRESS.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl App {
    async fn find_by_uid(&self, uid: &str) -> Result<MicroVm, AppError> {
        self.ports
            .repo
            .get(GetOptions::by_uid(uid))
            .await
            .context("getting microvm spec to delete")?
            .ok_or_else(|| AppError::SpecNotFound {
                uid: uid.to_string(),
            })
    }
}

#[async_trait]
impl MicroVmCommandUseCases for App {
    #[instrument(skip(self, request), fields(name = ?request.name, namespace = ?request.namespace))]
    async fn create_microvm(&self, request: CreateMicroVmRequest) -> Result<MicroVm, AppError> {
        let CreateMicroVmRequest {
            name,
            namespace,
            mut spec,
        } = request;

        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| Ulid::new().to_string());
        let uid = Ulid::new().to_string();
        let id = VmId::new(name, namespace.unwrap_or_default(), Some(uid.clone()))?;

        if spec.provider.is_empty() {
            spec.provider = self.config.default_provider.clone();
        }
        let provider = self
            .ports
            .provider(&spec.provider)
            .map_err(|_| AppError::ProviderUnavailable(spec.provider.clone()))?;

        // Held until the record is saved so a concurrent create with the
        // same name sees it.
        let _guard = self.locks.lock(lock_key(&id)).await;

        let existing = self
            .ports
            .repo
            .get(GetOptions {
                name: Some(id.name().to_string()),
                namespace: Some(id.namespace().to_string()),
                uid: None,
            })
            .await
            .context("checking for existing microvm spec")?;
        if existing.is_some() {
            return Err(AppError::SpecAlreadyExists {
                name: id.name().to_string(),
                namespace: id.namespace().to_string(),
            });
        }

        spec.metadata
            .entry(INSTANCE_ID_KEY.to_string())
            .or_insert_with(|| uid.clone());

        if provider.capabilities().has(Capability::MetadataService)
            && !spec
                .network_interfaces
                .iter()
                .any(|i| i.guest_device_name == METADATA_IFACE)
        {
            spec.network_interfaces.insert(0, metadata_interface());
        }

        spec.created_at = self.ports.clock.now().timestamp();
        spec.deleted_at = 0;

        let mut vm = MicroVm::new(id, spec);
        vm.status.state = MicroVmState::Pending;
        vm.status.retry = 0;

        let saved = self
            .ports
            .repo
            .save(&vm)
            .await
            .context("saving new microvm spec")?;

        self.ports
            .events
            .publish(TOPIC_MICROVM_EVENTS, MicroVmEvent::created(&saved.id))
            .await
            .context("publishing microvm created event")?;

        info!(vmid = %saved.id, provider = %saved.spec.provider, "MicroVM spec created");
        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn delete_microvm(&self, uid: &str) -> Result<(), AppError> {
        if uid.is_empty() {
            return Err(AppError::UidRequired);
        }

        let found = self.find_by_uid(uid).await?;

        // A pass in flight saves its whole record when it finishes. Waiting
        // for it and re-reading keeps the tombstone from being overwritten.
        let _guard = self.locks.lock(lock_key(&found.id)).await;
        let mut vm = self.find_by_uid(uid).await?;

        vm.spec.deleted_at = self.ports.clock.now().timestamp();
        vm.status.state = MicroVmState::Deleting;
        vm.status.retry = 0;
        vm.status.not_before = 0;

        let saved = self
            .ports
            .repo
            .save(&vm)
            .await
            .context("saving microvm tombstone")?;

        self.ports
            .events
            .publish(TOPIC_MICROVM_EVENTS, MicroVmEvent::updated(&saved.id))
            .await
            .context("publishing microvm updated event")?;

        info!(vmid = %saved.id, "MicroVM spec marked for deletion");
        Ok(())
    }
}
