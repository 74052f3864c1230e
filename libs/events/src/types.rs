//! MicroVM event payloads.

use kiln_id::{IdError, VmId};
use serde::{Deserialize, Serialize};

/// Topic on which every microVM spec event is published.
pub const TOPIC_MICROVM_EVENTS: &str = "microvm";

/// All event type names as constants.
pub mod event_types {
    pub const MICROVM_SPEC_CREATED: &str = "microvm.spec_created";
    pub const MICROVM_SPEC_UPDATED: &str = "microvm.spec_updated";
    pub const MICROVM_SPEC_DELETED: &str = "microvm.spec_deleted";
}

/// Identity of the microVM an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroVmEventData {
    /// MicroVM name.
    pub id: String,

    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl MicroVmEventData {
    pub fn from_vmid(vmid: &VmId) -> Self {
        Self {
            id: vmid.name().to_string(),
            namespace: vmid.namespace().to_string(),
            uid: vmid.uid().map(str::to_string),
        }
    }

    /// Builds the VM ID this event refers to.
    pub fn vmid(&self) -> Result<VmId, IdError> {
        VmId::new(self.id.clone(), self.namespace.clone(), self.uid.clone())
    }
}

/// A microVM spec change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MicroVmEvent {
    SpecCreated(MicroVmEventData),
    SpecUpdated(MicroVmEventData),
    SpecDeleted(MicroVmEventData),
}

impl MicroVmEvent {
    pub fn created(vmid: &VmId) -> Self {
        Self::SpecCreated(MicroVmEventData::from_vmid(vmid))
    }

    pub fn updated(vmid: &VmId) -> Self {
        Self::SpecUpdated(MicroVmEventData::from_vmid(vmid))
    }

    pub fn deleted(vmid: &VmId) -> Self {
        Self::SpecDeleted(MicroVmEventData::from_vmid(vmid))
    }

    /// The event type name (e.g., "microvm.spec_created").
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SpecCreated(_) => event_types::MICROVM_SPEC_CREATED,
            Self::SpecUpdated(_) => event_types::MICROVM_SPEC_UPDATED,
            Self::SpecDeleted(_) => event_types::MICROVM_SPEC_DELETED,
        }
    }

    pub fn data(&self) -> &MicroVmEventData {
        match self {
            Self::SpecCreated(data) | Self::SpecUpdated(data) | Self::SpecDeleted(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let vmid = VmId::parse("ns/vm1").unwrap();
        assert_eq!(MicroVmEvent::created(&vmid).event_type(), "microvm.spec_created");
        assert_eq!(MicroVmEvent::updated(&vmid).event_type(), "microvm.spec_updated");
        assert_eq!(MicroVmEvent::deleted(&vmid).event_type(), "microvm.spec_deleted");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let vmid = VmId::parse("ns/vm1").unwrap();
        let json = serde_json::to_value(MicroVmEvent::updated(&vmid)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "spec_updated", "id": "vm1", "namespace": "ns"})
        );
    }

    #[test]
    fn test_event_data_vmid() {
        let data = MicroVmEventData {
            id: "vm1".to_string(),
            namespace: "ns".to_string(),
            uid: Some("01HV4Z4NYPLTRS0JTUA8XDME5F".to_string()),
        };
        assert_eq!(
            data.vmid().unwrap().to_string(),
            "ns/vm1/01HV4Z4NYPLTRS0JTUA8XDME5F"
        );
    }

    #[test]
    fn test_event_data_requires_name() {
        let data = MicroVmEventData {
            id: String::new(),
            namespace: "ns".to_string(),
            uid: None,
        };
        assert_eq!(data.vmid(), Err(IdError::NameRequired));
    }
}
