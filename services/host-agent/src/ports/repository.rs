use anyhow::Result;
use async_trait::async_trait;
use kiln_id::VmId;

use crate::models::MicroVm;

/// Lookup key for [`MicroVmRepository::get`].
///
/// A UID alone identifies a VM. Without one, name and namespace must both
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub uid: Option<String>,
}

impl GetOptions {
    pub fn by_id(id: &VmId) -> Self {
        Self {
            name: Some(id.name().to_string()),
            namespace: Some(id.namespace().to_string()),
            uid: id.uid().map(str::to_string),
        }
    }

    pub fn by_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    /// Whether `vm` satisfies these options.
    pub fn matches(&self, vm: &MicroVm) -> bool {
        if let Some(uid) = self.uid.as_deref() {
            if vm.id.uid() != Some(uid) {
                return false;
            }
        } else if self.name.is_none() || self.namespace.is_none() {
            return false;
        }

        self.name.as_deref().is_none_or(|n| vm.id.name() == n)
            && self
                .namespace
                .as_deref()
                .is_none_or(|ns| vm.id.namespace() == ns)
    }
}

/// Durable storage of microVM specs and status.
#[async_trait]
pub trait MicroVmRepository: Send + Sync {
    /// Stores `vm`, returning the stored copy with its version incremented.
    async fn save(&self, vm: &MicroVm) -> Result<MicroVm>;

    /// Removes the record for `vm`.
    async fn delete(&self, vm: &MicroVm) -> Result<()>;

    /// Finds a VM. A missing VM is `Ok(None)`, not an error.
    async fn get(&self, options: GetOptions) -> Result<Option<MicroVm>>;

    /// Lists VMs, optionally restricted to one namespace.
    async fn get_all(&self, namespace: Option<&str>) -> Result<Vec<MicroVm>>;

    async fn exists(&self, id: &VmId) -> Result<bool>;

    /// Drops any lease the repository holds on resources owned by `vm`.
    async fn release_lease(&self, vm: &MicroVm) -> Result<()>;
}
