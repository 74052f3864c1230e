use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use kiln_id::VmId;
use tokio::sync::RwLock;

use crate::models::MicroVm;
use crate::ports::{GetOptions, MicroVmRepository};

/// Repository held in memory, keyed by VM ID string.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    vms: RwLock<BTreeMap<String, MicroVm>>,
    leases: RwLock<BTreeSet<String>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_lease(&self, id: &VmId) -> bool {
        self.leases.read().await.contains(&id.to_string())
    }

    pub async fn len(&self) -> usize {
        self.vms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vms.read().await.is_empty()
    }
}

#[async_trait]
impl MicroVmRepository for MemoryRepository {
    async fn save(&self, vm: &MicroVm) -> Result<MicroVm> {
        let key = vm.id.to_string();
        let mut vms = self.vms.write().await;

        let mut stored = vm.clone();
        stored.version = vms.get(&key).map_or(0, |v| v.version) + 1;
        vms.insert(key.clone(), stored.clone());
        self.leases.write().await.insert(key);

        Ok(stored)
    }

    async fn delete(&self, vm: &MicroVm) -> Result<()> {
        self.vms.write().await.remove(&vm.id.to_string());
        Ok(())
    }

    async fn get(&self, options: GetOptions) -> Result<Option<MicroVm>> {
        Ok(self
            .vms
            .read()
            .await
            .values()
            .find(|vm| options.matches(vm))
            .cloned())
    }

    async fn get_all(&self, namespace: Option<&str>) -> Result<Vec<MicroVm>> {
        Ok(self
            .vms
            .read()
            .await
            .values()
            .filter(|vm| namespace.is_none_or(|ns| vm.id.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn exists(&self, id: &VmId) -> Result<bool> {
        Ok(self.get(GetOptions::by_id(id)).await?.is_some())
    }

    async fn release_lease(&self, vm: &MicroVm) -> Result<()> {
        self.leases.write().await.remove(&vm.id.to_string());
        Ok(())
    }
}
