//! In-process providers for development mode and tests.
//!
//! None of these touch the host: VMs, images and network devices only
//! exist in memory. Failures can be switched on at any time so callers can
//! exercise retry and resume paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{Capabilities, Capability, IfaceType, ImageUse, MicroVm, Mount, MountType};
use crate::ports::{
    DeleteIfaceInput, IfaceCreateInput, IfaceDetails, ImageMountSpec, ImageService,
    MicroVmProviderState, MicroVmService, NetworkService,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Hypervisor provider that tracks VM state in memory.
#[derive(Debug, Default)]
pub struct MockMicroVmService {
    capabilities: Capabilities,
    states: Mutex<HashMap<String, MicroVmProviderState>>,
    calls: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
}

impl MockMicroVmService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn set_state(&self, id: &str, state: MicroVmProviderState) {
        lock(&self.states).insert(id.to_string(), state);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes `create` take this long, after the call is recorded.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *lock(&self.create_delay) = delay;
    }

    /// Calls made so far, as `"<op> <vmid>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, op: &str, id: &str) {
        lock(&self.calls).push(format!("{op} {id}"));
    }
}

#[async_trait]
impl MicroVmService for MockMicroVmService {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn state(&self, id: &str) -> Result<MicroVmProviderState> {
        Ok(lock(&self.states)
            .get(id)
            .copied()
            .unwrap_or(MicroVmProviderState::Pending))
    }

    async fn create(&self, vm: &MicroVm) -> Result<()> {
        let id = vm.id.to_string();
        self.record("create", &id);

        let delay = *lock(&self.create_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("mock provider configured to fail create");
        }

        info!(
            vmid = %id,
            vcpu = vm.spec.vcpu,
            memory_mb = vm.spec.memory_mb,
            "[MOCK] Creating microvm"
        );

        let state = if self.capabilities.has(Capability::AutoStart) {
            MicroVmProviderState::Running
        } else {
            MicroVmProviderState::Stopped
        };
        self.set_state(&id, state);
        Ok(())
    }

    async fn start(&self, vm: &MicroVm) -> Result<()> {
        let id = vm.id.to_string();
        self.record("start", &id);

        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("mock provider configured to fail start");
        }

        info!(vmid = %id, "[MOCK] Starting microvm");
        self.set_state(&id, MicroVmProviderState::Running);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.record("delete", id);
        info!(vmid = %id, "[MOCK] Deleting microvm");
        lock(&self.states).remove(id);
        Ok(())
    }
}

/// Image service that "mounts" images by handing out synthetic paths.
#[derive(Debug, Default)]
pub struct MockImageService {
    mounted: Mutex<HashSet<(String, String)>>,
    pulls: Mutex<Vec<ImageMountSpec>>,
    no_mounts: bool,
    fail: AtomicBool,
}

impl MockImageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls succeed but produce no mounts.
    pub fn returning_no_mounts(mut self) -> Self {
        self.no_mounts = true;
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pulls(&self) -> Vec<ImageMountSpec> {
        lock(&self.pulls).clone()
    }

    /// Forget every mount, as after a host reboot.
    pub fn unmount_all(&self) {
        lock(&self.mounted).clear();
    }
}

#[async_trait]
impl ImageService for MockImageService {
    async fn pull_and_mount(&self, spec: &ImageMountSpec) -> Result<Vec<Mount>> {
        lock(&self.pulls).push(spec.clone());

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock image service configured to fail pulling {}", spec.image_name);
        }

        debug!(
            image = %spec.image_name,
            owner = %spec.owner,
            usage = ?spec.usage,
            "[MOCK] Pulling and mounting image"
        );

        if self.no_mounts {
            return Ok(vec![]);
        }

        lock(&self.mounted).insert((spec.owner.clone(), spec.owner_usage_id.clone()));

        let mount = match spec.usage {
            ImageUse::Volume => Mount {
                mount_type: MountType::Dev,
                source: format!(
                    "/dev/mapper/kiln-{}-{}",
                    spec.owner.replace('/', "-"),
                    spec.owner_usage_id
                ),
            },
            ImageUse::Kernel | ImageUse::Initrd => Mount {
                mount_type: MountType::HostPath,
                source: format!("/run/kiln/mounts/{}/{}", spec.owner, spec.owner_usage_id),
            },
        };
        Ok(vec![mount])
    }

    async fn is_mounted(&self, spec: &ImageMountSpec) -> Result<bool> {
        Ok(lock(&self.mounted).contains(&(spec.owner.clone(), spec.owner_usage_id.clone())))
    }
}

/// Network service keeping host devices in a map.
#[derive(Debug)]
pub struct MockNetworkService {
    ifaces: Mutex<BTreeMap<String, IfaceDetails>>,
    created: Mutex<Vec<IfaceCreateInput>>,
    next_index: AtomicU32,
    fail_create: AtomicBool,
}

impl Default for MockNetworkService {
    fn default() -> Self {
        Self {
            ifaces: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
            next_index: AtomicU32::new(1),
            fail_create: AtomicBool::new(false),
        }
    }
}

impl MockNetworkService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device as if it already existed on the host.
    pub fn add_existing(&self, name: &str, iface_type: IfaceType) -> IfaceDetails {
        let details = self.details_for(name, iface_type, None);
        lock(&self.ifaces).insert(name.to_string(), details.clone());
        details
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Create requests received so far.
    pub fn created(&self) -> Vec<IfaceCreateInput> {
        lock(&self.created).clone()
    }

    /// Names of devices currently present.
    pub fn devices(&self) -> Vec<String> {
        lock(&self.ifaces).keys().cloned().collect()
    }

    fn details_for(&self, name: &str, iface_type: IfaceType, mac: Option<&str>) -> IfaceDetails {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        IfaceDetails {
            device_name: name.to_string(),
            iface_type,
            mac: mac
                .map(str::to_string)
                .unwrap_or_else(|| format!("02:00:00:00:{:02x}:{:02x}", (index >> 8) & 0xff, index & 0xff)),
            index,
        }
    }
}

#[async_trait]
impl NetworkService for MockNetworkService {
    async fn iface_exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.ifaces).contains_key(name))
    }

    async fn iface_create(&self, input: IfaceCreateInput) -> Result<IfaceDetails> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("mock network configured to fail creating {}", input.device_name);
        }

        debug!(device = %input.device_name, iface_type = %input.iface_type, "[MOCK] Creating interface");

        let details = self.details_for(&input.device_name, input.iface_type, input.mac.as_deref());
        lock(&self.ifaces).insert(input.device_name.clone(), details.clone());
        lock(&self.created).push(input);
        Ok(details)
    }

    async fn iface_delete(&self, input: DeleteIfaceInput) -> Result<()> {
        debug!(device = %input.device_name, "[MOCK] Deleting interface");
        lock(&self.ifaces).remove(&input.device_name);
        Ok(())
    }

    async fn iface_details(&self, name: &str) -> Result<IfaceDetails> {
        lock(&self.ifaces)
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("interface {name} not found"))
    }
}
