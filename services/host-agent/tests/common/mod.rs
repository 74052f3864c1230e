#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use kiln_host_agent::events::BroadcastEventService;
use kiln_host_agent::fs::MemoryFileSystem;
use kiln_host_agent::mock::{MockImageService, MockMicroVmService, MockNetworkService};
use kiln_host_agent::models::{
    Capabilities, ContainerVolumeSource, IfaceType, Kernel, MicroVm, MicroVmSpec,
    NetworkInterface, Volume, VolumeSource,
};
use kiln_host_agent::ports::{Clock, MicroVmService, Ports};
use kiln_host_agent::state::MemoryRepository;
use kiln_host_agent::{App, AppConfig};
use kiln_id::VmId;
use kiln_reconcile::BoxProcedure;

pub const PROVIDER: &str = "mock";
pub const STATE_DIR: &str = "/var/lib/kiln";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    pub fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }

    pub fn advance(&self, secs: i64) {
        *self.0.lock().unwrap() += Duration::seconds(secs);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Every port backed by an in-process fake.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub events: Arc<BroadcastEventService>,
    pub network: Arc<MockNetworkService>,
    pub images: Arc<MockImageService>,
    pub provider: Arc<MockMicroVmService>,
    pub fs: Arc<MemoryFileSystem>,
    pub clock: Arc<TestClock>,
    pub ports: Ports,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::none())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let events = Arc::new(BroadcastEventService::default());
        let network = Arc::new(MockNetworkService::new());
        let images = Arc::new(MockImageService::new());
        let provider = Arc::new(MockMicroVmService::with_capabilities(capabilities));
        let fs = Arc::new(MemoryFileSystem::new());
        let clock = Arc::new(TestClock::new());

        let mut providers: HashMap<String, Arc<dyn MicroVmService>> = HashMap::new();
        providers.insert(PROVIDER.to_string(), provider.clone());

        let ports = Ports {
            repo: repo.clone(),
            events: events.clone(),
            network: network.clone(),
            images: images.clone(),
            providers,
            fs: fs.clone(),
            clock: clock.clone(),
        };

        Self {
            repo,
            events,
            network,
            images,
            provider,
            fs,
            clock,
            ports,
        }
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            root_state_dir: STATE_DIR.into(),
            maximum_retry: 3,
            default_provider: PROVIDER.to_string(),
            ..AppConfig::default()
        }
    }

    pub fn app(&self) -> Arc<App> {
        Arc::new(App::new(self.app_config(), self.ports.clone()))
    }
}

/// A spec with a kernel, a container root volume and one tap interface.
pub fn vm_spec() -> MicroVmSpec {
    MicroVmSpec {
        provider: PROVIDER.to_string(),
        kernel: Kernel {
            image: "ghcr.io/kiln/kernel:6.1".to_string(),
            filename: Some("vmlinux".to_string()),
            ..Default::default()
        },
        vcpu: 2,
        memory_mb: 512,
        root_volume: Some(Volume {
            id: "root".to_string(),
            mount_point: "/".to_string(),
            source: VolumeSource {
                container: Some(ContainerVolumeSource {
                    image: "docker.io/library/ubuntu:22.04".to_string(),
                }),
            },
            ..Default::default()
        }),
        network_interfaces: vec![NetworkInterface {
            guest_device_name: "eth1".to_string(),
            interface_type: IfaceType::Tap,
            bridge_name: Some("br0".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn microvm(id: &str) -> MicroVm {
    MicroVm::new(VmId::parse(id).unwrap(), vm_spec())
}

pub fn step_names(steps: &[BoxProcedure<MicroVm>]) -> Vec<String> {
    steps.iter().map(|s| s.name().to_string()).collect()
}
