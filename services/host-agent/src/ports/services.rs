use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_events::{EventEnvelope, EventError, MicroVmEvent};
use tokio::sync::mpsc;

use crate::models::{Capabilities, IfaceType, ImageUse, MicroVm, Mount};

/// Receiving side of a topic subscription.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::Receiver<EventEnvelope>,
    pub errors: mpsc::Receiver<EventError>,
}

/// Publish/subscribe for microVM spec events.
#[async_trait]
pub trait EventService: Send + Sync {
    async fn publish(&self, topic: &str, event: MicroVmEvent) -> Result<()>;

    async fn subscribe_topic(&self, topic: &str) -> Result<Subscription>;
}

/// Input for [`NetworkService::iface_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceCreateInput {
    pub device_name: String,
    pub iface_type: IfaceType,
    pub mac: Option<String>,
    /// Attach the device to `bridge_name`.
    pub attach: bool,
    pub bridge_name: Option<String>,
}

/// Host interface as reported by the network service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IfaceDetails {
    pub device_name: String,
    pub iface_type: IfaceType,
    pub mac: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteIfaceInput {
    pub device_name: String,
}

/// Host network devices.
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn iface_exists(&self, name: &str) -> Result<bool>;

    async fn iface_create(&self, input: IfaceCreateInput) -> Result<IfaceDetails>;

    async fn iface_delete(&self, input: DeleteIfaceInput) -> Result<()>;

    async fn iface_details(&self, name: &str) -> Result<IfaceDetails>;
}

/// What to pull and who it is mounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMountSpec {
    pub image_name: String,
    /// VM ID string of the owning VM.
    pub owner: String,
    /// Volume ID, `kernel` or `initrd`.
    pub owner_usage_id: String,
    pub usage: ImageUse,
}

/// Image pulls and mounts.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn pull_and_mount(&self, spec: &ImageMountSpec) -> Result<Vec<Mount>>;

    async fn is_mounted(&self, spec: &ImageMountSpec) -> Result<bool>;
}

/// State of a VM as the hypervisor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroVmProviderState {
    /// Not created yet.
    Pending,
    Running,
    Stopped,
    Unknown,
}

impl std::fmt::Display for MicroVmProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A hypervisor provider.
#[async_trait]
pub trait MicroVmService: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// `id` is the VM ID string.
    async fn state(&self, id: &str) -> Result<MicroVmProviderState>;

    async fn create(&self, vm: &MicroVm) -> Result<()>;

    async fn start(&self, vm: &MicroVm) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Directory operations used by the state directory steps.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn is_dir(&self, path: &Path) -> Result<bool>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
