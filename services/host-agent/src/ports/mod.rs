//! Ports: the interfaces reconciliation uses to reach the outside world.
//!
//! Adapters in this crate implement them for the local host; tests swap in
//! the in-process fakes from [`crate::mock`]. Everything is bundled in
//! [`Ports`] and handed to the application at construction.

mod repository;
mod services;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

pub use repository::{GetOptions, MicroVmRepository};
pub use services::{
    Clock, DeleteIfaceInput, EventService, FileSystem, IfaceCreateInput, IfaceDetails,
    ImageMountSpec, ImageService, MicroVmProviderState, MicroVmService, NetworkService,
    Subscription, SystemClock,
};

/// Every port the application depends on.
#[derive(Clone)]
pub struct Ports {
    pub repo: Arc<dyn MicroVmRepository>,
    pub events: Arc<dyn EventService>,
    pub network: Arc<dyn NetworkService>,
    pub images: Arc<dyn ImageService>,
    /// Hypervisor providers keyed by name.
    pub providers: HashMap<String, Arc<dyn MicroVmService>>,
    pub fs: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Looks up a provider by name.
    pub fn provider(&self, name: &str) -> Result<Arc<dyn MicroVmService>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("microvm provider {name} isn't available"))
    }
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.providers.keys().collect();
        providers.sort();
        f.debug_struct("Ports")
            .field("providers", &providers)
            .finish_non_exhaustive()
    }
}
