//! kilnd - the kiln host agent daemon
//!
//! Watches microVM spec events and converges the host to match the stored
//! specs.
//!
//! ## Architecture
//!
//! - **Controller**: routes spec events into a work queue and resyncs periodically
//! - **Workers**: run one reconciliation pass per queued VM
//! - **Plans**: the idempotent steps a pass executes
//! - **Ports**: repository, event bus, network, images, providers (mock in dev mode)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_host_agent::config::Config;
use kiln_host_agent::events::BroadcastEventService;
use kiln_host_agent::fs::{LocalFileSystem, MemoryFileSystem};
use kiln_host_agent::mock::{MockImageService, MockMicroVmService, MockNetworkService};
use kiln_host_agent::network::TapNetworkService;
use kiln_host_agent::ports::{
    EventService, MicroVmRepository, MicroVmService, Ports, SystemClock,
};
use kiln_host_agent::state::{MemoryRepository, SqliteRepository};
use kiln_host_agent::{App, MicroVmController};
use kiln_reconcile::CancelToken;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        state_dir = %config.state_dir.display(),
        database_path = %config.database_path.display(),
        workers = config.workers,
        dev_mode = config.dev_mode,
        "Starting kiln host agent"
    );

    let ports = build_ports(&config)?;
    let events = ports.events.clone();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = Arc::new(
        App::new(config.app_config(), ports)
            .with_cancel_token(CancelToken::new(shutdown_rx.clone())),
    );

    let controller = MicroVmController::new(events, app);
    let mut controller_handle = tokio::spawn({
        let options = config.controller_options();
        let shutdown_rx = shutdown_rx.clone();
        async move { controller.run(shutdown_rx, options).await }
    });

    // Wait for shutdown signal
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut controller_handle => {
            match result {
                Ok(Ok(())) => info!("Controller exited"),
                Ok(Err(e)) => error!(error = %e, "Controller error"),
                Err(e) => error!(error = %e, "Controller task panicked"),
            }
            true
        }
    };

    // Signal shutdown to controller and running plans
    let _ = shutdown_tx.send(true);

    if !finished {
        info!("Waiting for controller to drain...");
        match controller_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Controller error during shutdown"),
            Err(e) => error!(error = %e, "Controller task panicked"),
        }
    }

    info!("Host agent shutdown complete");
    Ok(())
}

fn build_ports(config: &Config) -> Result<Ports> {
    let events: Arc<dyn EventService> = Arc::new(BroadcastEventService::default());

    // No hypervisor or image backends ship with the agent; providers are
    // registered by name and the in-process ones stand in for them.
    let mut providers: HashMap<String, Arc<dyn MicroVmService>> = HashMap::new();
    providers.insert(
        config.default_provider.clone(),
        Arc::new(MockMicroVmService::new()),
    );

    if config.dev_mode {
        info!("Dev mode: using in-memory repository, network and filesystem");
        return Ok(Ports {
            repo: Arc::new(MemoryRepository::new()),
            events,
            network: Arc::new(MockNetworkService::new()),
            images: Arc::new(MockImageService::new()),
            providers,
            fs: Arc::new(MemoryFileSystem::new()),
            clock: Arc::new(SystemClock),
        });
    }

    warn!(
        provider = %config.default_provider,
        "Using in-process microvm provider and image service"
    );

    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!("creating state directory {}", config.state_dir.display())
    })?;
    let repo: Arc<dyn MicroVmRepository> = Arc::new(
        SqliteRepository::open(&config.database_path).with_context(|| {
            format!("opening database {}", config.database_path.display())
        })?,
    );
    info!(path = %config.database_path.display(), "Database opened");

    Ok(Ports {
        repo,
        events,
        network: Arc::new(TapNetworkService::new()),
        images: Arc::new(MockImageService::new()),
        providers,
        fs: Arc::new(LocalFileSystem),
        clock: Arc::new(SystemClock),
    })
}
