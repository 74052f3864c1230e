//! MicroVM controller.
//!
//! Turns spec events into reconciliation passes:
//! - a listener task routes events into a deduplicating work queue and
//!   triggers a periodic resync
//! - worker tasks pull VM IDs off the queue and reconcile them
//!
//! Resyncs queue every listed VM directly instead of going through the
//! event stream, so a resync larger than the event buffer loses nothing.
//! The controller subscribes before the start-up resync so that no event
//! published while it runs is missed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_events::{EventEnvelope, MicroVmEvent, TOPIC_MICROVM_EVENTS};
use kiln_id::VmId;
use kiln_reconcile::{CancelToken, WorkQueue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::application::ReconcileMicroVmsUseCase;
use crate::ports::{EventService, Subscription};

/// Default number of reconcile workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default interval between full resyncs.
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub workers: usize,
    pub resync_period: Duration,
    pub resync_on_start: bool,
    /// Only resync this namespace. All namespaces when `None`.
    pub namespace: Option<String>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            resync_period: DEFAULT_RESYNC_PERIOD,
            resync_on_start: true,
            namespace: None,
        }
    }
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// Routes microVM events to reconcile workers.
pub struct MicroVmController {
    events: Arc<dyn EventService>,
    reconcile_uc: Arc<dyn ReconcileMicroVmsUseCase>,
    queue: Arc<WorkQueue<String>>,
    state_tx: watch::Sender<ControllerState>,
}

impl std::fmt::Debug for MicroVmController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroVmController")
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl MicroVmController {
    pub fn new(
        events: Arc<dyn EventService>,
        reconcile_uc: Arc<dyn ReconcileMicroVmsUseCase>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ControllerState::NotStarted);
        Self {
            events,
            reconcile_uc,
            queue: Arc::new(WorkQueue::new()),
            state_tx,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// Runs until `shutdown` flips to `true`, then drains and stops.
    #[instrument(skip_all, fields(workers = options.workers))]
    pub async fn run(
        &self,
        shutdown: watch::Receiver<bool>,
        options: ControllerOptions,
    ) -> Result<()> {
        if self.state() != ControllerState::NotStarted {
            anyhow::bail!("controller already started");
        }

        let subscription = self
            .events
            .subscribe_topic(TOPIC_MICROVM_EVENTS)
            .await
            .context("subscribing to microvm events")?;

        self.state_tx.send_replace(ControllerState::Running);
        info!("Starting microvm controller");

        if options.resync_on_start {
            resync(
                &self.queue,
                self.reconcile_uc.as_ref(),
                options.namespace.as_deref(),
            )
            .await;
        }

        let listener = tokio::spawn(listen(
            subscription,
            self.queue.clone(),
            self.reconcile_uc.clone(),
            options.clone(),
            CancelToken::new(shutdown.clone()),
        ));

        let workers: Vec<JoinHandle<()>> = (0..options.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    self.queue.clone(),
                    self.reconcile_uc.clone(),
                ))
            })
            .collect();

        CancelToken::new(shutdown).cancelled().await;

        info!("Shutting down microvm controller");
        self.state_tx.send_replace(ControllerState::ShuttingDown);
        self.queue.shutdown();

        if let Err(e) = listener.await {
            error!(error = %e, "Event listener task failed");
        }
        for (worker, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker, error = %e, "Worker task failed");
            }
        }

        self.state_tx.send_replace(ControllerState::Stopped);
        info!("Microvm controller stopped");
        Ok(())
    }
}

/// Enqueues the VM an event refers to. Returns whether anything was queued.
pub(crate) fn handle_event(queue: &WorkQueue<String>, envelope: &EventEnvelope) -> bool {
    match &envelope.event {
        MicroVmEvent::SpecDeleted(data) => {
            debug!(name = %data.id, namespace = %data.namespace, "Ignoring spec deleted event");
            false
        }
        MicroVmEvent::SpecCreated(data) | MicroVmEvent::SpecUpdated(data) => match data.vmid() {
            Ok(id) => {
                debug!(
                    vmid = %id,
                    event_type = envelope.event.event_type(),
                    "Queueing microvm for reconcile"
                );
                queue.enqueue(id.to_string())
            }
            Err(e) => {
                error!(name = %data.id, namespace = %data.namespace, error = %e, "Invalid microvm id in event");
                false
            }
        },
    }
}

/// Queues every VM the use case lists. Returns how many were newly queued.
async fn resync(
    queue: &WorkQueue<String>,
    reconcile_uc: &dyn ReconcileMicroVmsUseCase,
    namespace: Option<&str>,
) -> usize {
    match reconcile_uc.resync_microvms(namespace).await {
        Ok(ids) => {
            let queued = ids
                .iter()
                .filter(|id| queue.enqueue(id.to_string()))
                .count();
            debug!(listed = ids.len(), queued, "Resync queued microvms");
            queued
        }
        Err(e) => {
            error!(error = %e, "Failed to resync microvms");
            0
        }
    }
}

async fn listen(
    mut subscription: Subscription,
    queue: Arc<WorkQueue<String>>,
    reconcile_uc: Arc<dyn ReconcileMicroVmsUseCase>,
    options: ControllerOptions,
    mut cancel: CancelToken,
) {
    let period = options.resync_period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut events_open = true;
    let mut errors_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.events.recv(), if events_open => match event {
                Some(envelope) => {
                    handle_event(&queue, &envelope);
                }
                None => {
                    warn!("Event stream closed, relying on periodic resync");
                    events_open = false;
                }
            },
            err = subscription.errors.recv(), if errors_open => match err {
                Some(e) => error!(error = %e, "Error from event stream"),
                None => errors_open = false,
            },
            _ = ticker.tick() => {
                debug!("Periodic resync");
                resync(&queue, reconcile_uc.as_ref(), options.namespace.as_deref()).await;
            }
        }
    }

    debug!("Event listener stopped");
}

async fn run_worker(
    worker: usize,
    queue: Arc<WorkQueue<String>>,
    reconcile_uc: Arc<dyn ReconcileMicroVmsUseCase>,
) {
    debug!(worker, "Worker started");

    while let Some(item) = queue.dequeue().await {
        let id = match VmId::parse(&item) {
            Ok(id) => id,
            Err(e) => {
                error!(worker, item = %item, error = %e, "Skipping invalid queue item");
                continue;
            }
        };

        if let Err(e) = reconcile_uc.reconcile_microvm(&id).await {
            error!(worker, vmid = %id, error = %e, "Failed to reconcile microvm, requeueing");
            queue.enqueue(item);
        }
    }

    debug!(worker, "Worker stopped");
}
