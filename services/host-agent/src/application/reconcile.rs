use anyhow::Context;
use async_trait::async_trait;
use kiln_events::{MicroVmEvent, TOPIC_MICROVM_EVENTS};
use kiln_id::VmId;
use kiln_reconcile::Plan;
use tracing::{debug, error, info, instrument, warn};

use super::{lock_key, App, AppError, ReconcileMicroVmsUseCase};
use crate::models::{MicroVm, MicroVmState};
use crate::plans::{MicroVmCreateOrUpdatePlan, MicroVmDeletePlan};
use crate::ports::GetOptions;

impl App {
    fn plan_for(&self, vm: &MicroVm) -> Box<dyn Plan<MicroVm>> {
        let root = self.config.root_state_dir.clone();
        if vm.spec.is_deleted() {
            Box::new(MicroVmDeletePlan::new(root, self.ports.clone()))
        } else {
            Box::new(MicroVmCreateOrUpdatePlan::new(root, self.ports.clone()))
        }
    }

    async fn reconcile(&self, mut vm: MicroVm) -> Result<(), AppError> {
        let plan = self.plan_for(&vm);
        let is_delete = vm.spec.is_deleted();

        if vm.status.retry > self.config.maximum_retry {
            let err = AppError::ReachedMaximumRetry {
                retry: vm.status.retry,
                maximum: self.config.maximum_retry,
            };
            error!(vmid = %vm.id, error = %err, "Giving up on microvm");

            if vm.status.state != MicroVmState::Failed {
                vm.status.state = MicroVmState::Failed;
                self.ports
                    .repo
                    .save(&vm)
                    .await
                    .context("saving failed microvm status")?;
            }
            return Ok(());
        }

        let now = self.ports.clock.now().timestamp();
        if vm.status.not_before > now {
            debug!(
                vmid = %vm.id,
                retry = vm.status.retry,
                wait_secs = vm.status.not_before - now,
                "Backing off before next pass"
            );
            return Ok(());
        }

        let before = vm.status.clone();
        let executed = match self.actuator.execute(&*plan, &mut vm, &self.cancel).await {
            Ok(executed) => executed,
            Err(err) if err.is_cancelled() => {
                warn!(vmid = %vm.id, "Plan interrupted by shutdown");
                self.ports
                    .repo
                    .save(&vm)
                    .await
                    .context("saving microvm status after interrupted pass")?;
                return Err(AppError::ExecutingPlan(err));
            }
            Err(err) => {
                self.reschedule(&mut vm).await?;
                return Err(AppError::ExecutingPlan(err));
            }
        };

        if is_delete {
            self.ports
                .repo
                .release_lease(&vm)
                .await
                .context("releasing microvm lease")?;
            self.ports
                .repo
                .delete(&vm)
                .await
                .context("deleting microvm spec")?;
            self.ports
                .events
                .publish(TOPIC_MICROVM_EVENTS, MicroVmEvent::deleted(&vm.id))
                .await
                .context("publishing microvm deleted event")?;

            info!(vmid = %vm.id, num_steps = executed, "MicroVM deleted");
            return Ok(());
        }

        if executed == 0 && vm.status == before {
            debug!(vmid = %vm.id, "MicroVM is up to date");
            return Ok(());
        }

        vm.status.retry = 0;
        vm.status.not_before = 0;
        vm.status.state = MicroVmState::Created;
        self.ports
            .repo
            .save(&vm)
            .await
            .context("saving microvm status")?;

        info!(vmid = %vm.id, num_steps = executed, "MicroVM reconciled");
        Ok(())
    }

    /// Records a failed pass and schedules the next one after the backoff.
    async fn reschedule(&self, vm: &mut MicroVm) -> Result<(), AppError> {
        vm.status.retry += 1;
        let wait = self.config.backoff_base * vm.status.retry;
        let wait_secs = i64::try_from(wait.as_secs()).unwrap_or(i64::MAX);
        vm.status.not_before = self
            .ports
            .clock
            .now()
            .timestamp()
            .saturating_add(wait_secs);

        warn!(
            vmid = %vm.id,
            retry = vm.status.retry,
            wait_secs,
            "Rescheduling microvm after failed pass"
        );

        self.ports
            .repo
            .save(vm)
            .await
            .context("saving microvm status after failed pass")?;

        let events = self.ports.events.clone();
        let id = vm.id.clone();
        let mut cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    debug!(vmid = %id, "Dropping rescheduled pass on shutdown");
                    return;
                }
            }
            if let Err(e) = events
                .publish(TOPIC_MICROVM_EVENTS, MicroVmEvent::updated(&id))
                .await
            {
                error!(vmid = %id, error = %e, "Failed to publish rescheduled microvm event");
            }
        });

        Ok(())
    }
}

#[async_trait]
impl ReconcileMicroVmsUseCase for App {
    #[instrument(skip(self), fields(vmid = %id))]
    async fn reconcile_microvm(&self, id: &VmId) -> Result<(), AppError> {
        let _guard = self.locks.lock(lock_key(id)).await;

        let vm = self
            .ports
            .repo
            .get(GetOptions::by_id(id))
            .await
            .context("getting microvm spec for reconcile")?;

        let Some(vm) = vm else {
            info!("MicroVM spec not found, nothing to reconcile");
            return Ok(());
        };

        debug!(state = %vm.status.state, retry = vm.status.retry, "Starting reconciliation");
        self.reconcile(vm).await
    }

    #[instrument(skip(self))]
    async fn resync_microvms(&self, namespace: Option<&str>) -> Result<Vec<VmId>, AppError> {
        let vms = self
            .ports
            .repo
            .get_all(namespace)
            .await
            .context("getting all microvm specs for resync")?;

        info!(count = vms.len(), "Resyncing microvm specs");
        Ok(vms.into_iter().map(|vm| vm.id).collect())
    }
}
