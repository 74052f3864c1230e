use anyhow::Context;
use async_trait::async_trait;
use kiln_id::VmId;
use tracing::debug;

use super::{App, AppError, MicroVmQueryUseCases};
use crate::models::{MicroVm, RuntimeStatus};
use crate::ports::{GetOptions, MicroVmProviderState};

#[async_trait]
impl MicroVmQueryUseCases for App {
    async fn get_microvm(&self, uid: &str) -> Result<MicroVm, AppError> {
        if uid.is_empty() {
            return Err(AppError::UidRequired);
        }

        self.ports
            .repo
            .get(GetOptions::by_uid(uid))
            .await
            .context("getting microvm spec")?
            .ok_or_else(|| AppError::SpecNotFound {
                uid: uid.to_string(),
            })
    }

    async fn get_all_microvm(&self, namespace: Option<&str>) -> Result<Vec<MicroVm>, AppError> {
        Ok(self
            .ports
            .repo
            .get_all(namespace)
            .await
            .context("getting all microvm specs")?)
    }

    async fn get_microvm_status(&self, id: &VmId) -> Result<RuntimeStatus, AppError> {
        let Some(vm) = self
            .ports
            .repo
            .get(GetOptions::by_id(id))
            .await
            .context("getting microvm spec for status")?
        else {
            debug!(vmid = %id, "No microvm spec for status");
            return Ok(RuntimeStatus::Unknown);
        };

        if vm.spec.is_deleted() {
            return Ok(RuntimeStatus::Deleting);
        }

        let provider = self
            .ports
            .provider(&vm.spec.provider)
            .map_err(|_| AppError::ProviderUnavailable(vm.spec.provider.clone()))?;
        let state = provider
            .state(&vm.id.to_string())
            .await
            .context("getting microvm state")?;

        Ok(match state {
            MicroVmProviderState::Pending => RuntimeStatus::Pending,
            MicroVmProviderState::Stopped => RuntimeStatus::Stopped,
            MicroVmProviderState::Running => RuntimeStatus::Running,
            MicroVmProviderState::Unknown => RuntimeStatus::Unknown,
        })
    }
}
