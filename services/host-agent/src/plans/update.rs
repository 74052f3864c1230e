use anyhow::Result;
use async_trait::async_trait;
use kiln_reconcile::{BoxProcedure, Plan};

use super::names;
use crate::models::MicroVm;

/// Update-only plan. Always empty: spec changes of a live VM are handled by
/// [`MicroVmCreateOrUpdatePlan`](super::MicroVmCreateOrUpdatePlan).
#[derive(Debug, Default)]
pub struct MicroVmUpdatePlan;

impl MicroVmUpdatePlan {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plan<MicroVm> for MicroVmUpdatePlan {
    fn name(&self) -> &str {
        names::MICROVM_UPDATE
    }

    async fn create(&self, _vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        Ok(vec![])
    }
}
