//! Plan builders.
//!
//! A plan's step list is rebuilt from the VM's current spec and status on
//! every `create` call. A step is only included if its `should_do` holds at
//! build time, so a pass after a successful one yields an empty plan, and a
//! pass after a partial failure resumes at the step that failed.

mod create;
mod create_or_update;
mod delete;
mod update;

use anyhow::{Context, Result};
use kiln_reconcile::{BoxProcedure, Procedure};

use crate::models::MicroVm;

pub use create::MicroVmCreatePlan;
pub use create_or_update::MicroVmCreateOrUpdatePlan;
pub use delete::MicroVmDeletePlan;
pub use update::MicroVmUpdatePlan;

/// Plan names, as they appear in logs.
pub mod names {
    pub const MICROVM_CREATE: &str = "microvm_create";
    pub const MICROVM_CREATE_UPDATE: &str = "microvm_create_update";
    pub const MICROVM_UPDATE: &str = "microvm_update";
    pub const MICROVM_DELETE: &str = "microvm_delete";
}

/// Collects the steps that still need to run for one VM.
struct StepList<'a> {
    vm: &'a MicroVm,
    steps: Vec<BoxProcedure<MicroVm>>,
}

impl<'a> StepList<'a> {
    fn new(vm: &'a MicroVm) -> Self {
        Self { vm, steps: Vec::new() }
    }

    async fn add<P>(&mut self, step: P) -> Result<()>
    where
        P: Procedure<MicroVm> + 'static,
    {
        let should_do = step.should_do(self.vm).await.with_context(|| {
            format!("checking if step {} should be included in plan", step.name())
        })?;

        if should_do {
            self.steps.push(Box::new(step));
        }
        Ok(())
    }

    fn into_steps(self) -> Vec<BoxProcedure<MicroVm>> {
        self.steps
    }
}
