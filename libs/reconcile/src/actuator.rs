//! Plan execution.
//!
//! The actuator runs a plan's procedures strictly in order. Later steps
//! read state written by earlier ones in the same pass, so nothing is run
//! concurrently and the first failure stops the pass. Whatever earlier steps
//! recorded in the state is left in place for the caller to persist.

use std::time::Instant;

use kiln_id::ExecutionId;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{ActuatorError, BoxProcedure, CancelToken, Plan};

/// Executes plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actuator;

impl Actuator {
    pub fn new() -> Self {
        Self
    }

    /// Execute `plan` against `state`.
    ///
    /// Returns the number of procedures whose action ran (follow-ups
    /// included). Procedures reporting `should_do == false` are skipped and
    /// not counted.
    pub async fn execute<S, P>(
        &self,
        plan: &P,
        state: &mut S,
        cancel: &CancelToken,
    ) -> Result<usize, ActuatorError>
    where
        S: Send + Sync,
        P: Plan<S> + ?Sized,
    {
        let execution_id = ExecutionId::new();
        let span = info_span!(
            "plan_execution",
            execution_id = %execution_id,
            plan_name = plan.name()
        );

        async move {
            let start = Instant::now();
            info!("Started executing plan");

            let mut executed = 0;
            let result = self.execute_plan(plan, state, cancel, &mut executed).await;
            let execution_time_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(()) => info!(
                    num_steps = executed,
                    execution_time_ms, "Finished executing plan"
                ),
                Err(e) => error!(
                    num_steps = executed,
                    execution_time_ms,
                    error = %e,
                    "Failed executing plan"
                ),
            }

            result.map(|()| executed)
        }
        .instrument(span)
        .await
    }

    async fn execute_plan<S, P>(
        &self,
        plan: &P,
        state: &mut S,
        cancel: &CancelToken,
        executed: &mut usize,
    ) -> Result<(), ActuatorError>
    where
        S: Send + Sync,
        P: Plan<S> + ?Sized,
    {
        let steps = plan
            .create(state)
            .await
            .map_err(|source| ActuatorError::CreatePlan {
                plan: plan.name().to_string(),
                source,
            })?;

        if steps.is_empty() {
            debug!("No steps to execute");
            return Ok(());
        }

        // Depth-first: follow-ups returned by a step run before the rest of
        // the list that contained it.
        let mut stack: Vec<std::vec::IntoIter<BoxProcedure<S>>> = vec![steps.into_iter()];

        while let Some(frame) = stack.last_mut() {
            let Some(step) = frame.next() else {
                stack.pop();
                continue;
            };

            if cancel.is_cancelled() {
                info!(step = step.name(), "Step not executed, plan execution cancelled");
                return Err(ActuatorError::Cancelled {
                    step: step.name().to_string(),
                });
            }

            let should_do =
                step.should_do(state)
                    .await
                    .map_err(|source| ActuatorError::ShouldDo {
                        step: step.name().to_string(),
                        source,
                    })?;

            if !should_do {
                debug!(step = step.name(), "Step already satisfied, skipping");
                continue;
            }

            debug!(step = step.name(), "Executing step");
            *executed += 1;

            let children = step
                .execute(state)
                .await
                .map_err(|source| ActuatorError::Execute {
                    step: step.name().to_string(),
                    source,
                })?;

            if !children.is_empty() {
                debug!(
                    step = step.name(),
                    children = children.len(),
                    "Step produced follow-up steps"
                );
                stack.push(children.into_iter());
            }
        }

        Ok(())
    }
}
