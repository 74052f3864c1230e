//! Actuator errors.

use thiserror::Error;

/// Errors returned by [`crate::Actuator::execute`].
///
/// Each variant names the plan or step that failed and keeps the
/// underlying error as its source so callers can classify it.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The plan could not compute its steps.
    #[error("creating plan for {plan}: {source:#}")]
    CreatePlan {
        plan: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step's predicate failed.
    #[error("checking if step {step} should be executed: {source:#}")]
    ShouldDo {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step's action failed.
    #[error("executing step {step}: {source:#}")]
    Execute {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// Shutdown was signalled before the step could run.
    #[error("execution cancelled before step {step}")]
    Cancelled { step: String },
}

impl ActuatorError {
    /// Name of the step that failed, if the failure was step-scoped.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::CreatePlan { .. } => None,
            Self::ShouldDo { step, .. } | Self::Execute { step, .. } | Self::Cancelled { step } => {
                Some(step)
            }
        }
    }

    /// The original error, if any.
    pub fn inner(&self) -> Option<&anyhow::Error> {
        match self {
            Self::CreatePlan { source, .. }
            | Self::ShouldDo { source, .. }
            | Self::Execute { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
