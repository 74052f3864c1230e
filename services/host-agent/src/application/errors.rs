use kiln_id::IdError;
use kiln_reconcile::ActuatorError;
use thiserror::Error;

/// Errors returned by the application use cases.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("microvm spec with uid {uid} not found")]
    SpecNotFound { uid: String },

    #[error("microvm spec {namespace}/{name} already exists")]
    SpecAlreadyExists { name: String, namespace: String },

    #[error("uid is required")]
    UidRequired,

    #[error("reached maximum number of retries ({retry} > {maximum})")]
    ReachedMaximumRetry { retry: u32, maximum: u32 },

    #[error("microvm provider {0} isn't available")]
    ProviderUnavailable(String),

    #[error("invalid microvm id: {0}")]
    InvalidId(#[from] IdError),

    #[error("executing plan: {0}")]
    ExecutingPlan(#[source] ActuatorError),

    #[error("{0:#}")]
    Port(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller asked for something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SpecNotFound { .. })
    }
}
