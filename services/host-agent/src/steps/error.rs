use thiserror::Error;

/// Errors raised by the built-in steps themselves.
///
/// Port failures are passed through as `anyhow` errors with context instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("status information missing for {0}")]
    MissingStatusInfo(String),

    #[error("guest device name is required")]
    GuestDeviceNameRequired,

    #[error("kernel image is required")]
    KernelImageRequired,

    #[error("no mount returned for image {0}")]
    NoMount(String),

    #[error("no guest device name left for additional volume {0}")]
    GuestDevicesExhausted(usize),
}
