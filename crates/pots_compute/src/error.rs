//! Error types for pots_compute.

/// Result type for compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Errors raised while resolving a device request.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// A requested device identifier does not exist on this host.
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// A device list was given but is empty.
    #[error("Device list is empty")]
    EmptyDeviceList,

    /// The device request is malformed.
    #[error("Invalid device specification: {0}")]
    InvalidSpec(String),

    /// No device at all is available.
    #[error("No compute device available")]
    NoDevice,
}
