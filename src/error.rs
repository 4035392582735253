use thiserror::Error;

/// Result type for signal pipeline operations
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors that can occur in the acquisition and broadcast pipeline
#[derive(Debug, Error)]
pub enum SignalError {
    /// Device unreachable or connection parameters wrong. Recoverable; the
    /// session stays idle and the caller is told what to fix.
    #[error("device connection failed: {0}")]
    Connection(String),

    /// Streaming was requested before a successful connect.
    #[error("streaming requested before connect")]
    NotConnected,

    /// Not enough samples accumulated yet. Expected during warm-up.
    #[error("window too short for spectral analysis: {got} samples (need {need})")]
    InsufficientData { got: usize, need: usize },

    /// The spectral transform produced a non-finite result.
    #[error("spectral transform produced non-finite band powers")]
    Transform,

    /// A subscriber could not be delivered to; it gets pruned, the sweep
    /// continues.
    #[error("subscriber delivery failed: {0}")]
    Delivery(String),
}
