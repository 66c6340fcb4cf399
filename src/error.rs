// src/error.rs
use thiserror::Error;

/// Failure kinds surfaced by session and run-log operations.
///
/// A dismissed path prompt is not an error: operations take the prompt
/// outcome as an `Option` and treat `None` as a no-op.
#[derive(Debug, Error)]
pub enum Error {
    /// A required field was empty or an operation was invoked out of order.
    #[error("{0}")]
    Validation(String),

    #[error("No run has been started. Click Start Run")]
    NoActiveRun,

    /// Camera absent, stream rejected, or the driver refused an operation.
    #[error("Camera error: {0}")]
    Device(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
