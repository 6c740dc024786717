//! Error types for the scheduler.

use elastic_persist::PersistError;
use elastic_scaling::ScalingError;
use thiserror::Error;

/// Errors raised by the scheduler outside of a single evaluation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// State could not be loaded or saved.
    #[error("state error: {0}")]
    State(#[from] PersistError),

    /// The scaling engine rejected a request.
    #[error("scaling error: {0}")]
    Scaling(#[from] ScalingError),

    /// A background evaluation task failed.
    #[error("task error: {0}")]
    Task(String),

    /// Output could not be written.
    #[error("output error: {0}")]
    Output(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
