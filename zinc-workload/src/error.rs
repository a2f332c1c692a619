//! Error types for simulation runs.

use thiserror::Error;
use zinc_sched::SchedError;

/// Result type for simulation runs.
pub type WorkloadResult<T> = std::result::Result<T, WorkloadError>;

/// Errors that abort a simulation run. Scheduler misbehavior is reported
/// as violations instead.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The scheduler rejected an operation.
    #[error("scheduler error: {0}")]
    Sched(#[from] SchedError),

    /// A latency histogram could not be created.
    #[error("histogram creation failed: {0:?}")]
    Histogram(hdrhistogram::errors::CreationError),
}

impl From<hdrhistogram::errors::CreationError> for WorkloadError {
    fn from(e: hdrhistogram::errors::CreationError) -> Self {
        Self::Histogram(e)
    }
}
