//! Scheduler error types.

use zinc_core::RequestId;

/// Scheduler error type.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// The request is already queued in the scheduler.
    #[error("request {id} is already queued")]
    DuplicateRequest {
        /// The request ID.
        id: RequestId,
    },

    /// The scheduler was detached while it still owned requests.
    #[error("detached with work outstanding: {queued} queued, {throttled} throttled, {in_flight} in flight")]
    NotDrained {
        /// Requests still queued in tier structures.
        queued: usize,
        /// Commands still waiting in throttled channels.
        throttled: usize,
        /// Requests dispatched but never completed.
        in_flight: usize,
    },

    /// Configuration could not be interpreted.
    #[error("configuration error: {0}")]
    Config(#[from] zinc_core::Error),
}

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;
