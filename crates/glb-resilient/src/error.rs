//! Resilient-layer error types.

use thiserror::Error;

/// Result type alias for resilient operations.
pub type ResilientResult<T> = Result<T, ResilientError>;

/// Errors from the checkpointing scheduler and its wave driver.
#[derive(Debug, Error)]
pub enum ResilientError {
    #[error("lifeline topology rejected: {0}")]
    Topology(#[from] glb_core::CoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] glb_runtime::RuntimeError),

    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] glb_checkpoint::CheckpointError),

    #[error("group of {size} slots does not fit {places} places")]
    GroupTooLarge { size: usize, places: usize },

    #[error("no spare place left to replace slot {slot}")]
    SparesExhausted { slot: usize },

    #[error("seed slot {slot} out of range for {slots} slots")]
    SeedOutOfRange { slot: usize, slots: usize },

    #[error("no result at the coordinator slot")]
    ResultMissing,

    /// A worker stopped at a safe point because its wave was aborted.
    #[error("wave aborted")]
    Aborted,
}
