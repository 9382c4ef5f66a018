//! Scheduler error types.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type GlbResult<T> = Result<T, GlbError>;

/// Errors that can occur while setting up or driving a computation.
#[derive(Debug, Error)]
pub enum GlbError {
    #[error("lifeline topology rejected: {0}")]
    Topology(#[from] glb_core::CoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] glb_runtime::RuntimeError),

    #[error("seed place {place} out of range for {places} places")]
    SeedOutOfRange { place: usize, places: usize },

    #[error("no result at the coordinator place")]
    ResultMissing,
}
