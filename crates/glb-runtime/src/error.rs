//! Error types for the place runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the place runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// One or more places died while a barrier round was in flight.
    #[error("places died during barrier: {0:?}")]
    PlacesDied(Vec<usize>),

    /// A counted task was spawned outside `run_under_barrier`.
    #[error("no barrier in flight for counted task at place {0}")]
    NoBarrier(usize),

    /// A place id outside the configured group.
    #[error("place {0} out of range for {1} places")]
    PlaceOutOfRange(usize, usize),
}
