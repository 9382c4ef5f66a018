//! Error types for glb-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by core data structures and topology validation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lifeline graph has a self-loop at place {0}")]
    SelfLoop(usize),

    #[error("lifeline edge {from} -> {to} has no matching reverse entry")]
    ReverseMismatch { from: usize, to: usize },

    #[error("lifeline edge target {to} out of range for {places} places")]
    EdgeOutOfRange { to: usize, places: usize },

    #[error("lifeline graph not strongly connected: place {unreached} unreachable from place {from}")]
    NotConnected { from: usize, unreached: usize },
}
