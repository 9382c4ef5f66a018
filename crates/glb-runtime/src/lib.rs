//! glb-runtime — an in-process rendition of the asynchronous place/task
//! runtime the scheduler is written against.
//!
//! Places are stable integer ids. Remote invocation is fire-and-forget
//! task spawning; completion detection is a barrier that waits for all
//! transitively-spawned *counted* tasks across all places. Locality is
//! simulated: every task runs on its own thread in this process, and a
//! message sent to a dead place is silently lost, exactly as it would be
//! over a real transport.
//!
//! Failure injection ([`LocalRuntime::kill`]) drives the resilient
//! scheduler's tests: it marks a place dead, records the death in the
//! barrier currently in flight, and fires every registered
//! place-failure handler.

pub mod error;
pub mod finish;
pub mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use runtime::LocalRuntime;
