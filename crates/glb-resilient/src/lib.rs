//! glb-resilient — the failure-surviving variant of the lifeline
//! scheduler.
//!
//! Work is owned by logical slots; a [`PlaceGroup`] maps slots onto
//! physical places and repairs the mapping from spares when places die.
//! Each slot checkpoints its queue to a [`CheckpointStore`] on every
//! drain, and commits each split together with its own remaining snapshot
//! in one transaction, so the store always holds a loss- and
//! duplication-free image of the pending work. [`ResilientGlb`] runs the
//! computation in waves over that image until one wave survives intact.
//!
//! # Architecture
//!
//! ```text
//! ResilientGlb (wave driver)
//!   ├── PlaceGroup (slot -> place mapping + spares)
//!   ├── CheckpointStore (redb; one record per slot)
//!   └── ResilientWorker, one per slot per wave
//!       ├── WorkerState {Inactive, Running, Stealing(s), Aborting}
//!       ├── same steal protocol as glb-scheduler
//!       └── checkpoint on drain, transactional handoff on split
//! ```
//!
//! [`CheckpointStore`]: glb_checkpoint::CheckpointStore

pub mod error;
pub mod glb;
pub mod group;
pub mod worker;

pub use error::{ResilientError, ResilientResult};
pub use glb::ResilientGlb;
pub use group::PlaceGroup;
pub use worker::{ResilientWorker, Wave, WorkerState};
