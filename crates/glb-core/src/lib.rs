//! glb-core — contracts and data structures for lifeline-based global
//! load balancing.
//!
//! A computation is described by two application-supplied capabilities:
//!
//! - [`Bag`] — a splittable, mergeable container of pending work items
//! - [`Fold`] — a commutative-associative accumulator for computed output
//!
//! Each place (worker process) keeps its bags in a [`BagQueue`], keyed by
//! the bag's payload-type tag, and drains them round-robin. When random
//! stealing fails, a place falls back on a statically configured
//! [`LifelineStrategy`] — a directed graph over place ids that must be
//! strongly connected for the scheduler's liveness guarantee to hold.

pub mod bag;
pub mod error;
pub mod payload;
pub mod queue;
pub mod topology;

pub use bag::{Bag, Fold, WorkCollector};
pub use error::{CoreError, CoreResult};
pub use payload::{IntervalBag, Sum};
pub use queue::BagQueue;
pub use topology::{Hypercube, LifelineStrategy, Ring, validate};
