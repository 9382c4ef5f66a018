//! glb-scheduler — lifeline-based global load balancing.
//!
//! Each place runs one [`PlaceScheduler`]: a small state machine that
//! processes local work in fixed quanta, answers thieves at safe points,
//! and steals — first from random peers, then over the configured
//! lifeline graph — when its queue drains. There is no central
//! coordinator; all coordination is pairwise message exchange, and global
//! termination is detected by the runtime's counted-task barrier.
//!
//! # Architecture
//!
//! ```text
//! Glb (driver)
//!   ├── LocalRuntime (spawn_at / run_under_barrier)
//!   └── PlaceScheduler, one per place
//!       ├── PlaceState {Inactive, Running, Stealing(p)}
//!       ├── BagQueue (multi-kind local work)
//!       ├── thief FIFO + lifeline-thief registry
//!       └── Condvar rendezvous for the blocking random steal
//! ```

pub mod config;
pub mod error;
pub mod glb;
pub mod stats;
pub mod worker;

pub use config::GlbConfig;
pub use error::{GlbError, GlbResult};
pub use glb::Glb;
pub use stats::PlaceStats;
pub use worker::{PlaceScheduler, PlaceState};
