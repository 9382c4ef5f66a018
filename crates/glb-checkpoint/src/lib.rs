//! glb-checkpoint — durable checkpoint sink for the resilient scheduler.
//!
//! Backed by [redb](https://docs.rs/redb). Each logical worker slot owns
//! one [`SlotRecord`]: the JSON-serialized image of its work queue, bags
//! and collected partial folds together. Writes are last-writer-wins and
//! idempotent on retry, so failure detection racing an in-flight
//! checkpoint is harmless.
//!
//! The one operation with multi-key semantics is
//! [`CheckpointStore::transfer`]: a victim's remaining snapshot and the
//! fragment it hands to a thief are committed in a single write
//! transaction, so a crash can never lose or duplicate the fragment.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{CheckpointError, CheckpointResult};
pub use store::CheckpointStore;
pub use types::SlotRecord;
