//! Record types stored per slot.

use serde::{Deserialize, Serialize};

use glb_core::Bag;

/// One slot's durable image: every bag of its work queue (drained ones
/// included, they carry accumulated progress) plus the partial results
/// its bags handed back through the collector. Both halves must be
/// persisted together or fold-channel progress is lost on recovery.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SlotRecord<B: Bag> {
    pub bags: Vec<B>,
    pub folds: Vec<B::Result>,
}

impl<B: Bag> SlotRecord<B> {
    /// A record holding only bags, no collected folds. Seed records start
    /// this way.
    pub fn from_bags(bags: Vec<B>) -> Self {
        Self {
            bags,
            folds: Vec::new(),
        }
    }
}

impl<B: Bag> Default for SlotRecord<B> {
    fn default() -> Self {
        Self {
            bags: Vec::new(),
            folds: Vec::new(),
        }
    }
}
