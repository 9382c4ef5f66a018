//! Reference payloads — the smallest useful Bag/Fold pair.
//!
//! [`IntervalBag`] models a count of abstract, independent work items and
//! tallies how many it has processed; [`Sum`] folds those tallies. Used by
//! the scheduler crates' tests and as a template for real payloads.

use serde::{Deserialize, Serialize};

use crate::bag::{Bag, Fold, WorkCollector};

/// An additive result accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sum(pub i64);

impl Fold for Sum {
    fn fold(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// A bag of `pending` abstract items; processing an item just counts it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntervalBag {
    pending: u64,
    processed: u64,
}

impl IntervalBag {
    /// A bag holding `items` pending items and no progress.
    pub fn new(items: u64) -> Self {
        Self {
            pending: items,
            processed: 0,
        }
    }

    /// Items not yet processed.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Items processed so far by this bag.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl Bag for IntervalBag {
    type Result = Sum;

    fn kind(&self) -> &'static str {
        "interval"
    }

    fn process(&mut self, work_amount: usize, _collector: &mut dyn WorkCollector<Self>) {
        let n = (work_amount as u64).min(self.pending);
        self.pending -= n;
        self.processed += n;
    }

    fn split(&mut self) -> Option<Self> {
        if self.pending < 2 {
            return None;
        }
        let given = self.pending / 2;
        self.pending -= given;
        Some(Self {
            pending: given,
            processed: 0,
        })
    }

    fn merge(&mut self, other: Self) {
        self.pending += other.pending;
        self.processed += other.processed;
    }

    fn is_empty(&self) -> bool {
        self.pending == 0
    }

    fn submit(&self, result: &mut Sum) {
        result.0 += self.processed as i64;
    }
}
