//! Per-place work queue — a collection of bags keyed by payload kind.
//!
//! The queue drains kinds round-robin and splits first-fit: policy, not a
//! hard invariant. Empty bags are retained until [`BagQueue::reset`] so the
//! partial results they accumulated survive to the gather phase.

use crate::bag::{Bag, Fold, WorkCollector};

/// Buffer capturing what a bag hands back while it is checked out of the
/// queue for processing.
struct Harvest<B: Bag> {
    bags: Vec<B>,
    folds: Vec<B::Result>,
}

impl<B: Bag> WorkCollector<B> for Harvest<B> {
    fn give_bag(&mut self, bag: B) {
        self.bags.push(bag);
    }

    fn give_fold(&mut self, fold: B::Result) {
        self.folds.push(fold);
    }
}

/// Mapping from payload-type kind to bag, with a round-robin cursor for
/// fair draining across kinds.
pub struct BagQueue<B: Bag> {
    bags: Vec<B>,
    /// Index of the bag currently being drained.
    cursor: usize,
    /// Partial results handed back by bags during processing.
    folds: Vec<B::Result>,
}

impl<B: Bag> Default for BagQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bag> BagQueue<B> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            bags: Vec::new(),
            cursor: 0,
            folds: Vec::new(),
        }
    }

    /// Add a bag, merging it into an existing entry of the same kind.
    pub fn give(&mut self, bag: B) {
        for existing in &mut self.bags {
            if existing.kind() == bag.kind() {
                existing.merge(bag);
                return;
            }
        }
        self.bags.push(bag);
    }

    /// True when no bag holds pending items. Advances the cursor to the
    /// next kind with work, if any.
    pub fn is_empty(&mut self) -> bool {
        if self.bags.is_empty() {
            return true;
        }
        let start = self.cursor;
        if !self.bags[self.cursor].is_empty() {
            return false;
        }
        loop {
            self.cursor = (self.cursor + 1) % self.bags.len();
            if !self.bags[self.cursor].is_empty() {
                return false;
            }
            if self.cursor == start {
                return true;
            }
        }
    }

    /// Process up to `work_amount` items from the cursor's bag, re-queueing
    /// anything the bag hands back.
    pub fn process(&mut self, work_amount: usize) {
        if self.bags.is_empty() {
            return;
        }
        let mut harvest = Harvest {
            bags: Vec::new(),
            folds: Vec::new(),
        };
        self.bags[self.cursor].process(work_amount, &mut harvest);
        for bag in harvest.bags {
            self.give(bag);
        }
        self.folds.append(&mut harvest.folds);
    }

    /// Split off a fragment from the first bag that can give one.
    pub fn split(&mut self) -> Option<B> {
        self.bags.iter_mut().find_map(|bag| bag.split())
    }

    /// Fold every bag's partial result, plus collected fold contributions,
    /// into `result`. Empty bags still carry progress and are included.
    pub fn fold_into(&mut self, result: &mut B::Result) {
        for bag in &self.bags {
            bag.submit(result);
        }
        for fold in self.folds.drain(..) {
            result.fold(fold);
        }
    }

    /// Snapshot of the queue's bags, for checkpointing.
    pub fn bags(&self) -> &[B] {
        &self.bags
    }

    /// Partial results collected from bags during processing, for
    /// checkpointing alongside the bags.
    pub fn folds(&self) -> &[B::Result] {
        &self.folds
    }

    /// Re-queue a previously collected partial result, when rebuilding a
    /// queue from a checkpoint.
    pub fn give_fold(&mut self, fold: B::Result) {
        self.folds.push(fold);
    }

    /// Number of distinct payload kinds held.
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    /// Drop all content and rewind the cursor.
    pub fn reset(&mut self) {
        self.bags.clear();
        self.folds.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{IntervalBag, Sum};
    use serde::{Deserialize, Serialize};

    /// Interval bag with a configurable kind tag, to exercise multi-kind
    /// queues without a full enum payload.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tagged {
        tag: String,
        inner: IntervalBag,
    }

    impl Tagged {
        fn new(tag: &'static str, items: u64) -> Self {
            Self {
                tag: tag.to_string(),
                inner: IntervalBag::new(items),
            }
        }
    }

    impl Bag for Tagged {
        type Result = Sum;

        fn kind(&self) -> &'static str {
            // Tests only ever use these two tags.
            if self.tag == "alpha" { "alpha" } else { "beta" }
        }

        fn process(&mut self, work_amount: usize, collector: &mut dyn WorkCollector<Self>) {
            self.inner.process(work_amount, &mut Forward(collector));
        }

        fn split(&mut self) -> Option<Self> {
            self.inner.split().map(|inner| Self {
                tag: self.tag.clone(),
                inner,
            })
        }

        fn merge(&mut self, other: Self) {
            self.inner.merge(other.inner);
        }

        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }

        fn submit(&self, result: &mut Sum) {
            self.inner.submit(result);
        }
    }

    /// Adapts a `Tagged` collector into an `IntervalBag` collector.
    struct Forward<'a>(&'a mut dyn WorkCollector<Tagged>);

    impl WorkCollector<IntervalBag> for Forward<'_> {
        fn give_bag(&mut self, bag: IntervalBag) {
            self.0.give_bag(Tagged {
                tag: "alpha".to_string(),
                inner: bag,
            });
        }

        fn give_fold(&mut self, fold: Sum) {
            self.0.give_fold(fold);
        }
    }

    #[test]
    fn empty_queue_is_empty() {
        let mut queue: BagQueue<IntervalBag> = BagQueue::new();
        assert!(queue.is_empty());
        assert!(queue.split().is_none());
    }

    #[test]
    fn same_kind_bags_merge() {
        let mut queue = BagQueue::new();
        queue.give(IntervalBag::new(10));
        queue.give(IntervalBag::new(5));
        assert_eq!(queue.len(), 1);

        let mut total = Sum(0);
        queue.process(100);
        queue.fold_into(&mut total);
        assert_eq!(total.0, 15);
    }

    #[test]
    fn distinct_kinds_kept_apart() {
        let mut queue = BagQueue::new();
        queue.give(Tagged::new("alpha", 10));
        queue.give(Tagged::new("beta", 10));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn round_robin_advances_past_drained_kind() {
        let mut queue = BagQueue::new();
        queue.give(Tagged::new("alpha", 3));
        queue.give(Tagged::new("beta", 3));

        // Drain alpha completely; cursor must move on to beta.
        queue.process(3);
        assert!(!queue.is_empty());
        queue.process(3);
        assert!(queue.is_empty());

        let mut total = Sum(0);
        queue.fold_into(&mut total);
        assert_eq!(total.0, 6);
    }

    #[test]
    fn split_is_first_fit() {
        let mut queue = BagQueue::new();
        queue.give(Tagged::new("alpha", 1)); // too small to split
        queue.give(Tagged::new("beta", 8));

        let fragment = queue.split().unwrap();
        assert_eq!(fragment.kind(), "beta");
    }

    #[test]
    fn empty_bags_retain_progress_until_reset() {
        let mut queue = BagQueue::new();
        queue.give(IntervalBag::new(4));
        queue.process(4);
        assert!(queue.is_empty());

        let mut total = Sum(0);
        queue.fold_into(&mut total);
        assert_eq!(total.0, 4);

        queue.reset();
        let mut after = Sum(0);
        queue.fold_into(&mut after);
        assert_eq!(after.0, 0);
    }

    #[test]
    fn fold_into_combines_bag_progress_and_collected_folds() {
        let mut queue = BagQueue::new();
        queue.give(IntervalBag::new(3));
        queue.process(3);
        queue.give_fold(Sum(10));
        queue.give_fold(Sum(-4));

        let mut total = Sum(0);
        queue.fold_into(&mut total);
        assert_eq!(total, Sum(9));
    }

    #[test]
    fn collected_folds_survive_snapshot_and_restore() {
        let mut queue = BagQueue::new();
        queue.give(IntervalBag::new(3));
        queue.process(3);
        queue.give_fold(Sum(5));
        assert_eq!(queue.folds(), &[Sum(5)]);

        // Rebuild from the snapshots, as a checkpoint reload does.
        let mut rebuilt: BagQueue<IntervalBag> = BagQueue::new();
        for bag in queue.bags() {
            rebuilt.give(bag.clone());
        }
        for fold in queue.folds() {
            rebuilt.give_fold(*fold);
        }

        let mut total = Sum(0);
        rebuilt.fold_into(&mut total);
        assert_eq!(total, Sum(8));
    }

    #[test]
    fn work_conservation_through_split_and_merge() {
        let mut bag = IntervalBag::new(100);
        let mut fragments = Vec::new();
        for _ in 0..5 {
            if let Some(f) = bag.split() {
                fragments.push(f);
            }
        }
        let total: u64 = bag.pending() + fragments.iter().map(|f| f.pending()).sum::<u64>();
        assert_eq!(total, 100);

        for f in fragments {
            bag.merge(f);
        }
        assert_eq!(bag.pending(), 100);
    }
}
