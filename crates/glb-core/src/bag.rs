//! Bag and Fold contracts.
//!
//! These are the two capabilities an application payload must provide.
//! The scheduler never inspects work items; it only splits, merges, and
//! processes bags, and folds results at gather time.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A commutative-associative accumulator for computation output.
///
/// Folding any set of partial results in any order, under any partition,
/// must yield the same final value. The scheduler relies on this but does
/// not enforce it.
pub trait Fold: Clone + Send + Serialize + DeserializeOwned + 'static {
    /// Incorporate `other` into `self`.
    fn fold(&mut self, other: Self);
}

/// A splittable, mergeable container of pending work items.
///
/// Ownership of a bag's content transfers completely on every `split`,
/// `merge`, and cross-place transmission; no content is ever aliased
/// across places.
pub trait Bag: Send + Serialize + DeserializeOwned + Sized + 'static {
    /// The result type this bag contributes to at gather time.
    type Result: Fold;

    /// Payload-type tag. Bags with equal tags are merged into a single
    /// queue entry; distinct tags are drained round-robin.
    fn kind(&self) -> &'static str;

    /// Consume up to `work_amount` atomic items. Consumes fewer only if
    /// fewer remain. Must never block. New sibling bags or partial fold
    /// contributions produced along the way go to `collector`.
    fn process(&mut self, work_amount: usize, collector: &mut dyn WorkCollector<Self>);

    /// Remove and return a non-empty disjoint fragment, or `None` if
    /// splitting would leave either side empty.
    ///
    /// Invariant: item count before == retained after + given away.
    /// Fragments carry zero accumulated progress.
    fn split(&mut self) -> Option<Self>;

    /// Absorb another bag of the same kind (multiset union).
    fn merge(&mut self, other: Self);

    /// True when no pending items remain.
    fn is_empty(&self) -> bool;

    /// Fold this bag's accumulated partial result into `result`.
    fn submit(&self, result: &mut Self::Result);
}

/// Hook handed to [`Bag::process`] so a bag can return newly created
/// sibling bags or partial fold contributions to its own place's queue.
pub trait WorkCollector<B: Bag> {
    /// Queue a new bag at the local place.
    fn give_bag(&mut self, bag: B);

    /// Contribute a partial result at the local place.
    fn give_fold(&mut self, fold: B::Result);
}
