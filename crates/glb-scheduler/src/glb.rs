//! Glb — drives a computation over the whole place group.

use std::sync::Arc;

use tracing::{debug, error, info};

use glb_core::{Bag, LifelineStrategy, validate};
use glb_runtime::LocalRuntime;

use crate::config::GlbConfig;
use crate::error::{GlbError, GlbResult};
use crate::stats::PlaceStats;
use crate::worker::{Peers, PlaceScheduler};

/// A global load balancer over a fixed group of places.
///
/// Construction validates the lifeline topology for the group size. The
/// same instance can run any number of independent computations;
/// [`Glb::compute`] resets every place before seeding.
pub struct Glb<B: Bag> {
    runtime: Arc<LocalRuntime>,
    places: Peers<B>,
}

impl<B: Bag> Glb<B> {
    /// Build the per-place schedulers over `runtime`'s place group.
    pub fn new(
        runtime: Arc<LocalRuntime>,
        strategy: &dyn LifelineStrategy,
        config: GlbConfig,
    ) -> GlbResult<Self> {
        let n = runtime.places();
        validate(strategy, n)?;
        let places: Vec<Arc<PlaceScheduler<B>>> = (0..n)
            .map(|i| {
                Arc::new(PlaceScheduler::new(
                    i,
                    n,
                    strategy.lifeline(i, n),
                    strategy.reverse_lifeline(i, n),
                    config,
                    runtime.clone(),
                ))
            })
            .collect();
        Ok(Self {
            runtime,
            places: Arc::new(places),
        })
    }

    /// Run one computation: seed the given bags at their places, balance
    /// until global quiescence, then gather and fold every place's
    /// partial result into the final one.
    ///
    /// `init` is the neutral element of the result type; every place
    /// starts its partial result from a copy of it.
    pub fn compute(&self, seeds: Vec<(usize, B)>, init: B::Result) -> GlbResult<B::Result> {
        let n = self.places.len();
        let mut seeded: Vec<usize> = Vec::new();
        for (place, _) in &seeds {
            if *place >= n {
                return Err(GlbError::SeedOutOfRange {
                    place: *place,
                    places: n,
                });
            }
            if !seeded.contains(place) {
                seeded.push(*place);
            }
        }

        for place in self.places.iter() {
            place.reset(init.clone(), &seeded);
        }
        for (place, bag) in seeds {
            self.places[place].seed(bag);
        }
        debug!(places = n, seeded = ?seeded, "computation seeded");

        let peers = self.places.clone();
        self.runtime.run_under_barrier(|| {
            for &p in &seeded {
                let worker = peers[p].clone();
                let peers = peers.clone();
                if let Err(e) = self.runtime.spawn_at(p, move || worker.run(&peers)) {
                    error!(place = p, error = %e, "seed run not scheduled");
                }
            }
        })?;

        let peers = self.places.clone();
        self.runtime.run_under_barrier(|| {
            for p in 0..n {
                let worker = peers[p].clone();
                let peers = peers.clone();
                if let Err(e) = self.runtime.spawn_at(p, move || worker.gather(&peers)) {
                    error!(place = p, error = %e, "gather not scheduled");
                }
            }
        })?;

        let result = self.places[0].result().ok_or(GlbError::ResultMissing)?;
        info!(places = n, "computation complete");
        Ok(result)
    }

    /// Per-place counters for the last computation.
    pub fn stats(&self) -> Vec<PlaceStats> {
        self.places.iter().map(|p| p.stats()).collect()
    }

    /// True when every place is Inactive with a drained queue.
    pub fn quiescent(&self) -> bool {
        self.places.iter().all(|p| p.idle())
    }
}
