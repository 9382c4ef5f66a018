//! ResilientGlb — drives a computation in waves, retrying on failure.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use glb_checkpoint::{CheckpointStore, SlotRecord};
use glb_core::{Bag, LifelineStrategy, validate};
use glb_runtime::LocalRuntime;
use glb_scheduler::{GlbConfig, PlaceStats};

use crate::error::{ResilientError, ResilientResult};
use crate::group::PlaceGroup;
use crate::worker::{ResilientWorker, Wave};

/// A global load balancer that survives place failures.
///
/// Work is keyed by logical slot, not physical place. The computation
/// runs in waves: each wave rebuilds one worker per slot from the slot's
/// last checkpoint and runs it to global quiescence. If any group member
/// dies mid-wave, every worker aborts at its next safe point, the group
/// is repaired from the spare places, and the next wave resumes from the
/// store. The result is exact: checkpoints and handoffs are transactional,
/// so no work item is lost or folded twice across retries.
pub struct ResilientGlb<B: Bag + Clone> {
    runtime: Arc<LocalRuntime>,
    store: CheckpointStore,
    config: GlbConfig,
    lifelines: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    group: Mutex<PlaceGroup>,
    /// Worker table of the wave in flight, shared with the failure handler.
    current: Arc<Mutex<Option<Wave<B>>>>,
    waves: Mutex<u64>,
}

impl<B: Bag + Clone> ResilientGlb<B> {
    /// Build a balancer over `group_size` slots, keeping the runtime's
    /// remaining places as spares. Registers a failure handler that
    /// aborts the wave in flight whenever a group member dies.
    pub fn new(
        runtime: Arc<LocalRuntime>,
        strategy: &dyn LifelineStrategy,
        config: GlbConfig,
        store: CheckpointStore,
        group_size: usize,
    ) -> ResilientResult<Self> {
        validate(strategy, group_size)?;
        let group = PlaceGroup::new(&runtime, group_size)?;
        let lifelines = (0..group_size)
            .map(|s| strategy.lifeline(s, group_size))
            .collect();
        let incoming = (0..group_size)
            .map(|s| strategy.reverse_lifeline(s, group_size))
            .collect();

        let current: Arc<Mutex<Option<Wave<B>>>> = Arc::new(Mutex::new(None));
        {
            let current = current.clone();
            runtime.on_place_failure(move |dead| {
                let wave = current.lock().unwrap_or_else(|e| e.into_inner()).clone();
                let Some(wave) = wave else { return };
                if wave.iter().any(|w| w.place() == dead) {
                    debug!(dead, "group member died, aborting wave");
                    for worker in wave.iter() {
                        worker.abort();
                    }
                }
            });
        }

        Ok(Self {
            runtime,
            store,
            config,
            lifelines,
            incoming,
            group: Mutex::new(group),
            current,
            waves: Mutex::new(0),
        })
    }

    /// Run one computation to an exact result, retrying in waves until the
    /// group stays alive through a full run and gather, or the spares run
    /// out.
    ///
    /// `init` is the neutral element of the result type; every slot starts
    /// its partial result from a copy of it.
    pub fn compute(&self, seeds: Vec<(usize, B)>, init: B::Result) -> ResilientResult<B::Result> {
        let size = self.lock_group().size();

        self.set_current(None);
        *self.lock_waves() = 0;
        self.store.clear()?;

        // Seeds become the slots' first checkpoint records; from here on
        // the store is the single source of truth for pending work.
        let mut per_slot: Vec<Vec<B>> = (0..size).map(|_| Vec::new()).collect();
        for (slot, bag) in seeds {
            if slot >= size {
                return Err(ResilientError::SeedOutOfRange { slot, slots: size });
            }
            per_slot[slot].push(bag);
        }
        let records: Vec<(u32, SlotRecord<B>)> = per_slot
            .into_iter()
            .enumerate()
            .filter(|(_, bags)| !bags.is_empty())
            .map(|(slot, bags)| (slot as u32, SlotRecord::from_bags(bags)))
            .collect();
        let entries: Vec<(u32, &SlotRecord<B>)> =
            records.iter().map(|(slot, rec)| (*slot, rec)).collect();
        self.store.put_many(&entries)?;

        loop {
            let placement = {
                let mut group = self.lock_group();
                let replaced = group.fix(&self.runtime)?;
                if !replaced.is_empty() {
                    info!(?replaced, "group repaired");
                }
                group.places().to_vec()
            };

            let workers: Vec<Arc<ResilientWorker<B>>> = (0..size)
                .map(|slot| {
                    ResilientWorker::new(
                        slot,
                        placement[slot],
                        size,
                        self.lifelines[slot].clone(),
                        self.incoming[slot].clone(),
                        self.config,
                        self.runtime.clone(),
                        self.store.clone(),
                        init.clone(),
                    )
                    .map(Arc::new)
                })
                .collect::<ResilientResult<_>>()?;
            let wave: Wave<B> = Arc::new(workers);
            self.set_current(Some(wave.clone()));

            let wave_no = {
                let mut waves = self.lock_waves();
                *waves += 1;
                *waves
            };
            info!(wave = wave_no, slots = size, "wave started");

            let run = self.runtime.run_under_barrier(|| {
                for slot in 0..size {
                    let worker = wave[slot].clone();
                    let peers = wave.clone();
                    if let Err(e) = self.runtime.spawn_at(worker.place(), move || {
                        if let Err(e) = worker.run(&peers) {
                            debug!(slot, error = %e, "worker stopped");
                        }
                    }) {
                        error!(slot, error = %e, "worker run not scheduled");
                    }
                }
            });
            if let Err(e) = run {
                info!(wave = wave_no, error = %e, "wave aborted, retrying");
                continue;
            }
            // A death after quiescence but before the round closed may not
            // have failed the barrier; never gather from a broken group.
            if !self.lock_group().all_alive(&self.runtime) {
                info!(wave = wave_no, "group member died after quiescence, retrying");
                continue;
            }

            let gather = self.runtime.run_under_barrier(|| {
                for slot in 0..size {
                    let worker = wave[slot].clone();
                    let peers = wave.clone();
                    if let Err(e) = self
                        .runtime
                        .spawn_at(worker.place(), move || worker.gather(&peers))
                    {
                        error!(slot, error = %e, "gather not scheduled");
                    }
                }
            });
            if let Err(e) = gather {
                info!(wave = wave_no, error = %e, "gather aborted, retrying");
                continue;
            }
            // A death in the gap before the gather barrier was installed is
            // recorded nowhere; its partial would be silently missing from
            // the fold. Re-check before trusting the gathered result.
            if !self.lock_group().all_alive(&self.runtime) {
                info!(wave = wave_no, "group member died around gather, retrying");
                continue;
            }

            let result = wave[0].result().ok_or(ResilientError::ResultMissing)?;
            info!(wave = wave_no, "computation complete");
            return Ok(result);
        }
    }

    /// Number of waves the last computation took. `1` means no retry was
    /// needed.
    pub fn waves(&self) -> u64 {
        *self.lock_waves()
    }

    /// Per-slot counters for the last completed wave.
    pub fn stats(&self) -> Vec<PlaceStats> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|wave| wave.iter().map(|w| w.stats()).collect())
            .unwrap_or_default()
    }

    /// The current slot-to-place mapping.
    pub fn placement(&self) -> Vec<usize> {
        self.lock_group().places().to_vec()
    }

    fn set_current(&self, wave: Option<Wave<B>>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = wave;
    }

    fn lock_group(&self) -> std::sync::MutexGuard<'_, PlaceGroup> {
        self.group.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_waves(&self) -> std::sync::MutexGuard<'_, u64> {
        self.waves.lock().unwrap_or_else(|e| e.into_inner())
    }
}
