//! ResilientWorker — the per-slot state machine with durable checkpoints.
//!
//! Same steal protocol as the plain scheduler, with two additions. Every
//! queue drain is checkpointed before the slot asks anyone for work, and
//! every split is committed to the store together with the victim's
//! remaining snapshot before the loot goes on the wire. A failure
//! notification flips the worker to `Aborting`; it stops at the next safe
//! point, checkpoints what it still holds, and lets the wave driver retry
//! from the store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, trace, warn};

use glb_checkpoint::{CheckpointResult, CheckpointStore, SlotRecord};
use glb_core::{Bag, BagQueue, Fold};
use glb_runtime::LocalRuntime;
use glb_scheduler::{GlbConfig, PlaceStats};

use crate::error::{ResilientError, ResilientResult};

/// Writes to the checkpoint store are retried this many times before the
/// slot gives itself up for dead.
const STORE_ATTEMPTS: usize = 3;

/// The worker table of one wave, indexed by slot.
pub type Wave<B> = Arc<Vec<Arc<ResilientWorker<B>>>>;

/// Scheduling state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Idle: queue drained, random steals exhausted, lifelines registered.
    Inactive,
    /// Processing local work.
    Running,
    /// Blocked waiting for a deal from the given slot.
    Stealing(usize),
    /// A group member died; stop at the next safe point.
    Aborting,
}

struct Inner<B: Bag> {
    state: WorkerState,
    queue: BagQueue<B>,
    /// Random thieves awaiting an answer, FIFO.
    thieves: VecDeque<usize>,
    /// Lifeline thieves registered at this slot.
    lifeline_thieves: VecDeque<usize>,
    /// Activation flag per outgoing lifeline edge.
    lifeline_active: HashMap<usize, bool>,
    result: Option<B::Result>,
    stats: PlaceStats,
}

/// The state machine driving one slot for one wave.
///
/// Workers are rebuilt from the store at each wave start, so all fields
/// besides the queue are fresh; the queue resumes from the slot's last
/// checkpoint.
pub struct ResilientWorker<B: Bag + Clone> {
    slot: usize,
    /// Physical place backing the slot for this wave.
    place: usize,
    slots: usize,
    /// Outgoing lifeline targets.
    lifelines: Vec<usize>,
    /// Slots whose lifelines point here.
    incoming: Vec<usize>,
    config: GlbConfig,
    runtime: Arc<LocalRuntime>,
    store: CheckpointStore,
    inner: Mutex<Inner<B>>,
    /// Signaled by `deal` and `abort` to release a blocked `steal`.
    resumed: Condvar,
    rng: Mutex<StdRng>,
}

impl<B: Bag + Clone> ResilientWorker<B> {
    /// Build the worker and load the slot's last checkpoint, if any.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot: usize,
        place: usize,
        slots: usize,
        lifelines: Vec<usize>,
        incoming: Vec<usize>,
        config: GlbConfig,
        runtime: Arc<LocalRuntime>,
        store: CheckpointStore,
        init: B::Result,
    ) -> ResilientResult<Self> {
        let mut queue = BagQueue::new();
        if let Some(record) = store.get::<B>(slot as u32)? {
            for bag in record.bags {
                queue.give(bag);
            }
            for fold in record.folds {
                queue.give_fold(fold);
            }
        }
        Ok(Self {
            slot,
            place,
            slots,
            lifelines,
            incoming,
            config,
            runtime,
            store,
            inner: Mutex::new(Inner {
                state: WorkerState::Inactive,
                queue,
                thieves: VecDeque::new(),
                lifeline_thieves: VecDeque::new(),
                lifeline_active: HashMap::new(),
                result: Some(init),
                stats: PlaceStats::default(),
            }),
            resumed: Condvar::new(),
            rng: Mutex::new(StdRng::seed_from_u64(slot as u64)),
        })
    }

    /// This worker's slot id.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The physical place backing the slot this wave.
    pub fn place(&self) -> usize {
        self.place
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Main loop: process in quanta, distribute at safe points, checkpoint
    /// on every drain, steal when empty, go inactive when all attempts
    /// fail. Returns [`ResilientError::Aborted`] if the wave was aborted.
    pub fn run(&self, wave: &Wave<B>) -> ResilientResult<()> {
        {
            let mut inner = self.lock();
            if inner.state == WorkerState::Aborting {
                return Err(ResilientError::Aborted);
            }
            inner.state = WorkerState::Running;
        }
        trace!(slot = self.slot, place = self.place, "running");

        loop {
            loop {
                let mut inner = self.lock();
                if inner.queue.is_empty() {
                    break;
                }
                inner.queue.process(self.config.work_unit);
                inner.stats.quanta += 1;
                if inner.state == WorkerState::Aborting {
                    let snapshot = Self::snapshot(&inner);
                    drop(inner);
                    self.checkpoint(&snapshot)?;
                    return Err(ResilientError::Aborted);
                }
                drop(inner);
                self.distribute(wave)?;
            }

            // The drained queue still carries progress; make it durable
            // before anyone else may hand work (and a new record) to us.
            self.checkpoint_now()?;

            let mut attempts = self.config.steal_attempts;
            while attempts > 0 && self.lock().queue.is_empty() {
                attempts -= 1;
                self.steal(wave)?;
            }

            let mut inner = self.lock();
            if inner.state == WorkerState::Aborting {
                let snapshot = Self::snapshot(&inner);
                drop(inner);
                self.checkpoint(&snapshot)?;
                return Err(ResilientError::Aborted);
            }
            if inner.queue.is_empty() {
                inner.state = WorkerState::Inactive;
                break;
            }
        }

        // One more pass so every pending random thief gets its (empty)
        // answer; without it those requesters would hang forever.
        self.distribute(wave)?;
        self.lifeline_steal(wave);
        trace!(slot = self.slot, "inactive");
        Ok(())
    }

    /// Answer queued thieves from local surplus at a safe point. Every
    /// split is committed via [`CheckpointStore::transfer`] before the
    /// loot leaves this slot.
    fn distribute(&self, wave: &Wave<B>) -> ResilientResult<()> {
        if self.slots == 1 {
            return Ok(());
        }
        loop {
            let next = {
                let mut inner = self.lock();
                match inner.thieves.pop_front() {
                    Some(thief) => {
                        let gift = inner.queue.split();
                        let snapshot = if gift.is_some() {
                            inner.stats.steals_suffered += 1;
                            Self::snapshot(&inner)
                        } else {
                            SlotRecord::default()
                        };
                        Some((thief, gift, snapshot))
                    }
                    None => None,
                }
            };
            let Some((thief, gift, snapshot)) = next else {
                break;
            };
            match gift {
                Some(gift) => {
                    self.handoff(&snapshot, thief, gift.clone())?;
                    self.send_deal(wave, thief, Some(gift));
                }
                None => self.send_deal(wave, thief, None),
            }
        }
        loop {
            let next = {
                let mut inner = self.lock();
                match inner.lifeline_thieves.pop_front() {
                    Some(thief) => match inner.queue.split() {
                        Some(gift) => {
                            inner.stats.lifeline_steals_suffered += 1;
                            Some((thief, gift, Self::snapshot(&inner)))
                        }
                        None => {
                            // Nothing left to share; further splits would
                            // also come up empty.
                            inner.lifeline_thieves.push_front(thief);
                            None
                        }
                    },
                    None => None,
                }
            };
            let Some((thief, gift, snapshot)) = next else {
                break;
            };
            self.handoff(&snapshot, thief, gift.clone())?;
            let target = wave[thief].clone();
            let from = self.slot;
            let wave = wave.clone();
            debug!(slot = self.slot, thief, "lifeline deal");
            if let Err(e) = self
                .runtime
                .spawn_at(target.place(), move || target.lifeline_deal(gift, from, &wave))
            {
                error!(slot = self.slot, thief, error = %e, "lifeline deal not sent");
            }
        }
        Ok(())
    }

    /// Synchronous random steal over slot ids: block until the answering
    /// deal arrives or the wave aborts.
    fn steal(&self, wave: &Wave<B>) -> ResilientResult<()> {
        if self.slots == 1 {
            return Ok(());
        }
        let target = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            // Draw from [0, n-2] and skip over self to stay uniform.
            let mut t = rng.gen_range(0..self.slots - 1);
            if t >= self.slot {
                t += 1;
            }
            t
        };

        {
            let mut inner = self.lock();
            if inner.state == WorkerState::Aborting {
                return Err(ResilientError::Aborted);
            }
            inner.state = WorkerState::Stealing(target);
            inner.stats.steals_attempted += 1;
        }
        trace!(slot = self.slot, target, "steal");

        let victim = wave[target].clone();
        let thief = self.slot;
        let reply_wave = wave.clone();
        self.runtime
            .spawn_at_uncounted(victim.place(), move || victim.request(thief, &reply_wave));

        let mut inner = self.lock();
        while matches!(inner.state, WorkerState::Stealing(_)) {
            inner = self.resumed.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
        if inner.state == WorkerState::Aborting {
            return Err(ResilientError::Aborted);
        }
        Ok(())
    }

    /// A thief asks this slot for work. Deferred while Running; answered
    /// empty right away when idle or stealing. An aborting slot answers
    /// nothing: the thief is aborting too and its own notification will
    /// release it.
    pub fn request(&self, thief: usize, wave: &Wave<B>) {
        {
            let mut inner = self.lock();
            inner.stats.steals_received += 1;
            match inner.state {
                WorkerState::Running => {
                    inner.thieves.push_back(thief);
                    return;
                }
                WorkerState::Aborting => return,
                _ => {}
            }
        }
        self.send_deal(wave, thief, None);
    }

    /// Answer to this slot's random steal. Ignored while aborting; in any
    /// state other than `Stealing(from)` it is a protocol bug.
    pub fn deal(&self, from: usize, gift: Option<B>) {
        let mut inner = self.lock();
        match inner.state {
            WorkerState::Stealing(target) if target == from => {}
            WorkerState::Aborting => return,
            other => panic!("slot {}: deal from {from} while in {other:?}", self.slot),
        }
        if let Some(gift) = gift {
            inner.queue.give(gift);
            inner.stats.steals_success += 1;
        }
        inner.stats.deals_received += 1;
        inner.state = WorkerState::Running;
        self.resumed.notify_all();
    }

    /// Register as a lifeline thief at every outgoing lifeline target not
    /// already holding a registration.
    fn lifeline_steal(&self, wave: &Wave<B>) {
        if self.slots == 1 {
            return;
        }
        let mut to_register = Vec::new();
        {
            let mut inner = self.lock();
            for &target in &self.lifelines {
                if !inner.lifeline_active.get(&target).copied().unwrap_or(false) {
                    inner.lifeline_active.insert(target, true);
                    inner.stats.lifeline_steals_attempted += 1;
                    to_register.push(target);
                }
            }
        }
        for target in to_register {
            let victim = wave[target].clone();
            let thief = self.slot;
            if let Err(e) = self
                .runtime
                .spawn_at(victim.place(), move || victim.lifeline_register(thief))
            {
                error!(slot = self.slot, target, error = %e, "lifeline registration not sent");
            }
        }
    }

    /// A lifeline neighbor went idle and waits for work from this slot.
    pub fn lifeline_register(&self, thief: usize) {
        self.lock().lifeline_thieves.push_back(thief);
    }

    /// Work arriving over a lifeline. The sender already committed the
    /// handoff, so the merge is safe even if this slot is aborting; a
    /// relaunch is only scheduled from Inactive.
    pub fn lifeline_deal(&self, work: B, sender: usize, wave: &Wave<B>) {
        let relaunch = {
            let mut inner = self.lock();
            inner.queue.give(work);
            inner.stats.lifeline_steals_success += 1;
            inner.lifeline_active.insert(sender, false);
            if inner.state == WorkerState::Inactive {
                inner.state = WorkerState::Running;
                true
            } else {
                false
            }
        };
        if relaunch {
            debug!(slot = self.slot, sender, "reactivated by lifeline deal");
            let me = wave[self.slot].clone();
            let wave = wave.clone();
            if let Err(e) = self.runtime.spawn_at(self.place, move || {
                if let Err(e) = me.run(&wave) {
                    debug!(slot = me.slot(), error = %e, "relaunched run stopped");
                }
            }) {
                error!(slot = self.slot, error = %e, "reactivation not scheduled");
            }
        }
    }

    /// Failure notification: stop at the next safe point and release a
    /// blocked steal.
    pub fn abort(&self) {
        let mut inner = self.lock();
        if inner.state != WorkerState::Aborting {
            debug!(slot = self.slot, place = self.place, "aborting");
            inner.state = WorkerState::Aborting;
            self.resumed.notify_all();
        }
    }

    /// Fold the queue's partial results into the local result and ship it
    /// to the coordinator (slot 0), which folds in place.
    pub fn gather(&self, wave: &Wave<B>) {
        let partial = {
            let mut inner = self.lock();
            let mut result = match inner.result.take() {
                Some(r) => r,
                None => return,
            };
            inner.queue.fold_into(&mut result);
            inner.result = Some(result.clone());
            result
        };
        if self.slot != 0 {
            let coordinator = wave[0].clone();
            if let Err(e) = self
                .runtime
                .spawn_at(coordinator.place(), move || coordinator.give_result(partial))
            {
                error!(slot = self.slot, error = %e, "partial result not sent");
            }
        }
    }

    /// Fold a peer's partial result into the coordinator's.
    pub fn give_result(&self, partial: B::Result) {
        let mut inner = self.lock();
        if let Some(result) = inner.result.as_mut() {
            result.fold(partial);
        }
    }

    /// The folded result held at this slot.
    pub fn result(&self) -> Option<B::Result> {
        self.lock().result.clone()
    }

    /// Counters for this wave.
    pub fn stats(&self) -> PlaceStats {
        self.lock().stats
    }

    /// Durable image of the queue: bags and collected folds together.
    /// Folds carry progress for payloads that report through the
    /// collector, so leaving them out would lose work on recovery.
    fn snapshot(inner: &Inner<B>) -> SlotRecord<B> {
        SlotRecord {
            bags: inner.queue.bags().to_vec(),
            folds: inner.queue.folds().to_vec(),
        }
    }

    fn checkpoint_now(&self) -> ResilientResult<()> {
        let snapshot = Self::snapshot(&self.lock());
        self.checkpoint(&snapshot)
    }

    fn checkpoint(&self, snapshot: &SlotRecord<B>) -> ResilientResult<()> {
        self.with_retry(|| self.store.put(self.slot as u32, snapshot))
    }

    fn handoff(&self, snapshot: &SlotRecord<B>, thief: usize, loot: B) -> ResilientResult<()> {
        self.with_retry(|| {
            self.store
                .transfer(self.slot as u32, snapshot, thief as u32, loot.clone())
        })
    }

    /// Retry a store write a bounded number of times. A slot that cannot
    /// checkpoint must not keep computing: its place is killed so the
    /// wave aborts and a spare takes the slot over from its last durable
    /// record.
    fn with_retry(&self, op: impl Fn() -> CheckpointResult<()>) -> ResilientResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < STORE_ATTEMPTS => {
                    warn!(slot = self.slot, attempt, error = %e, "checkpoint write failed, retrying");
                }
                Err(e) => {
                    error!(slot = self.slot, error = %e, "checkpoint store unusable");
                    self.runtime.kill(self.place);
                    return Err(e.into());
                }
            }
        }
    }

    fn send_deal(&self, wave: &Wave<B>, thief: usize, gift: Option<B>) {
        let target = wave[thief].clone();
        let from = self.slot;
        self.runtime
            .spawn_at_uncounted(target.place(), move || target.deal(from, gift));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glb_core::{IntervalBag, Sum};

    fn solo_worker(store: &CheckpointStore) -> ResilientWorker<IntervalBag> {
        ResilientWorker::new(
            0,
            0,
            1,
            Vec::new(),
            Vec::new(),
            GlbConfig::default(),
            LocalRuntime::new(1),
            store.clone(),
            Sum(0),
        )
        .unwrap()
    }

    #[test]
    fn construction_loads_the_slot_checkpoint() {
        let store = CheckpointStore::open_in_memory().unwrap();
        store
            .put(0, &SlotRecord::from_bags(vec![IntervalBag::new(7)]))
            .unwrap();

        let worker = Arc::new(solo_worker(&store));
        let wave: Wave<IntervalBag> = Arc::new(vec![worker.clone()]);
        worker.run(&wave).unwrap();
        worker.gather(&wave);

        assert_eq!(worker.result(), Some(Sum(7)));
    }

    #[test]
    fn drained_queue_is_checkpointed_with_progress() {
        let store = CheckpointStore::open_in_memory().unwrap();
        store
            .put(0, &SlotRecord::from_bags(vec![IntervalBag::new(12)]))
            .unwrap();

        let worker = Arc::new(solo_worker(&store));
        let wave: Wave<IntervalBag> = Arc::new(vec![worker.clone()]);
        worker.run(&wave).unwrap();

        let record = store.get::<IntervalBag>(0).unwrap().unwrap();
        assert_eq!(record.bags.len(), 1);
        assert_eq!(record.bags[0].pending(), 0);
        assert_eq!(record.bags[0].processed(), 12);
    }

    #[test]
    fn construction_restores_collected_folds() {
        let store = CheckpointStore::open_in_memory().unwrap();
        store
            .put(
                0,
                &SlotRecord {
                    bags: vec![IntervalBag::new(5)],
                    folds: vec![Sum(20), Sum(1)],
                },
            )
            .unwrap();

        let worker = Arc::new(solo_worker(&store));
        let wave: Wave<IntervalBag> = Arc::new(vec![worker.clone()]);
        worker.run(&wave).unwrap();
        worker.gather(&wave);

        // 5 processed items plus both restored fold contributions.
        assert_eq!(worker.result(), Some(Sum(26)));
    }

    #[test]
    fn aborted_worker_refuses_to_run() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let worker = Arc::new(solo_worker(&store));
        let wave: Wave<IntervalBag> = Arc::new(vec![worker.clone()]);

        worker.abort();
        assert!(matches!(
            worker.run(&wave),
            Err(ResilientError::Aborted)
        ));
    }

    #[test]
    fn empty_slot_runs_to_quiescence() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let worker = Arc::new(solo_worker(&store));
        let wave: Wave<IntervalBag> = Arc::new(vec![worker.clone()]);

        worker.run(&wave).unwrap();
        worker.gather(&wave);
        assert_eq!(worker.result(), Some(Sum(0)));
    }
}
