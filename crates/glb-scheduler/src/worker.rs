//! Place scheduler — the per-place state machine and steal protocol.
//!
//! All mutable per-place state lives under a single mutex with one
//! condition variable. `steal` is the only blocking operation: it parks
//! the driving thread on the condvar until the matching `deal` arrives.
//! Remote handler invocations (`request`, `deal`, `lifeline_register`,
//! `lifeline_deal`) run concurrently with the main loop on task threads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, trace};

use glb_core::{Bag, BagQueue, Fold};
use glb_runtime::LocalRuntime;

use crate::config::GlbConfig;
use crate::stats::PlaceStats;

/// The peer table a computation runs against. Handlers receive it so they
/// can message other places without the schedulers owning each other.
pub type Peers<B> = Arc<Vec<Arc<PlaceScheduler<B>>>>;

/// Scheduling state of one place. Exactly one at a time, mutated only
/// under the place's own lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceState {
    /// Idle: queue drained, random steals exhausted, lifelines registered.
    Inactive,
    /// Processing local work.
    Running,
    /// Blocked waiting for a deal from the given place.
    Stealing(usize),
}

struct Inner<B: Bag> {
    state: PlaceState,
    queue: BagQueue<B>,
    /// Random thieves awaiting an answer, FIFO.
    thieves: VecDeque<usize>,
    /// Lifeline thieves registered at this place.
    lifeline_thieves: VecDeque<usize>,
    /// Activation flag per outgoing lifeline edge.
    lifeline_active: HashMap<usize, bool>,
    result: Option<B::Result>,
    stats: PlaceStats,
}

/// The state machine driving one place.
pub struct PlaceScheduler<B: Bag> {
    id: usize,
    places: usize,
    /// Outgoing lifeline targets.
    lifelines: Vec<usize>,
    /// Places whose lifelines point here.
    incoming: Vec<usize>,
    config: GlbConfig,
    runtime: Arc<LocalRuntime>,
    inner: Mutex<Inner<B>>,
    /// Signaled by `deal` to release the thread blocked in `steal`.
    resumed: Condvar,
    /// Seeded with the place id so places diverge from the start.
    rng: Mutex<StdRng>,
}

impl<B: Bag> PlaceScheduler<B> {
    pub fn new(
        id: usize,
        places: usize,
        lifelines: Vec<usize>,
        incoming: Vec<usize>,
        config: GlbConfig,
        runtime: Arc<LocalRuntime>,
    ) -> Self {
        Self {
            id,
            places,
            lifelines,
            incoming,
            config,
            runtime,
            inner: Mutex::new(Inner {
                state: PlaceState::Inactive,
                queue: BagQueue::new(),
                thieves: VecDeque::new(),
                lifeline_thieves: VecDeque::new(),
                lifeline_active: HashMap::new(),
                result: None,
                stats: PlaceStats::default(),
            }),
            resumed: Condvar::new(),
            rng: Mutex::new(StdRng::seed_from_u64(id as u64)),
        }
    }

    /// This place's id.
    pub fn id(&self) -> usize {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Prepare for a fresh computation.
    ///
    /// Lifelines are pre-established: every non-seeded place starts with
    /// its outgoing edges marked active and is pre-registered as a
    /// lifeline thief at its reverse-lifeline sources, so surplus work
    /// flows outward without a registration round-trip.
    pub fn reset(&self, init: B::Result, seeded: &[usize]) {
        let mut inner = self.lock();
        inner.state = PlaceState::Inactive;
        inner.queue.reset();
        inner.thieves.clear();
        inner.lifeline_thieves = self
            .incoming
            .iter()
            .copied()
            .filter(|i| !seeded.contains(i))
            .collect();
        let active = !seeded.contains(&self.id);
        inner.lifeline_active = self.lifelines.iter().map(|&l| (l, active)).collect();
        inner.result = Some(init);
        inner.stats = PlaceStats::default();
    }

    /// Queue a seed bag before the computation starts.
    pub fn seed(&self, bag: B) {
        self.lock().queue.give(bag);
    }

    /// Main loop: process in quanta, distribute at safe points, steal when
    /// drained, go inactive when all steal attempts fail.
    pub fn run(&self, peers: &Peers<B>) {
        self.lock().state = PlaceState::Running;
        trace!(place = self.id, "running");

        loop {
            loop {
                let mut inner = self.lock();
                if inner.queue.is_empty() {
                    break;
                }
                inner.queue.process(self.config.work_unit);
                inner.stats.quanta += 1;
                drop(inner);
                self.distribute(peers);
            }

            let mut attempts = self.config.steal_attempts;
            while attempts > 0 && self.lock().queue.is_empty() {
                attempts -= 1;
                self.steal(peers);
            }

            let mut inner = self.lock();
            if inner.queue.is_empty() {
                inner.state = PlaceState::Inactive;
                break;
            }
        }

        // One more pass so every pending random thief gets its (empty)
        // answer; without it those requesters would hang forever.
        self.distribute(peers);
        self.lifeline_steal(peers);
        trace!(place = self.id, "inactive");
    }

    /// Answer queued thieves from local surplus at a safe point.
    ///
    /// Random thieves are answered unconditionally, FIFO, empty-handed if
    /// nothing splits. A lifeline thief is only answered when a split
    /// succeeds; otherwise it stays registered for a later pass.
    fn distribute(&self, peers: &Peers<B>) {
        if self.places == 1 {
            return;
        }
        let mut deals: Vec<(usize, Option<B>)> = Vec::new();
        let mut lifeline_deals: Vec<(usize, B)> = Vec::new();
        {
            let mut inner = self.lock();
            while let Some(thief) = inner.thieves.pop_front() {
                let gift = inner.queue.split();
                if gift.is_some() {
                    inner.stats.steals_suffered += 1;
                }
                deals.push((thief, gift));
            }
            while let Some(thief) = inner.lifeline_thieves.pop_front() {
                match inner.queue.split() {
                    Some(gift) => {
                        inner.stats.lifeline_steals_suffered += 1;
                        lifeline_deals.push((thief, gift));
                    }
                    None => {
                        // Nothing left to share; further splits would also
                        // come up empty.
                        inner.lifeline_thieves.push_front(thief);
                        break;
                    }
                }
            }
        }

        for (thief, gift) in deals {
            self.send_deal(peers, thief, gift);
        }
        for (thief, gift) in lifeline_deals {
            let target = peers[thief].clone();
            let from = self.id;
            let peers = peers.clone();
            debug!(place = self.id, thief, "lifeline deal");
            if let Err(e) = self
                .runtime
                .spawn_at(thief, move || target.lifeline_deal(gift, from, &peers))
            {
                error!(place = self.id, thief, error = %e, "lifeline deal not sent");
            }
        }
    }

    /// Synchronous random steal: pick a uniform target other than self,
    /// send a request, and block until the answering deal arrives.
    fn steal(&self, peers: &Peers<B>) {
        if self.places == 1 {
            return;
        }
        let target = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            // Draw from [0, n-2] and skip over self to stay uniform.
            let mut t = rng.gen_range(0..self.places - 1);
            if t >= self.id {
                t += 1;
            }
            t
        };

        {
            let mut inner = self.lock();
            inner.state = PlaceState::Stealing(target);
            inner.stats.steals_attempted += 1;
        }
        trace!(place = self.id, target, "steal");

        let victim = peers[target].clone();
        let thief = self.id;
        let reply_peers = peers.clone();
        self.runtime
            .spawn_at_uncounted(target, move || victim.request(thief, &reply_peers));

        let mut inner = self.lock();
        while matches!(inner.state, PlaceState::Stealing(_)) {
            inner = self.resumed.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// A thief asks this place for work. Deferred while Running (answered
    /// at the next distribute); answered empty right away otherwise — an
    /// idle or stealing place cannot share work but must not leave the
    /// requester hanging.
    pub fn request(&self, thief: usize, peers: &Peers<B>) {
        {
            let mut inner = self.lock();
            inner.stats.steals_received += 1;
            if inner.state == PlaceState::Running {
                inner.thieves.push_back(thief);
                return;
            }
        }
        self.send_deal(peers, thief, None);
    }

    /// Answer to this place's random steal.
    ///
    /// Receiving a deal in any state other than `Stealing(from)` is a
    /// protocol bug, not a recoverable error.
    pub fn deal(&self, from: usize, gift: Option<B>) {
        let mut inner = self.lock();
        match inner.state {
            PlaceState::Stealing(target) if target == from => {}
            other => panic!(
                "place {}: deal from {from} while in {other:?}",
                self.id
            ),
        }
        if let Some(gift) = gift {
            inner.queue.give(gift);
            inner.stats.steals_success += 1;
        }
        inner.stats.deals_received += 1;
        inner.state = PlaceState::Running;
        self.resumed.notify_all();
    }

    /// Register as a lifeline thief at every outgoing lifeline target not
    /// already holding a registration. Non-blocking; the work, if any,
    /// arrives at an arbitrary later time.
    fn lifeline_steal(&self, peers: &Peers<B>) {
        if self.places == 1 {
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
            let victim = peers[target].clone();
            let thief = self.id;
            if let Err(e) = self
                .runtime
                .spawn_at(target, move || victim.lifeline_register(thief))
            {
                error!(place = self.id, target, error = %e, "lifeline registration not sent");
            }
        }
    }

    /// A lifeline neighbor went idle and waits for work from this place.
    pub fn lifeline_register(&self, thief: usize) {
        self.lock().lifeline_thieves.push_back(thief);
    }

    /// Work arriving over a lifeline. Reactivates the place if it was
    /// idle, as a fresh counted task rather than a nested `run` call.
    pub fn lifeline_deal(&self, work: B, sender: usize, peers: &Peers<B>) {
        let relaunch = {
            let mut inner = self.lock();
            inner.queue.give(work);
            inner.stats.lifeline_steals_success += 1;
            inner.lifeline_active.insert(sender, false);
            if inner.state == PlaceState::Inactive {
                inner.state = PlaceState::Running;
                true
            } else {
                false
            }
        };
        if relaunch {
            debug!(place = self.id, sender, "reactivated by lifeline deal");
            let me = peers[self.id].clone();
            let peers = peers.clone();
            if let Err(e) = self.runtime.spawn_at(self.id, move || me.run(&peers)) {
                error!(place = self.id, error = %e, "reactivation not scheduled");
            }
        }
    }

    /// Fold the queue's partial results into the local result and ship it
    /// to the coordinator (place 0), which folds in place.
    pub fn gather(&self, peers: &Peers<B>) {
        let partial = {
            let mut inner = self.lock();
            let mut result = match inner.result.take() {
                Some(r) => r,
                None => return, // reset never ran; nothing to contribute
            };
            inner.queue.fold_into(&mut result);
            inner.result = Some(result.clone());
            result
        };
        if self.id != 0 {
            let coordinator = peers[0].clone();
            if let Err(e) = self
                .runtime
                .spawn_at(0, move || coordinator.give_result(partial))
            {
                error!(place = self.id, error = %e, "partial result not sent");
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

    /// The folded result held at this place.
    pub fn result(&self) -> Option<B::Result> {
        self.lock().result.clone()
    }

    /// Counters for the last computation.
    pub fn stats(&self) -> PlaceStats {
        self.lock().stats
    }

    /// True when this place is Inactive with a drained queue.
    pub fn idle(&self) -> bool {
        let mut inner = self.lock();
        inner.state == PlaceState::Inactive && inner.queue.is_empty()
    }

    fn send_deal(&self, peers: &Peers<B>, thief: usize, gift: Option<B>) {
        let target = peers[thief].clone();
        let from = self.id;
        self.runtime
            .spawn_at_uncounted(thief, move || target.deal(from, gift));
    }
}
