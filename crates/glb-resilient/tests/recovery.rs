//! Failure recovery scenarios over the in-process runtime.

use std::sync::{Once, OnceLock};
use std::thread;

use serde::{Deserialize, Serialize};

use glb_checkpoint::CheckpointStore;
use glb_core::{Bag, IntervalBag, Ring, Sum, WorkCollector};
use glb_resilient::{ResilientError, ResilientGlb};
use glb_runtime::LocalRuntime;
use glb_scheduler::GlbConfig;

/// Hook fired from inside bag processing. Installed once by the test
/// that injects a failure; every other bag here carries no fuse and
/// never reaches it.
static CHAOS: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

static TRACING_INIT: Once = Once::new();

/// Initialize tracing subscriber for debug output in CI.
/// Controlled by `RUST_LOG` env var (e.g. `RUST_LOG=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// An [`IntervalBag`] that trips the chaos hook once its cumulative
/// progress passes the fuse. The fuse does not travel with split
/// fragments and is disarmed in every checkpoint written after it fires,
/// so a retried wave cannot trip it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FusedBag {
    inner: IntervalBag,
    fuse: Option<u64>,
}

impl FusedBag {
    fn fresh(items: u64) -> Self {
        Self {
            inner: IntervalBag::new(items),
            fuse: None,
        }
    }

    fn fused(items: u64, fuse: u64) -> Self {
        Self {
            inner: IntervalBag::new(items),
            fuse: Some(fuse),
        }
    }

    fn pending(&self) -> u64 {
        self.inner.pending()
    }

    fn processed(&self) -> u64 {
        self.inner.processed()
    }
}

impl Bag for FusedBag {
    type Result = Sum;

    fn kind(&self) -> &'static str {
        "fused-interval"
    }

    fn process(&mut self, work_amount: usize, _collector: &mut dyn WorkCollector<Self>) {
        struct Sink;
        impl WorkCollector<IntervalBag> for Sink {
            fn give_bag(&mut self, _bag: IntervalBag) {}
            fn give_fold(&mut self, _fold: Sum) {}
        }
        self.inner.process(work_amount, &mut Sink);
        if let Some(fuse) = self.fuse {
            if self.inner.processed() >= fuse {
                self.fuse = None;
                if let Some(chaos) = CHAOS.get() {
                    chaos();
                }
            }
        }
    }

    fn split(&mut self) -> Option<Self> {
        self.inner.split().map(|inner| Self { inner, fuse: None })
    }

    fn merge(&mut self, other: Self) {
        self.inner.merge(other.inner);
        self.fuse = self.fuse.take().or(other.fuse);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn submit(&self, result: &mut Sum) {
        self.inner.submit(result);
    }
}

#[test]
fn unfailing_run_completes_in_one_wave() {
    init_tracing();
    let runtime = LocalRuntime::new(6); // 4 slots, 2 spares
    let store = CheckpointStore::open_in_memory().unwrap();
    let config = GlbConfig::default().with_work_unit(50);
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime, &Ring, config, store.clone(), 4).unwrap();

    let result = glb
        .compute(vec![(0, FusedBag::fresh(500))], Sum(0))
        .unwrap();

    assert_eq!(result, Sum(500));
    assert_eq!(glb.waves(), 1);
    assert_eq!(glb.placement(), vec![0, 1, 2, 3]);

    // At quiescence the store holds the exact durable image: no slot has
    // pending work and the recorded progress adds up to every item.
    let mut durable = 0;
    for slot in 0..4 {
        if let Some(record) = store.get::<FusedBag>(slot).unwrap() {
            for bag in record.bags {
                assert_eq!(bag.pending(), 0, "slot {slot} checkpointed pending work");
                durable += bag.processed();
            }
        }
    }
    assert_eq!(durable, 500);
}

#[test]
fn killed_place_is_replaced_and_the_result_is_exact() {
    init_tracing();
    let runtime = LocalRuntime::new(5); // 4 slots, 1 spare
    let store = CheckpointStore::open_in_memory().unwrap();
    let config = GlbConfig::default().with_work_unit(10).with_steal_attempts(1);
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime.clone(), &Ring, config, store.clone(), 4).unwrap();

    // Kill from a separate thread: the hook fires inside a processing
    // quantum, and a place must be able to die while its worker holds
    // its own lock.
    let target = runtime.clone();
    assert!(
        CHAOS
            .set(Box::new(move || {
                let target = target.clone();
                thread::spawn(move || target.kill(2));
            }))
            .is_ok()
    );

    let seeds = vec![
        (0, FusedBag::fresh(1250)),
        (1, FusedBag::fresh(1250)),
        (2, FusedBag::fused(1250, 20)),
        (3, FusedBag::fresh(1250)),
    ];
    let result = glb.compute(seeds, Sum(0)).unwrap();

    assert_eq!(result, Sum(5000));
    assert_eq!(glb.waves(), 2);
    assert!(!runtime.is_alive(2));
    assert_eq!(glb.placement(), vec![0, 1, 4, 3]); // slot 2 moved to the spare

    // Recovery preserved the durable image exactly: nothing lost to the
    // dead place, nothing double-counted by the retried wave.
    let mut durable = 0;
    for slot in 0..4 {
        if let Some(record) = store.get::<FusedBag>(slot).unwrap() {
            for bag in record.bags {
                assert_eq!(bag.pending(), 0, "slot {slot} checkpointed pending work");
                durable += bag.processed();
            }
        }
    }
    assert_eq!(durable, 5000);
}

/// Hook fired by [`RelayBag`], from the fold-channel recovery test only.
static RELAY_CHAOS: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// A bag that reports all progress through `WorkCollector::give_fold`
/// instead of carrying it internally; `submit` contributes nothing. Its
/// fuse counts relayed items and trips [`RELAY_CHAOS`] once.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelayBag {
    pending: u64,
    relayed: u64,
    fuse: Option<u64>,
}

impl RelayBag {
    fn fresh(items: u64) -> Self {
        Self {
            pending: items,
            relayed: 0,
            fuse: None,
        }
    }

    fn fused(items: u64, fuse: u64) -> Self {
        Self {
            pending: items,
            relayed: 0,
            fuse: Some(fuse),
        }
    }
}

impl Bag for RelayBag {
    type Result = Sum;

    fn kind(&self) -> &'static str {
        "relay"
    }

    fn process(&mut self, work_amount: usize, collector: &mut dyn WorkCollector<Self>) {
        let n = (work_amount as u64).min(self.pending);
        self.pending -= n;
        self.relayed += n;
        if n > 0 {
            collector.give_fold(Sum(n as i64));
        }
        if let Some(fuse) = self.fuse {
            if self.relayed >= fuse {
                self.fuse = None;
                if let Some(chaos) = RELAY_CHAOS.get() {
                    chaos();
                }
            }
        }
    }

    fn split(&mut self) -> Option<Self> {
        if self.pending < 2 {
            return None;
        }
        let given = self.pending / 2;
        self.pending -= given;
        Some(Self {
            pending: given,
            relayed: 0,
            fuse: None,
        })
    }

    fn merge(&mut self, other: Self) {
        self.pending += other.pending;
        self.relayed += other.relayed;
        self.fuse = self.fuse.or(other.fuse);
    }

    fn is_empty(&self) -> bool {
        self.pending == 0
    }

    fn submit(&self, _result: &mut Sum) {}
}

#[test]
fn fold_channel_progress_survives_wave_retry() {
    init_tracing();
    let runtime = LocalRuntime::new(3); // 2 slots, 1 spare
    let store = CheckpointStore::open_in_memory().unwrap();
    let config = GlbConfig::default().with_work_unit(10).with_steal_attempts(1);
    let glb: ResilientGlb<RelayBag> =
        ResilientGlb::new(runtime.clone(), &Ring, config, store, 2).unwrap();

    let target = runtime.clone();
    assert!(
        RELAY_CHAOS
            .set(Box::new(move || {
                let target = target.clone();
                thread::spawn(move || target.kill(1));
            }))
            .is_ok()
    );

    let seeds = vec![(0, RelayBag::fresh(500)), (1, RelayBag::fused(500, 20))];
    let result = glb.compute(seeds, Sum(0)).unwrap();

    // All progress flowed through the collector; none of it may vanish
    // with the aborted wave.
    assert_eq!(result, Sum(1000));
    assert_eq!(glb.waves(), 2);
    assert_eq!(glb.placement(), vec![0, 2]);
}

/// Hook fired by [`TripwireBag::submit`], from the gather-phase death
/// test only.
static GATHER_CHAOS: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// An [`IntervalBag`] that trips a hook when its progress is folded at
/// gather time. The armed flag travels with checkpoints; repeated trips
/// are harmless because killing a dead place is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TripwireBag {
    inner: IntervalBag,
    armed: bool,
}

impl TripwireBag {
    fn new(items: u64, armed: bool) -> Self {
        Self {
            inner: IntervalBag::new(items),
            armed,
        }
    }
}

impl Bag for TripwireBag {
    type Result = Sum;

    fn kind(&self) -> &'static str {
        "tripwire"
    }

    fn process(&mut self, work_amount: usize, _collector: &mut dyn WorkCollector<Self>) {
        struct Sink;
        impl WorkCollector<IntervalBag> for Sink {
            fn give_bag(&mut self, _bag: IntervalBag) {}
            fn give_fold(&mut self, _fold: Sum) {}
        }
        self.inner.process(work_amount, &mut Sink);
    }

    fn split(&mut self) -> Option<Self> {
        self.inner.split().map(|inner| Self {
            inner,
            armed: false,
        })
    }

    fn merge(&mut self, other: Self) {
        self.inner.merge(other.inner);
        self.armed = self.armed || other.armed;
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn submit(&self, result: &mut Sum) {
        if self.armed {
            if let Some(chaos) = GATHER_CHAOS.get() {
                chaos();
            }
        }
        self.inner.submit(result);
    }
}

#[test]
fn death_around_gather_never_undercounts() {
    init_tracing();
    let runtime = LocalRuntime::new(3); // 2 slots, 1 spare
    let store = CheckpointStore::open_in_memory().unwrap();
    let config = GlbConfig::default().with_work_unit(25);
    let glb: ResilientGlb<TripwireBag> =
        ResilientGlb::new(runtime.clone(), &Ring, config, store, 2).unwrap();

    // The coordinator's place dies while (or just after) the group folds
    // results. Whatever the timing, the returned result must account for
    // every item: either the round's death forces a retry or the gather
    // completed before the loss.
    let target = runtime.clone();
    assert!(
        GATHER_CHAOS
            .set(Box::new(move || {
                let target = target.clone();
                thread::spawn(move || target.kill(0));
            }))
            .is_ok()
    );

    let seeds = vec![
        (0, TripwireBag::new(200, false)),
        (1, TripwireBag::new(200, true)),
    ];
    let result = glb.compute(seeds, Sum(0)).unwrap();

    assert_eq!(result, Sum(400));
}

#[test]
fn exhausted_spares_surface_as_an_error() {
    init_tracing();
    let runtime = LocalRuntime::new(2); // 2 slots, no spare
    let store = CheckpointStore::open_in_memory().unwrap();
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime.clone(), &Ring, GlbConfig::default(), store, 2).unwrap();

    runtime.kill(1);
    let result = glb.compute(vec![(0, FusedBag::fresh(10))], Sum(0));

    assert!(matches!(
        result,
        Err(ResilientError::SparesExhausted { slot: 1 })
    ));
}

#[test]
fn repeated_computations_reuse_one_instance() {
    init_tracing();
    let runtime = LocalRuntime::new(4);
    let store = CheckpointStore::open_in_memory().unwrap();
    let config = GlbConfig::default().with_work_unit(25);
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime, &Ring, config, store, 3).unwrap();

    let first = glb
        .compute(vec![(0, FusedBag::fresh(300))], Sum(0))
        .unwrap();
    let second = glb
        .compute(vec![(1, FusedBag::fresh(77))], Sum(0))
        .unwrap();

    assert_eq!(first, Sum(300));
    assert_eq!(second, Sum(77)); // the cleared store holds no stale records
    assert_eq!(glb.waves(), 1);
}

#[test]
fn on_disk_store_backs_a_computation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(&dir.path().join("glb.redb")).unwrap();

    let runtime = LocalRuntime::new(4);
    let config = GlbConfig::default().with_work_unit(25);
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime, &Ring, config, store.clone(), 3).unwrap();

    let result = glb
        .compute(vec![(0, FusedBag::fresh(250))], Sum(0))
        .unwrap();

    assert_eq!(result, Sum(250));
    assert_eq!(glb.waves(), 1);

    // The durable image outlives the computation on disk.
    let mut durable = 0;
    for slot in 0..3 {
        if let Some(record) = store.get::<FusedBag>(slot).unwrap() {
            durable += record.bags.iter().map(|b| b.processed()).sum::<u64>();
        }
    }
    assert_eq!(durable, 250);
}

#[test]
fn seed_slot_out_of_range_is_rejected() {
    init_tracing();
    let runtime = LocalRuntime::new(4);
    let store = CheckpointStore::open_in_memory().unwrap();
    let glb: ResilientGlb<FusedBag> =
        ResilientGlb::new(runtime, &Ring, GlbConfig::default(), store, 2).unwrap();

    let result = glb.compute(vec![(5, FusedBag::fresh(1))], Sum(0));
    assert!(matches!(
        result,
        Err(ResilientError::SeedOutOfRange { slot: 5, slots: 2 })
    ));
}
