//! The in-process place runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::finish::Finish;

type FailureHandler = Box<dyn Fn(usize) + Send + Sync + 'static>;

/// A fixed group of places, each a stable integer id, with fire-and-forget
/// task spawning, a counted-task barrier, and failure injection.
///
/// One barrier round is in flight at a time (computations are waves, run
/// back to back), so the current [`Finish`] tracker is ambient state
/// installed by [`LocalRuntime::run_under_barrier`].
pub struct LocalRuntime {
    alive: Vec<AtomicBool>,
    barrier: Mutex<Option<Arc<Finish>>>,
    failure_handlers: Mutex<Vec<FailureHandler>>,
}

impl LocalRuntime {
    /// A runtime with `places` live places.
    pub fn new(places: usize) -> Arc<Self> {
        Arc::new(Self {
            alive: (0..places).map(|_| AtomicBool::new(true)).collect(),
            barrier: Mutex::new(None),
            failure_handlers: Mutex::new(Vec::new()),
        })
    }

    /// Number of places in the group, dead ones included.
    pub fn places(&self) -> usize {
        self.alive.len()
    }

    /// Whether `place` is still alive.
    pub fn is_alive(&self, place: usize) -> bool {
        self.alive
            .get(place)
            .map(|a| a.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Register a handler invoked with the id of every place that dies.
    pub fn on_place_failure(&self, handler: impl Fn(usize) + Send + Sync + 'static) {
        let mut handlers = self
            .failure_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        handlers.push(Box::new(handler));
    }

    /// Fire-and-forget, untracked task at `place`. Dropped silently when
    /// the target is dead, like a message lost on the wire.
    pub fn spawn_at_uncounted(&self, place: usize, job: impl FnOnce() + Send + 'static) {
        if !self.is_alive(place) {
            debug!(place, "uncounted task dropped, target dead");
            return;
        }
        thread::spawn(job);
    }

    /// Counted task at `place`, tracked by the barrier in flight.
    ///
    /// An out-of-range place id is rejected. Spawning at a dead place
    /// still balances the barrier count; the
    /// death itself was already recorded by [`LocalRuntime::kill`].
    pub fn spawn_at(&self, place: usize, job: impl FnOnce() + Send + 'static) -> RuntimeResult<()> {
        if place >= self.alive.len() {
            return Err(RuntimeError::PlaceOutOfRange(place, self.alive.len()));
        }
        let finish = self
            .current_finish()
            .ok_or(RuntimeError::NoBarrier(place))?;
        finish.register();
        if !self.is_alive(place) {
            debug!(place, "counted task lost, target dead");
            finish.complete();
            return Ok(());
        }
        thread::spawn(move || {
            job();
            finish.complete();
        });
        Ok(())
    }

    /// Run `f` under a fresh barrier and block until every counted task it
    /// transitively spawned has completed. Errors if any place died while
    /// the round was in flight.
    pub fn run_under_barrier(&self, f: impl FnOnce()) -> RuntimeResult<()> {
        let finish = Arc::new(Finish::new());
        {
            let mut barrier = self.barrier.lock().unwrap_or_else(|e| e.into_inner());
            *barrier = Some(finish.clone());
        }
        f();
        let deaths = finish.await_quiescence();
        {
            let mut barrier = self.barrier.lock().unwrap_or_else(|e| e.into_inner());
            *barrier = None;
        }
        if deaths.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::PlacesDied(deaths))
        }
    }

    /// Failure injection: mark `place` dead, record the death in the
    /// barrier in flight, and fire every failure handler.
    pub fn kill(&self, place: usize) {
        if place >= self.alive.len() || !self.alive[place].swap(false, Ordering::AcqRel) {
            return; // already dead or out of range
        }
        warn!(place, "place killed");
        if let Some(finish) = self.current_finish() {
            finish.record_death(place);
        }
        let handlers = self
            .failure_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(place);
        }
    }

    fn current_finish(&self) -> Option<Arc<Finish>> {
        self.barrier
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
