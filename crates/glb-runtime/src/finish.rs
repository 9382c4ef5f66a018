//! Completion detection for counted tasks ("finish" barrier).
//!
//! A counted task registers before it is dispatched and completes when its
//! closure returns. Because children register from inside their parent's
//! closure, the pending count can only reach zero once the whole spawn
//! tree has drained.

use std::sync::{Condvar, Mutex};

struct Inner {
    pending: u64,
    deaths: Vec<usize>,
}

/// Tracks the counted tasks of one barrier round, plus any place deaths
/// observed while the round was in flight.
pub struct Finish {
    inner: Mutex<Inner>,
    quiesced: Condvar,
}

impl Finish {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: 0,
                deaths: Vec::new(),
            }),
            quiesced: Condvar::new(),
        }
    }

    /// Register one counted task. Must happen before the task is handed
    /// to a thread.
    pub fn register(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending += 1;
    }

    /// Mark one counted task complete (or lost to a dead place).
    pub fn complete(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending -= 1;
        if inner.pending == 0 {
            self.quiesced.notify_all();
        }
    }

    /// Record a place death observed during this round.
    pub fn record_death(&self, place: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.deaths.contains(&place) {
            inner.deaths.push(place);
        }
    }

    /// Block until every registered task has completed; returns the places
    /// that died along the way.
    pub fn await_quiescence(&self) -> Vec<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while inner.pending > 0 {
            inner = self
                .quiesced
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        std::mem::take(&mut inner.deaths)
    }
}

impl Default for Finish {
    fn default() -> Self {
        Self::new()
    }
}
