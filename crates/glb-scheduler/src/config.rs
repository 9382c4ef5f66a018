//! Scheduler tuning knobs.

use serde::{Deserialize, Serialize};

/// Default number of items to process before tending to thieves.
pub const DEFAULT_WORK_UNIT: usize = 40;

/// Default number of random steal attempts before falling back on the
/// lifeline scheme.
pub const DEFAULT_STEAL_ATTEMPTS: usize = 1;

/// Per-computation scheduler configuration.
///
/// `work_unit` is the unit of responsiveness: smaller values answer
/// thieves faster at the cost of more distribute passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlbConfig {
    /// Items processed per quantum between distribute passes.
    pub work_unit: usize,
    /// Random steal attempts per queue drain.
    pub steal_attempts: usize,
}

impl Default for GlbConfig {
    fn default() -> Self {
        Self {
            work_unit: DEFAULT_WORK_UNIT,
            steal_attempts: DEFAULT_STEAL_ATTEMPTS,
        }
    }
}

impl GlbConfig {
    /// Set the processing quantum.
    pub fn with_work_unit(mut self, work_unit: usize) -> Self {
        self.work_unit = work_unit.max(1);
        self
    }

    /// Set the number of random steal attempts.
    pub fn with_steal_attempts(mut self, steal_attempts: usize) -> Self {
        self.steal_attempts = steal_attempts;
        self
    }
}
