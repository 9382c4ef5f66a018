//! PlaceGroup — logical slots mapped to physical places, with spares.

use glb_runtime::LocalRuntime;
use tracing::warn;

use crate::error::{ResilientError, ResilientResult};

/// A fixed-size group of logical slots backed by physical places.
///
/// Checkpoints, lifelines, and steal targets are all keyed by slot, so a
/// slot keeps its identity across failures. The physical places beyond
/// the group size are spares; [`PlaceGroup::fix`] remaps each dead slot
/// to the next unused spare, consumed in increasing id order so a place
/// is never reused after it has been mapped out.
#[derive(Debug, Clone)]
pub struct PlaceGroup {
    slots: Vec<usize>,
    /// Highest physical id handed out so far. Spares are drawn above it.
    watermark: usize,
}

impl PlaceGroup {
    /// Map slots `0..size` onto places `0..size`, leaving the rest of the
    /// runtime's places as spares.
    pub fn new(runtime: &LocalRuntime, size: usize) -> ResilientResult<Self> {
        if size == 0 || size > runtime.places() {
            return Err(ResilientError::GroupTooLarge {
                size,
                places: runtime.places(),
            });
        }
        Ok(Self {
            slots: (0..size).collect(),
            watermark: size - 1,
        })
    }

    /// Number of slots in the group.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// The physical place currently backing `slot`.
    pub fn place_of(&self, slot: usize) -> usize {
        self.slots[slot]
    }

    /// The current slot-to-place mapping.
    pub fn places(&self) -> &[usize] {
        &self.slots
    }

    /// Whether `place` currently backs a slot.
    pub fn contains(&self, place: usize) -> bool {
        self.slots.contains(&place)
    }

    /// Whether every slot's place is alive.
    pub fn all_alive(&self, runtime: &LocalRuntime) -> bool {
        self.slots.iter().all(|&p| runtime.is_alive(p))
    }

    /// Remap every dead slot to a live spare. Returns the replacements
    /// made, or [`ResilientError::SparesExhausted`] if a dead slot cannot
    /// be covered.
    pub fn fix(&mut self, runtime: &LocalRuntime) -> ResilientResult<Vec<(usize, usize)>> {
        let mut replaced = Vec::new();
        for slot in 0..self.slots.len() {
            if runtime.is_alive(self.slots[slot]) {
                continue;
            }
            let spare = (self.watermark + 1..runtime.places())
                .find(|&p| runtime.is_alive(p))
                .ok_or(ResilientError::SparesExhausted { slot })?;
            warn!(slot, dead = self.slots[slot], spare, "slot remapped to spare");
            self.slots[slot] = spare;
            self.watermark = spare;
            replaced.push((slot, spare));
        }
        Ok(replaced)
    }
}
