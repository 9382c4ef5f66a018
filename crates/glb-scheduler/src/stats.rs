//! Per-place scheduling counters, reset at the start of every computation.

use serde::{Deserialize, Serialize};

/// Counters recorded by one place over one computation.
///
/// `suffered` counters are increments at the victim; `attempted`/
/// `success` at the thief. Every random steal attempt is answered by
/// exactly one deal, so `steals_attempted == deals_received` holds at
/// every place once a computation has quiesced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceStats {
    /// Processing quanta executed.
    pub quanta: u64,
    /// Random steal requests sent.
    pub steals_attempted: u64,
    /// Random steals that yielded work.
    pub steals_success: u64,
    /// Random steal requests received from peers.
    pub steals_received: u64,
    /// Splits handed to random thieves.
    pub steals_suffered: u64,
    /// Deals (empty or not) received in answer to random steals.
    pub deals_received: u64,
    /// Lifeline registrations sent.
    pub lifeline_steals_attempted: u64,
    /// Lifeline deals received.
    pub lifeline_steals_success: u64,
    /// Splits handed to lifeline thieves.
    pub lifeline_steals_suffered: u64,
}
