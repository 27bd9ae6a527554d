//! Events raised while recognizing incoming connections.
//!
//! Events are returned to the caller rather than acted on: the key manager
//! never widens its window or re-pairs on its own.

use crate::ids::{ContactId, TransportId};

/// Notable changes to a pair's timing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// The clock-difference estimate moved after a recognized connection
    ClockDiffAdjusted {
        /// Contact whose estimate changed
        contact: ContactId,
        /// Transport whose estimate changed
        transport: TransportId,
        /// Estimate before the observation, in milliseconds
        old_ms: i64,
        /// Estimate after the observation, in milliseconds
        new_ms: i64,
    },

    /// Several connections in a row matched a period other than the local
    /// one. The peer's clock is drifting towards the edge of the window;
    /// higher layers may resynchronise or re-pair.
    ClockSkewDivergence {
        /// Contact whose clock diverges
        contact: ContactId,
        /// Transport the connections arrived on
        transport: TransportId,
        /// Current clock-difference estimate, in milliseconds
        estimated_clock_diff_ms: i64,
        /// Consecutive matches outside the local period
        consecutive_edge_matches: u32,
    },
}
