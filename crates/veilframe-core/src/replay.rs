//! Sliding window of incoming connection numbers.
//!
//! Tracks which connection numbers of one incoming period have been used.
//! Connections may arrive out of order (e.g. over store-and-forward media),
//! so any unseen number in `[base, base + size)` is acceptable; numbers below
//! the base are gone for good.
//!
//! ```text
//!  base
//!   │
//!   ▼
//!   [ ][x][ ][x][ ][ ] ... [ ]     x = seen
//!    n  n+1            n+size-1
//! ```
//!
//! Marking a number as seen slides the window in two steps:
//!
//! 1. Far enough that the highest seen number sits in the lower half, so at
//!    least `size / 2` numbers above it stay open. Unseen numbers that fall
//!    below the new base are given up; a sender that skips or loses a number
//!    cannot stall the period.
//! 2. Past every seen number at the start of the window.
//!
//! Replay state stays `O(size)` no matter how many connections a period
//! carries.

use serde::{Deserialize, Serialize};

/// Largest supported window.
pub const MAX_WINDOW_SIZE: u32 = 64;

/// Replay and reordering window for one incoming period.
///
/// # Invariants
///
/// - Bit `i` of `seen` marks `base + i` as used
/// - Bit 0 is always clear: a seen base is slid past immediately
/// - No bit at or above `size` is set
/// - At least `size / 2` numbers above the highest seen number are open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderingWindow {
    base: u64,
    seen: u64,
    size: u32,
}

impl ReorderingWindow {
    /// Empty window starting at connection number 0.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or greater than [`MAX_WINDOW_SIZE`].
    pub fn new(size: u32) -> Self {
        assert!((1..=MAX_WINDOW_SIZE).contains(&size), "window size {size} out of range");
        Self { base: 0, seen: 0, size }
    }

    /// Lowest connection number that may still be accepted.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Number of connection numbers tracked.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether `connection_number` is inside the window and unused.
    pub fn is_acceptable(&self, connection_number: u64) -> bool {
        match self.offset(connection_number) {
            Some(offset) => self.seen & (1 << offset) == 0,
            None => false,
        }
    }

    /// Mark `connection_number` as used.
    ///
    /// Returns `false`, leaving the window unchanged, if the number was not
    /// acceptable.
    pub fn mark_seen(&mut self, connection_number: u64) -> bool {
        let Some(offset) = self.offset(connection_number) else {
            return false;
        };
        if self.seen & (1 << offset) != 0 {
            return false;
        }

        self.seen |= 1 << offset;

        let highest = u64::BITS - 1 - self.seen.leading_zeros();
        let mut slide = (highest + 1 + self.size / 2).saturating_sub(self.size);
        slide += self.seen.checked_shr(slide).unwrap_or(0).trailing_ones();

        self.base = self.base.saturating_add(u64::from(slide));
        self.seen = self.seen.checked_shr(slide).unwrap_or(0);

        debug_assert_eq!(self.seen & 1, 0);
        true
    }

    /// Unused connection numbers in the window, ascending.
    pub fn unseen(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.size)
            .filter(|&offset| self.seen & (1 << offset) == 0)
            .map(|offset| self.base.saturating_add(u64::from(offset)))
    }

    /// Whether the window state satisfies its invariants.
    ///
    /// Used to reject corrupt persisted state.
    pub fn is_valid(&self) -> bool {
        let in_range = (1..=MAX_WINDOW_SIZE).contains(&self.size);
        let high_bits_clear = self.seen.checked_shr(self.size).unwrap_or(0) == 0;
        let upper_half_open =
            self.seen.checked_shr(self.size - self.size / 2).unwrap_or(0) == 0;
        in_range && high_bits_clear && upper_half_open && self.seen & 1 == 0
    }

    fn offset(&self, connection_number: u64) -> Option<u32> {
        let offset = connection_number.checked_sub(self.base)?;
        if offset < u64::from(self.size) { Some(offset as u32) } else { None }
    }
}
