//! Rotation periods and the window of periods accepted "now".
//!
//! Time is divided into periods of fixed length starting at a per-pair epoch.
//! Both peers compute the same period index from their own clocks, so the
//! window of acceptable periods widens around the local period to absorb
//! clock skew and transport latency, and is clamped so it never covers more
//! than `2 * window_radius + 1` periods. The radius is capped at
//! [`MAX_WINDOW_RADIUS`] and periods are at least [`MIN_PERIOD_LENGTH`] long,
//! which bounds how many secrets a key set holds and how far a rotation
//! walks the period chain.
//!
//! ```text
//!            peer_now - latency - skew          peer_now + skew
//!                        │                             │
//! ... ──┼────── p-1 ─────┼───── p (local) ─────┼────── p+1 ──────┼── ...
//!              [=============== window ==================]
//! ```

use std::{ops::RangeInclusive, time::Duration};

use serde::{Deserialize, Serialize};

/// Largest clock difference between peers the window absorbs.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(24 * 60 * 60);

/// Periods accepted on each side of the local period.
pub const DEFAULT_WINDOW_RADIUS: u64 = 1;

/// Largest window radius honoured, whatever the configuration says.
pub const MAX_WINDOW_RADIUS: u64 = 8;

/// Shortest period length honoured, whatever the configuration says.
pub const MIN_PERIOD_LENGTH: Duration = Duration::from_secs(60);

/// Each observation moves the clock-difference estimate by
/// `1 / DEFAULT_CLOCK_DIFF_DAMPING` of the observed error.
pub const DEFAULT_CLOCK_DIFF_DAMPING: u32 = 4;

/// Consecutive matches outside the local period before a skew event fires.
pub const DEFAULT_SKEW_ALERT_THRESHOLD: u32 = 3;

/// Connection numbers tracked per incoming period.
pub const DEFAULT_REORDERING_WINDOW_SIZE: u32 = 32;

/// Key rotation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Fixed period length. `None` derives it per transport as
    /// `latency + max_clock_skew`. Raised to [`MIN_PERIOD_LENGTH`].
    pub period_length: Option<Duration>,
    /// Largest clock difference between peers the window absorbs
    pub max_clock_skew: Duration,
    /// Periods accepted on each side of the local period (at most
    /// [`MAX_WINDOW_RADIUS`])
    pub window_radius: u64,
    /// Damping divisor for clock-difference updates (at least 1)
    pub clock_diff_damping: u32,
    /// Consecutive non-local matches that raise a skew event
    pub skew_alert_threshold: u32,
    /// Connection numbers tracked per incoming period (1 to 64)
    pub reordering_window_size: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            period_length: None,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            window_radius: DEFAULT_WINDOW_RADIUS,
            clock_diff_damping: DEFAULT_CLOCK_DIFF_DAMPING,
            skew_alert_threshold: DEFAULT_SKEW_ALERT_THRESHOLD,
            reordering_window_size: DEFAULT_REORDERING_WINDOW_SIZE,
        }
    }
}

impl RotationConfig {
    /// Period length for a transport with the given maximum latency.
    pub fn period_length_for(&self, latency: Duration) -> Duration {
        self.period_length.unwrap_or(latency + self.max_clock_skew).max(MIN_PERIOD_LENGTH)
    }

    /// Window radius after the [`MAX_WINDOW_RADIUS`] cap.
    pub fn effective_radius(&self) -> u64 {
        self.window_radius.min(MAX_WINDOW_RADIUS)
    }
}

/// Per-pair timing state: epoch, period length, latency bound and the
/// current estimate of the peer's clock difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParams {
    epoch_ms: u64,
    period_length_ms: u64,
    latency_ms: u64,
    clock_diff_ms: i64,
}

impl TransportParams {
    /// Timing for a pair whose period 0 starts at `epoch_ms`.
    ///
    /// The clock difference starts at zero.
    pub fn new(epoch_ms: u64, period_length: Duration, latency: Duration) -> Self {
        Self {
            epoch_ms,
            period_length_ms: (period_length.as_millis() as u64).max(1),
            latency_ms: latency.as_millis() as u64,
            clock_diff_ms: 0,
        }
    }

    /// Same timing with a given clock-difference estimate.
    #[must_use]
    pub fn with_clock_diff(mut self, clock_diff_ms: i64) -> Self {
        self.clock_diff_ms = clock_diff_ms;
        self
    }

    /// Start of period 0 in milliseconds since the Unix epoch.
    pub fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    /// Length of one period in milliseconds.
    pub fn period_length_ms(&self) -> u64 {
        self.period_length_ms
    }

    /// Maximum transport latency in milliseconds.
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// Estimated peer clock minus local clock, in milliseconds.
    pub fn clock_diff_ms(&self) -> i64 {
        self.clock_diff_ms
    }

    /// Period containing `time_ms`. Times before the epoch are period 0.
    pub fn period_at(&self, time_ms: u64) -> u64 {
        time_ms.saturating_sub(self.epoch_ms) / self.period_length_ms
    }

    /// First millisecond of `period`.
    pub fn period_start(&self, period: u64) -> u64 {
        self.epoch_ms.saturating_add(period.saturating_mul(self.period_length_ms))
    }

    /// Fold the observation "the peer tagged a stream in `period`, received
    /// at local time `now`" into the clock-difference estimate.
    ///
    /// The peer's clock was inside `period` at some moment in
    /// `[now - latency, now]`. If the current estimate is consistent with
    /// that, nothing changes. Otherwise the estimate moves a damped step
    /// towards the nearest consistent value, clamped to the maximum skew, so
    /// a single bogus observation cannot move it far.
    ///
    /// Returns `(old, new)` if the estimate changed.
    pub fn observe_period(
        &mut self,
        period: u64,
        now: u64,
        config: &RotationConfig,
    ) -> Option<(i64, i64)> {
        let start = i128::from(self.period_start(period));
        let end = start + i128::from(self.period_length_ms) - 1;
        let now = i128::from(now);

        let consistent_low = start - now;
        let consistent_high = end - now + i128::from(self.latency_ms);

        let max_skew = config.max_clock_skew.as_millis() as i128;
        let current = i128::from(self.clock_diff_ms);
        let target = current.clamp(consistent_low, consistent_high).clamp(-max_skew, max_skew);
        if target == current {
            return None;
        }

        let error = target - current;
        let mut step = error / i128::from(config.clock_diff_damping.max(1));
        if step == 0 {
            step = error.signum();
        }

        let old = self.clock_diff_ms;
        self.clock_diff_ms = (current + step) as i64;
        Some((old, self.clock_diff_ms))
    }
}

/// Contiguous range of periods acceptable at one instant.
///
/// # Invariants
///
/// - `first <= local <= last`
/// - `last - first <= 2 * window_radius`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationWindow {
    local: u64,
    first: u64,
    last: u64,
}

impl RotationWindow {
    /// Window at local time `now`.
    ///
    /// Covers the periods the peer's clock may be in, given the estimated
    /// clock difference, the transport latency and the maximum skew, clamped
    /// to the effective window radius on each side of the local period. The
    /// local period is always included.
    pub fn current(params: &TransportParams, config: &RotationConfig, now: u64) -> Self {
        let local = params.period_at(now);
        let margin = config.max_clock_skew.as_millis() as u64;
        let radius = config.effective_radius();

        let peer_now = now.saturating_add_signed(params.clock_diff_ms());
        let earliest = peer_now.saturating_sub(params.latency_ms()).saturating_sub(margin);
        let latest = peer_now.saturating_add(margin);

        let first = params.period_at(earliest).max(local.saturating_sub(radius)).min(local);
        let last = params.period_at(latest).min(local.saturating_add(radius)).max(local);

        debug_assert!(first <= local && local <= last);
        Self { local, first, last }
    }

    /// Period containing the local clock.
    pub fn local(&self) -> u64 {
        self.local
    }

    /// Earliest acceptable period.
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Latest acceptable period.
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Whether `period` is acceptable.
    pub fn contains(&self, period: u64) -> bool {
        (self.first..=self.last).contains(&period)
    }

    /// Acceptable periods in ascending order.
    pub fn periods(&self) -> RangeInclusive<u64> {
        self.first..=self.last
    }
}
