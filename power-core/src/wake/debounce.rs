//! Cool-down filter applied to wake edges.
//!
//! The last accepted timestamp lives in an [`AtomicU64`] and only moves
//! forward through compare-and-swap, so the filter stays sound even if the
//! edge handler is ever preempted by another writer.

use core::time::Duration;

use portable_atomic::{AtomicU64, Ordering};

/// Minimum spacing between two accepted edges.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Verdict for a single edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebounceDecision {
    Accepted,
    /// Arrived within the window of the previous accepted edge.
    Dropped,
}

impl DebounceDecision {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, DebounceDecision::Accepted)
    }
}

pub struct DebounceFilter {
    window_us: u64,
    last_accepted_us: AtomicU64,
}

impl DebounceFilter {
    /// Creates a filter with the default window whose clock starts at `now_us`.
    #[must_use]
    pub const fn new(now_us: u64) -> Self {
        Self::with_window(DEBOUNCE_WINDOW, now_us)
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn with_window(window: Duration, now_us: u64) -> Self {
        Self {
            window_us: window.as_micros() as u64,
            last_accepted_us: AtomicU64::new(now_us),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_micros(self.window_us)
    }

    #[must_use]
    pub fn last_accepted_us(&self) -> u64 {
        self.last_accepted_us.load(Ordering::Acquire)
    }

    /// Accepts the edge at `now_us` if more than one window has passed since
    /// the last accepted edge, advancing the stored time; otherwise leaves the
    /// state untouched.
    pub fn check(&self, now_us: u64) -> DebounceDecision {
        let mut last = self.last_accepted_us.load(Ordering::Acquire);
        loop {
            if now_us.saturating_sub(last) <= self.window_us {
                return DebounceDecision::Dropped;
            }
            match self.last_accepted_us.compare_exchange_weak(
                last,
                now_us,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return DebounceDecision::Accepted,
                Err(current) => last = current,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_exactly_one_window_later_is_dropped() {
        let filter = DebounceFilter::new(0);
        assert_eq!(filter.check(100_000), DebounceDecision::Dropped);
        assert_eq!(filter.last_accepted_us(), 0);
        assert_eq!(filter.check(100_001), DebounceDecision::Accepted);
        assert_eq!(filter.last_accepted_us(), 100_001);
    }

    #[test]
    fn bounces_do_not_extend_the_window() {
        let filter = DebounceFilter::new(0);
        assert!(filter.check(500_000).is_accepted());
        for bounce in [500_010, 520_000, 599_999, 600_000] {
            assert_eq!(filter.check(bounce), DebounceDecision::Dropped);
        }
        assert!(filter.check(600_001).is_accepted());
    }

    #[test]
    fn edges_from_before_the_last_accept_are_dropped() {
        let filter = DebounceFilter::new(1_000_000);
        assert_eq!(filter.check(10), DebounceDecision::Dropped);
        assert_eq!(filter.last_accepted_us(), 1_000_000);
    }

    #[test]
    fn custom_window() {
        let filter = DebounceFilter::with_window(Duration::from_millis(5), 0);
        assert_eq!(filter.window(), Duration::from_millis(5));
        assert!(filter.check(5_001).is_accepted());
    }
}
