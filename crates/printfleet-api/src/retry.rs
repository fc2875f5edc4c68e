// ── Shared timeout budget for bounded-retry fetches ──
//
// The budget is a single mutable pool of patience shared by every device
// client in the fleet: a slow device grows it step by step until the
// cutoff, at which point one step is handed back and the fetch fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fixed step, in milliseconds, by which the budget grows on each timeout
/// and shrinks when the cutoff is reached.
pub const RETRY_STEP_MS: u64 = 9_000;

/// Mutable shared timeout pool for the bounded-retry fetcher.
///
/// Starting at `initial_ms`, each timed-out attempt grows the budget by
/// [`RETRY_STEP_MS`] until it reaches `cutoff_ms`; the failing caller then
/// restores one step so the pool does not grow without bound across devices.
#[derive(Debug)]
pub struct TimeoutBudget {
    current_ms: AtomicU64,
    cutoff_ms: u64,
}

impl TimeoutBudget {
    pub fn new(initial: Duration, cutoff: Duration) -> Self {
        Self {
            current_ms: AtomicU64::new(initial.as_millis().try_into().unwrap_or(u64::MAX)),
            cutoff_ms: cutoff.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    /// The per-attempt timeout granted right now.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms())
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Relaxed)
    }

    /// Whether the budget has reached the configured cutoff.
    pub fn at_cutoff(&self) -> bool {
        self.current_ms() >= self.cutoff_ms
    }

    /// Grow the budget one step after a timed-out attempt.
    /// Returns the new value in milliseconds.
    pub fn grow(&self) -> u64 {
        self.current_ms.fetch_add(RETRY_STEP_MS, Ordering::Relaxed) + RETRY_STEP_MS
    }

    /// Hand one step back when giving up, so the next caller does not
    /// inherit runaway patience. Returns the new value in milliseconds.
    pub fn restore(&self) -> u64 {
        let mut current = self.current_ms.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(RETRY_STEP_MS);
            match self.current_ms.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
