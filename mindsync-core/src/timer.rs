//! Timer bookkeeping for debounce and idle triggers.
//!
//! Timers never sleep themselves: they hold a deadline on a millisecond
//! timeline supplied by the caller. The driver maps that timeline to tokio
//! time; tests advance it by hand, so nothing here depends on wall-clock time.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock timestamps (milliseconds since the Unix epoch).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A single resettable one-shot timer.
///
/// Arming an armed timer replaces its deadline: pending fires are reset,
/// never stacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<u64>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)schedule to fire `delay_ms` after `now`.
    pub fn arm(&mut self, now: u64, delay_ms: u64) {
        self.deadline = Some(now.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire_if_due(&mut self, now: u64) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Due at the next poll, whatever the time.
    pub fn arm_now(&mut self) {
        self.deadline = Some(0);
    }
}

/// Earliest deadline among a set of timers.
pub fn earliest<'a>(timers: impl IntoIterator<Item = &'a Timer>) -> Option<u64> {
    timers.into_iter().filter_map(|t| t.deadline()).min()
}
