use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Type alias for wall-clock time measured in microseconds.
pub type SyncTime = u64;
pub const NEVER: SyncTime = SyncTime::MAX;

/// Source of wall-clock time for a [`BeatClock`](super::BeatClock).
///
/// Implementations must be monotonic.
pub trait TimeSource: Send + Sync {
    fn micros(&self) -> SyncTime;
}

/// Monotonic machine time, counted from the moment the source was created.
#[derive(Debug)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        MonotonicTime {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn micros(&self) -> SyncTime {
        self.origin.elapsed().as_micros() as SyncTime
    }
}

/// Time that only moves when told to.
///
/// Used for offline rendering and deterministic tests.
#[derive(Debug, Default)]
pub struct ManualTime {
    now: AtomicU64,
}

impl ManualTime {
    pub fn new(start: SyncTime) -> Self {
        ManualTime {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.advance_micros(by.as_micros() as SyncTime);
    }

    pub fn advance_micros(&self, micros: SyncTime) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }

    /// Moves time forward to `date`. Never moves backwards.
    pub fn set(&self, date: SyncTime) {
        self.now.fetch_max(date, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn micros(&self) -> SyncTime {
        self.now.load(Ordering::SeqCst)
    }
}
