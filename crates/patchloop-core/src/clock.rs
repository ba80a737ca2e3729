//! Deterministic and live clock implementations.
//!
//! The core must not call a real system clock anywhere except through this
//! trait. Any subsystem that truly needs wall-clock time (a Docker health
//! wait, for instance) must assert `TimeMode::Live` and fail otherwise.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::domain::{ControllerError, Result, TimeMode};

/// Abstracts "now" for every component that needs it.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn time(&self) -> i64;
    fn perf_counter(&self) -> u64;
    fn monotonic_steps(&self) -> u64;
    fn tick(&self, n: u64);
    fn mode(&self) -> TimeMode;
}

/// `now() = start + step_seconds * steps`. Used whenever the run must be
/// bit-for-bit replayable.
pub struct FrozenClock {
    start: DateTime<Utc>,
    step_seconds: i64,
    steps: AtomicU64,
}

impl FrozenClock {
    pub fn new(start: DateTime<Utc>, step_seconds: i64) -> Self {
        Self {
            start,
            step_seconds,
            steps: AtomicU64::new(0),
        }
    }
}

impl Clock for FrozenClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let steps = self.steps.load(Ordering::SeqCst) as i64;
        self.start + chrono::Duration::seconds(self.step_seconds * steps)
    }

    fn time(&self) -> i64 {
        self.now_utc().timestamp()
    }

    fn perf_counter(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    fn monotonic_steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    fn tick(&self, n: u64) {
        self.steps.fetch_add(n, Ordering::SeqCst);
    }

    fn mode(&self) -> TimeMode {
        TimeMode::Frozen
    }
}

/// Wraps the host clock for `now_utc`/`time`; `monotonic_steps` still only
/// advances on an explicit `tick`, so step-ordered invariants hold even in
/// live mode.
pub struct LiveClock {
    steps: AtomicU64,
}

impl LiveClock {
    pub fn new() -> Self {
        Self {
            steps: AtomicU64::new(0),
        }
    }

    /// True wall-clock access, gated to live mode only; callers that need
    /// an actual wait (e.g. polling a Docker healthcheck) must go through
    /// this rather than reading the system clock directly.
    pub fn assert_live(mode: TimeMode) -> Result<()> {
        if mode != TimeMode::Live {
            return Err(ControllerError::Input(
                "operation requires TimeMode::Live".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LiveClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LiveClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn time(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn perf_counter(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    fn monotonic_steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    fn tick(&self, n: u64) {
        self.steps.fetch_add(n, Ordering::SeqCst);
    }

    fn mode(&self) -> TimeMode {
        TimeMode::Live
    }
}
