//! `BudgetTracker`: the run-level resource ledger. Every phase consults it
//! before doing more work; crossing any limit forces BAILOUT.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub max_steps: u64,
    pub max_steps_without_progress: u64,
    pub max_tool_calls: u64,
    pub max_patch_attempts: u64,
    pub max_verification_attempts: u64,
    pub max_elapsed_minutes: u64,
    pub max_low_confidence_streak: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_steps: 40,
            max_steps_without_progress: 8,
            max_tool_calls: 40,
            max_patch_attempts: 60,
            max_verification_attempts: 80,
            max_elapsed_minutes: 45,
            max_low_confidence_streak: 4,
        }
    }
}

/// Why the budget forced a bailout, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    Steps,
    StepsWithoutProgress,
    ToolCalls,
    PatchAttempts,
    VerificationAttempts,
    ElapsedMinutes,
    LowConfidenceStreak,
}

impl std::fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BudgetExceeded::Steps => "max_steps",
            BudgetExceeded::StepsWithoutProgress => "max_steps_without_progress",
            BudgetExceeded::ToolCalls => "max_tool_calls",
            BudgetExceeded::PatchAttempts => "max_patch_attempts",
            BudgetExceeded::VerificationAttempts => "max_verification_attempts",
            BudgetExceeded::ElapsedMinutes => "max_elapsed_minutes",
            BudgetExceeded::LowConfidenceStreak => "max_low_confidence_streak",
        };
        write!(f, "budget exceeded: {s}")
    }
}

/// Monotonically-increasing counters plus a wall-clock elapsed reading
/// supplied by the caller (so it stays replayable under a frozen clock).
#[derive(Default)]
pub struct BudgetTracker {
    limits: BudgetLimitsCell,
    steps: AtomicU64,
    steps_without_progress: AtomicU64,
    total_tool_calls: AtomicU64,
    patch_attempts: AtomicU64,
    verification_attempts: AtomicU64,
    low_confidence_streak: AtomicU64,
}

struct BudgetLimitsCell(BudgetLimits);
impl Default for BudgetLimitsCell {
    fn default() -> Self {
        Self(BudgetLimits::default())
    }
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits: BudgetLimitsCell(limits),
            steps: AtomicU64::new(0),
            steps_without_progress: AtomicU64::new(0),
            total_tool_calls: AtomicU64::new(0),
            patch_attempts: AtomicU64::new(0),
            verification_attempts: AtomicU64::new(0),
            low_confidence_streak: AtomicU64::new(0),
        }
    }

    pub fn record_step(&self, made_progress: bool) {
        self.steps.fetch_add(1, Ordering::SeqCst);
        if made_progress {
            self.steps_without_progress.store(0, Ordering::SeqCst);
        } else {
            self.steps_without_progress.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_tool_calls(&self, n: u64) {
        self.total_tool_calls.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_patch_attempt(&self) {
        self.patch_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_verification_attempt(&self) {
        self.verification_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_confidence(&self, low_confidence: bool) {
        if low_confidence {
            self.low_confidence_streak.fetch_add(1, Ordering::SeqCst);
        } else {
            self.low_confidence_streak.store(0, Ordering::SeqCst);
        }
    }

    /// Checks all limits against the caller-supplied elapsed time and
    /// returns the first one exceeded, if any. Order matches the
    /// controller's preference for the most actionable diagnosis first.
    pub fn check(&self, elapsed_minutes: u64) -> Option<BudgetExceeded> {
        let limits = &self.limits.0;
        if self.steps.load(Ordering::SeqCst) >= limits.max_steps {
            return Some(BudgetExceeded::Steps);
        }
        if self.steps_without_progress.load(Ordering::SeqCst) >= limits.max_steps_without_progress {
            return Some(BudgetExceeded::StepsWithoutProgress);
        }
        if self.total_tool_calls.load(Ordering::SeqCst) >= limits.max_tool_calls {
            return Some(BudgetExceeded::ToolCalls);
        }
        if self.patch_attempts.load(Ordering::SeqCst) >= limits.max_patch_attempts {
            return Some(BudgetExceeded::PatchAttempts);
        }
        if self.verification_attempts.load(Ordering::SeqCst) >= limits.max_verification_attempts {
            return Some(BudgetExceeded::VerificationAttempts);
        }
        if elapsed_minutes >= limits.max_elapsed_minutes {
            return Some(BudgetExceeded::ElapsedMinutes);
        }
        if self.low_confidence_streak.load(Ordering::SeqCst) >= limits.max_low_confidence_streak {
            return Some(BudgetExceeded::LowConfidenceStreak);
        }
        None
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn steps_without_progress(&self) -> u64 {
        self.steps_without_progress.load(Ordering::SeqCst)
    }

    pub fn total_tool_calls(&self) -> u64 {
        self.total_tool_calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tracker_has_no_exceeded_budget() {
        let t = BudgetTracker::new(BudgetLimits::default());
        assert!(t.check(0).is_none());
    }

    #[test]
    fn test_steps_without_progress_resets_on_progress() {
        let t = BudgetTracker::new(BudgetLimits {
            max_steps_without_progress: 3,
            ..Default::default()
        });
        t.record_step(false);
        t.record_step(false);
        t.record_step(true);
        assert_eq!(t.steps_without_progress(), 0);
        assert!(t.check(0).is_none());
    }

    #[test]
    fn test_steps_without_progress_triggers_bailout() {
        let t = BudgetTracker::new(BudgetLimits {
            max_steps_without_progress: 2,
            ..Default::default()
        });
        t.record_step(false);
        t.record_step(false);
        assert_eq!(t.check(0), Some(BudgetExceeded::StepsWithoutProgress));
    }

    #[test]
    fn test_max_steps_triggers_bailout() {
        let t = BudgetTracker::new(BudgetLimits {
            max_steps: 2,
            max_steps_without_progress: 1000,
            ..Default::default()
        });
        t.record_step(true);
        t.record_step(true);
        assert_eq!(t.check(0), Some(BudgetExceeded::Steps));
    }

    #[test]
    fn test_elapsed_minutes_triggers_bailout() {
        let t = BudgetTracker::new(BudgetLimits::default());
        assert_eq!(t.check(999), Some(BudgetExceeded::ElapsedMinutes));
    }

    #[test]
    fn test_low_confidence_streak_resets_on_high_confidence() {
        let t = BudgetTracker::new(BudgetLimits {
            max_low_confidence_streak: 2,
            ..Default::default()
        });
        t.record_confidence(true);
        t.record_confidence(false);
        t.record_confidence(true);
        assert!(t.check(0).is_none());
    }

    #[test]
    fn test_low_confidence_streak_triggers_bailout() {
        let t = BudgetTracker::new(BudgetLimits {
            max_low_confidence_streak: 2,
            ..Default::default()
        });
        t.record_confidence(true);
        t.record_confidence(true);
        assert_eq!(t.check(0), Some(BudgetExceeded::LowConfidenceStreak));
    }

    #[test]
    fn test_tool_call_accumulation() {
        let t = BudgetTracker::new(BudgetLimits::default());
        t.record_tool_calls(3);
        t.record_tool_calls(2);
        assert_eq!(t.total_tool_calls(), 5);
    }
}
