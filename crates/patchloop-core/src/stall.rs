//! `StallDetector`: watches the `(failingCount, topTestId, signature)`
//! triple across repair-loop steps and flags a stall once it goes three
//! consecutive iterations without improvement.

use std::sync::Mutex;

/// Tracks the most recent `(failingCount, topTestId, signature)` triple
/// and how many consecutive steps have passed without improvement.
/// Improvement is `failingCount < last` OR `topTest != last` OR
/// `sig != last`; anything else resets nothing and extends the streak.
/// Once the streak reaches `threshold` the run is considered stalled and
/// the controller should widen its strategy or bail out.
pub struct StallDetector {
    threshold: usize,
    state: Mutex<StallState>,
}

struct StallState {
    last: Option<(usize, Option<String>, String)>,
    repeat_count: usize,
}

impl StallDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            state: Mutex::new(StallState { last: None, repeat_count: 0 }),
        }
    }

    /// Records one step's observed failure state and reports whether the
    /// run has stalled. The first observation always counts as a
    /// baseline (never itself "no improvement"), matching the spec's
    /// "three consecutive iterations with no improvement" definition.
    pub fn update(&self, failing_count: usize, top_failing_test: Option<&str>, sig: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let improved = match &state.last {
            Some((last_count, last_top, last_sig)) => {
                failing_count < *last_count || top_failing_test != last_top.as_deref() || sig != last_sig
            }
            None => true,
        };

        if improved {
            state.repeat_count = 0;
        } else {
            state.repeat_count += 1;
        }
        state.last = Some((failing_count, top_failing_test.map(String::from), sig.to_string()));

        state.repeat_count >= self.threshold
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.last = None;
        state.repeat_count = 0;
    }

    pub fn repeat_count(&self) -> usize {
        self.state.lock().unwrap().repeat_count
    }
}
