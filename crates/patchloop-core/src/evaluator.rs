//! `PatchEvaluator` and `WinnerSelector`: evaluates candidate diffs in
//! parallel worktrees (focused-then-full verification) and picks a winner
//! to apply to the main repo.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{Command, ResourceCaps};
use crate::domain::Diff;
use crate::executor::Executor;
use crate::sandbox::Sandbox;

/// Bounded fan-out: at most this many worktrees evaluated concurrently.
pub const MAX_CONCURRENT_EVALUATIONS: usize = 3;

#[derive(Debug, Clone)]
pub struct EvalCandidate {
    pub diff: Diff,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub diff: Diff,
    pub ok: bool,
    pub info: String,
}

/// Evaluates `(diff, temperature)` candidates against a shared sandbox.
/// Each candidate gets its own worktree, named after the first 10 hex
/// characters of the diff hash; the worktree is dropped on every exit
/// path. Results preserve input order.
pub struct PatchEvaluator {
    sandbox: Arc<Sandbox>,
    executor: Arc<dyn Executor>,
    focus_timeout_sec: u64,
    full_timeout_sec: u64,
    resource_caps: ResourceCaps,
}

impl PatchEvaluator {
    pub fn new(sandbox: Arc<Sandbox>, executor: Arc<dyn Executor>) -> Self {
        Self {
            sandbox,
            executor,
            focus_timeout_sec: 90,
            full_timeout_sec: 180,
            resource_caps: ResourceCaps::default(),
        }
    }

    pub fn with_timeouts(mut self, focus_timeout_sec: u64, full_timeout_sec: u64) -> Self {
        self.focus_timeout_sec = focus_timeout_sec;
        self.full_timeout_sec = full_timeout_sec;
        self
    }

    pub fn with_resource_caps(mut self, resource_caps: ResourceCaps) -> Self {
        self.resource_caps = resource_caps;
        self
    }

    pub async fn evaluate(
        &self,
        candidates: Vec<EvalCandidate>,
        focus_cmd: &[String],
        full_cmd: &[String],
    ) -> Vec<EvalOutcome> {
        let mut results = vec![None; candidates.len()];

        for chunk_start in (0..candidates.len()).step_by(MAX_CONCURRENT_EVALUATIONS) {
            let chunk_end = (chunk_start + MAX_CONCURRENT_EVALUATIONS).min(candidates.len());
            let mut tasks: Vec<JoinHandle<(usize, EvalOutcome)>> = Vec::new();

            for idx in chunk_start..chunk_end {
                let candidate = candidates[idx].clone();
                let sandbox = Arc::clone(&self.sandbox);
                let executor = Arc::clone(&self.executor);
                let focus_cmd = focus_cmd.to_vec();
                let full_cmd = full_cmd.to_vec();
                let focus_timeout = self.focus_timeout_sec;
                let full_timeout = self.full_timeout_sec;
                let resource_caps = self.resource_caps;

                tasks.push(tokio::spawn(async move {
                    let outcome = evaluate_one(
                        sandbox,
                        executor,
                        candidate.diff,
                        &focus_cmd,
                        &full_cmd,
                        focus_timeout,
                        full_timeout,
                        resource_caps,
                    )
                    .await;
                    (idx, outcome)
                }));
            }

            for task in tasks {
                match task.await {
                    Ok((idx, outcome)) => results[idx] = Some(outcome),
                    Err(e) => warn!(error = %e, "evaluator task panicked"),
                }
            }
        }

        results.into_iter().flatten().collect()
    }
}

async fn evaluate_one(
    sandbox: Arc<Sandbox>,
    executor: Arc<dyn Executor>,
    diff: Diff,
    focus_cmd: &[String],
    full_cmd: &[String],
    focus_timeout_sec: u64,
    full_timeout_sec: u64,
    resource_caps: ResourceCaps,
) -> EvalOutcome {
    let suffix = diff.worktree_suffix().to_string();
    let handle = match sandbox.make_worktree(Some(&suffix)).await {
        Ok(h) => h,
        Err(e) => {
            return EvalOutcome {
                diff,
                ok: false,
                info: format!("apply_failed:worktree allocation failed: {e}"),
            }
        }
    };
    let dir = handle.path().to_path_buf();

    let outcome = async {
        if let Err(e) = sandbox.apply_patch_in_dir(&dir, &diff.text).await {
            return EvalOutcome {
                diff: diff.clone(),
                ok: false,
                info: format!("apply_failed:{e}"),
            };
        }

        let focus_result = executor
            .run(&Command::new(focus_cmd.to_vec(), &dir, focus_timeout_sec).with_resource_caps(resource_caps))
            .await;
        match focus_result {
            Ok(r) if r.ok => {}
            Ok(r) => {
                return EvalOutcome {
                    diff: diff.clone(),
                    ok: false,
                    info: format!("focus_failed:exit={} timed_out={}", r.exit_code, r.timed_out),
                }
            }
            Err(e) => {
                return EvalOutcome {
                    diff: diff.clone(),
                    ok: false,
                    info: format!("focus_failed:{e}"),
                }
            }
        }

        let full_result = executor
            .run(&Command::new(full_cmd.to_vec(), &dir, full_timeout_sec).with_resource_caps(resource_caps))
            .await;
        match full_result {
            Ok(r) if r.ok => EvalOutcome {
                diff: diff.clone(),
                ok: true,
                info: "success".to_string(),
            },
            Ok(r) => EvalOutcome {
                diff: diff.clone(),
                ok: false,
                info: format!("full_failed:exit={} timed_out={}", r.exit_code, r.timed_out),
            },
            Err(e) => EvalOutcome {
                diff: diff.clone(),
                ok: false,
                info: format!("full_failed:{e}"),
            },
        }
    }
    .await;

    debug!(suffix = %suffix, ok = outcome.ok, info = %outcome.info, "evaluated candidate");
    if let Err(e) = sandbox.drop_worktree(handle).await {
        warn!(suffix = %suffix, error = %e, "worktree cleanup failed");
    }

    outcome
}

/// Picks a winner among successful evaluator outcomes. The reference
/// policy is first-successful-wins; `score` is exposed for callers that
/// want to break ties explicitly instead.
pub fn first_successful(outcomes: &[EvalOutcome]) -> Option<&EvalOutcome> {
    outcomes.iter().find(|o| o.ok)
}

/// `score = linesChanged + 5*filesChanged + 10*testFilesEdited - 5*tracebackFilesEdited`.
/// Lower is better. `traceback_files` names files the failure's parsed
/// stack trace implicated.
pub fn score_diff(diff: &Diff, traceback_files: &[String]) -> i64 {
    let lines_changed = diff.total_lines_changed() as i64;
    let files_changed = diff.files_changed.len() as i64;
    let test_files_edited = diff.files_changed.iter().filter(|f| crate::hygiene::is_test_file(f)).count() as i64;
    let traceback_files_edited = diff
        .files_changed
        .iter()
        .filter(|f| traceback_files.contains(f))
        .count() as i64;

    lines_changed + 5 * files_changed + 10 * test_files_edited - 5 * traceback_files_edited
}

/// Selects the lowest-scoring successful outcome among `outcomes`, using
/// `first_successful` as the tie-break when scores are equal (stable
/// w.r.t. input order since `min_by_key` keeps the first minimum).
pub fn select_winner<'a>(outcomes: &'a [EvalOutcome], traceback_files: &[String]) -> Option<&'a EvalOutcome> {
    outcomes
        .iter()
        .filter(|o| o.ok)
        .min_by_key(|o| score_diff(&o.diff, traceback_files))
}
