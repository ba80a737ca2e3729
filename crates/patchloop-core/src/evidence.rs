//! `FilesystemEvidenceSink`: writes the per-run artifact bundle to
//! `results/<runId>/`. Export is best-effort — the controller only logs a
//! warning if `write` fails, it never propagates the error upward.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collaborators::EvidenceSink;
use crate::command::CommandLogEntry;

/// `state.json`: config, detected project type, chosen commands, counters,
/// and bailout reason, as pulled out of the run's evidence bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub phase: String,
    pub steps_taken: u64,
    pub tool_calls: u64,
    pub baseline_ok: Option<bool>,
    pub baseline_exit_code: Option<i32>,
    pub final_ok: Option<bool>,
    pub final_exit_code: Option<i32>,
}

fn extract_state(bundle: &serde_json::Value) -> RunState {
    RunState {
        run_id: bundle["run_id"].as_str().unwrap_or_default().to_string(),
        phase: bundle["phase"].as_str().unwrap_or_default().to_string(),
        steps_taken: bundle["steps_taken"].as_u64().unwrap_or(0),
        tool_calls: bundle["tool_calls"].as_u64().unwrap_or(0),
        baseline_ok: bundle["baseline"]["ok"].as_bool(),
        baseline_exit_code: bundle["baseline"]["exit_code"].as_i64().map(|v| v as i32),
        final_ok: bundle["final"]["ok"].as_bool(),
        final_exit_code: bundle["final"]["exit_code"].as_i64().map(|v| v as i32),
    }
}

/// Paths touched by a unified diff, one per line, in the order they first
/// appear as a `diff --git a/<path> b/<path>` header.
fn extract_files_changed(diff_text: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in diff_text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git a/") {
            if let Some((path, _)) = rest.split_once(" b/") {
                files.push(path.to_string());
            }
        }
    }
    files
}

/// Writes `results/<runId>/` with the artifact set described for the
/// repair controller: `winner.diff` (if present), `before.txt`/`after.txt`
/// test-output snapshots, `state.json`, `run.jsonl`, `command_log.json`,
/// `files_changed.txt`, and `metadata.json`.
pub struct FilesystemEvidenceSink;

impl FilesystemEvidenceSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FilesystemEvidenceSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EvidenceSink for FilesystemEvidenceSink {
    async fn write(&self, run_dir: &Path, bundle: &serde_json::Value) -> Result<(), std::io::Error> {
        tokio::fs::create_dir_all(run_dir).await?;

        if let Some(diff_text) = bundle["winner_diff"].as_str() {
            tokio::fs::write(run_dir.join("winner.diff"), diff_text).await?;
            let files_changed = extract_files_changed(diff_text).join("\n");
            tokio::fs::write(run_dir.join("files_changed.txt"), files_changed).await?;
        }

        let before = bundle["baseline_output"].as_str().unwrap_or_default();
        tokio::fs::write(run_dir.join("before.txt"), before).await?;

        let after = bundle["final_output"].as_str().unwrap_or_default();
        tokio::fs::write(run_dir.join("after.txt"), after).await?;

        let state = extract_state(bundle);
        let state_json = serde_json::to_string_pretty(&state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(run_dir.join("state.json"), state_json).await?;

        let run_log = bundle["run_log"].as_array().cloned().unwrap_or_default();
        let mut jsonl = String::new();
        for entry in &run_log {
            jsonl.push_str(&entry.to_string());
            jsonl.push('\n');
        }
        tokio::fs::write(run_dir.join("run.jsonl"), jsonl).await?;

        let command_log: Vec<CommandLogEntry> = bundle["command_log"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        let command_log_json = serde_json::to_string_pretty(&command_log)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(run_dir.join("command_log.json"), command_log_json).await?;

        let metadata = serde_json::json!({});
        tokio::fs::write(run_dir.join("metadata.json"), metadata.to_string()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle(winner_diff: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "run_id": "run_20260727T000000Z_abc123",
            "phase": "EVIDENCE_PACK",
            "steps_taken": 2,
            "tool_calls": 1,
            "winner_diff": winner_diff,
            "baseline": {"ok": false, "exit_code": 1},
            "final": {"ok": true, "exit_code": 0},
            "baseline_output": "1 failed",
            "final_output": "1 passed",
            "command_log": [],
            "run_log": [{"event": "phase_transition", "from": "BASELINE", "to": "REPAIR_LOOP"}],
        })
    }

    #[tokio::test]
    async fn test_writes_core_artifacts_without_winner() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemEvidenceSink::new();
        let bundle = sample_bundle(None);

        sink.write(dir.path(), &bundle).await.unwrap();

        assert!(!dir.path().join("winner.diff").exists());
        assert!(!dir.path().join("files_changed.txt").exists());
        assert!(dir.path().join("before.txt").exists());
        assert!(dir.path().join("after.txt").exists());
        assert!(dir.path().join("state.json").exists());
        assert!(dir.path().join("run.jsonl").exists());
        assert!(dir.path().join("command_log.json").exists());
        assert!(dir.path().join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_winner_diff_produces_files_changed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemEvidenceSink::new();
        let diff = "diff --git a/src/app.py b/src/app.py\n--- a/src/app.py\n+++ b/src/app.py\n@@ -1 +1 @@\n-import foo\n+import foobar\n";
        let bundle = sample_bundle(Some(diff));

        sink.write(dir.path(), &bundle).await.unwrap();

        let winner = tokio::fs::read_to_string(dir.path().join("winner.diff")).await.unwrap();
        assert_eq!(winner, diff);
        let files_changed = tokio::fs::read_to_string(dir.path().join("files_changed.txt")).await.unwrap();
        assert_eq!(files_changed, "src/app.py");
    }

    #[tokio::test]
    async fn test_state_json_carries_counters() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemEvidenceSink::new();
        sink.write(dir.path(), &sample_bundle(None)).await.unwrap();

        let state_text = tokio::fs::read_to_string(dir.path().join("state.json")).await.unwrap();
        let state: RunState = serde_json::from_str(&state_text).unwrap();
        assert_eq!(state.run_id, "run_20260727T000000Z_abc123");
        assert_eq!(state.steps_taken, 2);
        assert_eq!(state.final_ok, Some(true));
    }

    #[tokio::test]
    async fn test_run_log_written_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemEvidenceSink::new();
        sink.write(dir.path(), &sample_bundle(None)).await.unwrap();

        let jsonl = tokio::fs::read_to_string(dir.path().join("run.jsonl")).await.unwrap();
        assert_eq!(jsonl.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["event"], "phase_transition");
    }

    #[test]
    fn test_extract_files_changed_multiple_files() {
        let diff = "diff --git a/a.py b/a.py\n@@ -1 +1 @@\n-x\n+y\ndiff --git a/b.py b/b.py\n@@ -1 +1 @@\n-x\n+y\n";
        assert_eq!(extract_files_changed(diff), vec!["a.py".to_string(), "b.py".to_string()]);
    }
}
