//! `ToolGovernor`: per-response cap, per-run quota, and run-lifetime
//! deduplication of model-requested tool invocations.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::digest::tool_request_signature;

/// A single tool invocation the model has asked for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolGovernorConfig {
    pub max_per_response: usize,
    pub max_per_run: usize,
    pub dedup_enabled: bool,
}

impl Default for ToolGovernorConfig {
    fn default() -> Self {
        Self {
            max_per_response: 6,
            max_per_run: 40,
            dedup_enabled: true,
        }
    }
}

/// Why a single request within a response was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Duplicate,
    RunQuotaExhausted,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Duplicate => write!(f, "Duplicate request: already seen this run"),
            BlockReason::RunQuotaExhausted => write!(f, "Run tool-call quota exhausted"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolGovernorStats {
    pub total_this_run: usize,
    pub remaining_quota: usize,
}

/// Tracks per-run tool-call state: seen signatures, total count, and
/// per-tool counts. A signature seen once is blocked for the rest of the
/// run, so `{tool, args}` can occur at most once per run.
pub struct ToolGovernor {
    config: ToolGovernorConfig,
    seen_signatures: Mutex<HashSet<String>>,
    total_this_run: Mutex<usize>,
    per_tool_counts: Mutex<HashMap<String, usize>>,
}

impl ToolGovernor {
    pub fn new(config: ToolGovernorConfig) -> Self {
        Self {
            config,
            seen_signatures: Mutex::new(HashSet::new()),
            total_this_run: Mutex::new(0),
            per_tool_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Filters a batch of requests from one model response: truncates to
    /// `max_per_response`, then applies quota and dedup to each in order.
    pub fn filter(&self, requests: Vec<ToolRequest>) -> (Vec<ToolRequest>, Vec<BlockReason>) {
        let truncated: Vec<ToolRequest> = requests.into_iter().take(self.config.max_per_response).collect();

        let mut allowed = Vec::new();
        let mut blocked = Vec::new();

        for req in truncated {
            match self.should_allow(&req) {
                Ok(()) => {
                    self.register(&req);
                    allowed.push(req);
                }
                Err(reason) => blocked.push(reason),
            }
        }

        (allowed, blocked)
    }

    fn should_allow(&self, req: &ToolRequest) -> Result<(), BlockReason> {
        let total = *self.total_this_run.lock().unwrap();
        if total >= self.config.max_per_run {
            return Err(BlockReason::RunQuotaExhausted);
        }

        if self.config.dedup_enabled {
            let sig = tool_request_signature(&req.tool, &req.args).unwrap_or_default();
            let seen = self.seen_signatures.lock().unwrap();
            if seen.contains(&sig) {
                return Err(BlockReason::Duplicate);
            }
        }

        Ok(())
    }

    fn register(&self, req: &ToolRequest) {
        if self.config.dedup_enabled {
            if let Ok(sig) = tool_request_signature(&req.tool, &req.args) {
                self.seen_signatures.lock().unwrap().insert(sig);
            }
        }
        *self.total_this_run.lock().unwrap() += 1;
        *self
            .per_tool_counts
            .lock()
            .unwrap()
            .entry(req.tool.clone())
            .or_insert(0) += 1;
    }

    pub fn stats(&self) -> ToolGovernorStats {
        let total = *self.total_this_run.lock().unwrap();
        ToolGovernorStats {
            total_this_run: total,
            remaining_quota: self.config.max_per_run.saturating_sub(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tool: &str, args: serde_json::Value) -> ToolRequest {
        ToolRequest {
            tool: tool.to_string(),
            args,
        }
    }

    #[test]
    fn test_first_request_allowed_duplicates_blocked() {
        let gov = ToolGovernor::new(ToolGovernorConfig::default());
        let r = req("sandbox.read_file", serde_json::json!({"path": "README.md"}));

        let (allowed1, blocked1) = gov.filter(vec![r.clone()]);
        assert_eq!(allowed1.len(), 1);
        assert!(blocked1.is_empty());

        let (allowed2, blocked2) = gov.filter(vec![r.clone()]);
        assert!(allowed2.is_empty());
        assert_eq!(blocked2, vec![BlockReason::Duplicate]);

        let (allowed3, blocked3) = gov.filter(vec![r]);
        assert!(allowed3.is_empty());
        assert_eq!(blocked3, vec![BlockReason::Duplicate]);

        assert_eq!(gov.stats().total_this_run, 1);
    }

    #[test]
    fn test_key_order_independent_dedup() {
        let gov = ToolGovernor::new(ToolGovernorConfig::default());
        let a = req("sandbox.run", serde_json::json!({"cmd": "pytest", "cwd": "."}));
        let b = req("sandbox.run", serde_json::json!({"cwd": ".", "cmd": "pytest"}));

        let (allowed_a, _) = gov.filter(vec![a]);
        assert_eq!(allowed_a.len(), 1);
        let (allowed_b, blocked_b) = gov.filter(vec![b]);
        assert!(allowed_b.is_empty());
        assert_eq!(blocked_b, vec![BlockReason::Duplicate]);
    }

    #[test]
    fn test_truncates_to_max_per_response() {
        let gov = ToolGovernor::new(ToolGovernorConfig {
            max_per_response: 2,
            ..Default::default()
        });
        let requests = vec![
            req("a", serde_json::json!({})),
            req("b", serde_json::json!({})),
            req("c", serde_json::json!({})),
        ];
        let (allowed, _) = gov.filter(requests);
        assert_eq!(allowed.len(), 2);
    }

    #[test]
    fn test_run_quota_exhaustion() {
        let gov = ToolGovernor::new(ToolGovernorConfig {
            max_per_run: 1,
            ..Default::default()
        });
        let (allowed1, _) = gov.filter(vec![req("a", serde_json::json!({}))]);
        assert_eq!(allowed1.len(), 1);
        let (allowed2, blocked2) = gov.filter(vec![req("b", serde_json::json!({}))]);
        assert!(allowed2.is_empty());
        assert_eq!(blocked2, vec![BlockReason::RunQuotaExhausted]);
    }

    #[test]
    fn test_dedup_disabled_allows_repeats() {
        let gov = ToolGovernor::new(ToolGovernorConfig {
            dedup_enabled: false,
            ..Default::default()
        });
        let r = req("a", serde_json::json!({}));
        let (allowed1, _) = gov.filter(vec![r.clone()]);
        let (allowed2, _) = gov.filter(vec![r]);
        assert_eq!(allowed1.len(), 1);
        assert_eq!(allowed2.len(), 1);
    }

    #[test]
    fn test_stats_remaining_quota() {
        let gov = ToolGovernor::new(ToolGovernorConfig {
            max_per_run: 5,
            ..Default::default()
        });
        gov.filter(vec![req("a", serde_json::json!({}))]);
        let stats = gov.stats();
        assert_eq!(stats.total_this_run, 1);
        assert_eq!(stats.remaining_quota, 4);
    }
}
