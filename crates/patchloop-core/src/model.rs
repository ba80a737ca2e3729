//! `ModelResponse` and `ModelValidator`: the typed sum type a model reply
//! parses into, and the schema/content validation gate in front of it.

use serde::{Deserialize, Serialize};

use crate::domain::Diff;
use crate::policy::idiom::detect_shell_idiom;
use crate::tool_governor::ToolRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    Partial,
    Blocked,
    InProgress,
}

/// The model's reply, normalised into exactly one of three shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    ToolRequest { requests: Vec<ToolRequest>, why: String },
    Patch { diff: String },
    FeatureSummary { summary: String, completion_status: CompletionStatus },
}

/// The raw wire shape the model is expected to emit, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum RawModelResponse {
    ToolRequest {
        #[serde(default)]
        requests: Vec<ToolRequest>,
        #[serde(default)]
        why: String,
    },
    Patch {
        #[serde(default)]
        diff: String,
    },
    FeatureSummary {
        #[serde(default)]
        summary: String,
        completion_status: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model response validation failed: {}", self.0)
    }
}

/// A successful validation, or a synthetic fallback with the reason the
/// real response was rejected.
pub struct Validated {
    pub response: ModelResponse,
    pub validation_error: Option<ValidationError>,
}

/// Parses and validates a model's raw JSON reply. On any schema deviation
/// (invalid JSON, unknown mode, empty `requests`/`diff`/`summary`, an
/// out-of-set `completion_status`, or a diff that doesn't look like a
/// unified diff) returns a synthetic benign `tool_request` instead of
/// propagating an error, so the loop can log and continue.
pub fn validate(raw_json: &str) -> Validated {
    let parsed: Result<RawModelResponse, _> = serde_json::from_str(raw_json);

    match parsed {
        Ok(RawModelResponse::ToolRequest { requests, why }) => {
            if requests.is_empty() {
                return synthetic_fallback("tool_request had an empty requests list");
            }
            if let Some(err) = scan_for_shell_idiom(&requests) {
                return synthetic_fallback(&err);
            }
            Validated {
                response: ModelResponse::ToolRequest { requests, why },
                validation_error: None,
            }
        }
        Ok(RawModelResponse::Patch { diff }) => {
            if diff.trim().is_empty() {
                return synthetic_fallback("patch had an empty diff");
            }
            if diff.trim_start().starts_with("```") {
                return synthetic_fallback("patch diff was wrapped in a fenced Markdown block");
            }
            if !Diff::looks_like_unified_diff(&diff) {
                return synthetic_fallback("patch diff did not look like a unified diff");
            }
            Validated {
                response: ModelResponse::Patch { diff },
                validation_error: None,
            }
        }
        Ok(RawModelResponse::FeatureSummary { summary, completion_status }) => {
            if summary.trim().is_empty() {
                return synthetic_fallback("feature_summary had an empty summary");
            }
            let status = match completion_status.as_deref() {
                Some("complete") => CompletionStatus::Complete,
                Some("partial") => CompletionStatus::Partial,
                Some("blocked") => CompletionStatus::Blocked,
                Some("in_progress") => CompletionStatus::InProgress,
                _ => return synthetic_fallback("feature_summary had an invalid completion_status"),
            };
            Validated {
                response: ModelResponse::FeatureSummary { summary, completion_status: status },
                validation_error: None,
            }
        }
        Err(e) => synthetic_fallback(&format!("invalid JSON: {e}")),
    }
}

/// For `tool_request`, additionally scans each `args.cmd` (if present) for
/// shell idioms and rejects the whole response with a corrective message.
fn scan_for_shell_idiom(requests: &[ToolRequest]) -> Option<String> {
    for req in requests {
        if let Some(cmd) = req.args.get("cmd").and_then(|v| v.as_str()) {
            if detect_shell_idiom(cmd).is_some() {
                return Some(format!(
                    "tool_request args.cmd '{cmd}' looked like a shell idiom; use argv-only commands (shell=False)"
                ));
            }
        }
    }
    None
}

fn synthetic_fallback(reason: &str) -> Validated {
    Validated {
        response: ModelResponse::ToolRequest {
            requests: vec![ToolRequest {
                tool: "sandbox.read_file".to_string(),
                args: serde_json::json!({"path": "README.md"}),
            }],
            why: "synthetic fallback after validation failure".to_string(),
        },
        validation_error: Some(ValidationError(reason.to_string())),
    }
}
