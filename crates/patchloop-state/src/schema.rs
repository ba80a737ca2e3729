//! Row types for the `action_outcomes` and `ingest_offsets` tables.

use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Outcome of an action (tool invocation or patch) taken in some context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Partial,
    Fail,
    Blocked,
}

impl Outcome {
    /// Numeric value used when aggregating success rate: success=1.0,
    /// partial=0.5, fail/blocked=0.0.
    pub fn value(&self) -> f64 {
        match self {
            Outcome::Success => 1.0,
            Outcome::Partial => 0.5,
            Outcome::Fail | Outcome::Blocked => 0.0,
        }
    }
}

/// The kind of action an `ActionOutcomeRecord` describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToolRequest,
    Patch,
}

/// A single row in `action_outcomes`: context + action + outcome, keyed by
/// `event_hash` for idempotent re-ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcomeRecord {
    pub event_hash: String,
    pub source_run_id: String,

    /// Monotone counter assigned by the store, not wall-clock time, so that
    /// decay computations stay reproducible across replays.
    pub created_ts: i64,

    pub failure_class: String,
    pub repo_type: String,
    pub language: String,
    pub env_fingerprint: String,
    pub attempt_bucket: u8,
    pub failing_test_file: Option<String>,
    pub sig_prefix: Option<String>,
    pub stalled: bool,
    pub context_hash: String,

    pub action_type: ActionType,
    pub action_key: String,
    pub action_json: serde_json::Value,

    pub outcome: Outcome,
    pub score: f64,
    pub confidence_weight: f64,
    pub exec_time_ms: u64,
    pub command_count: u32,
    pub diff_lines: u32,
    pub regressions: u32,

    #[serde(with = "surreal_datetime")]
    pub inserted_at: chrono::DateTime<chrono::Utc>,
}

/// Tracks the stable `base_ts` assigned to an evidence pack the first time
/// it is ingested, so re-ingestion replays the same `created_ts` values and
/// the `event_hash` unique index prevents duplication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOffset {
    pub pack_id: String,
    pub base_ts: i64,
}

/// One aggregated prior returned by `queryPriors`, summarizing how an
/// action has fared across decayed, similarity-weighted past contexts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionPrior {
    pub action_key: String,
    pub weight_sum: f64,
    pub success_rate: f64,
    pub mean_score: f64,
    pub n: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_value() {
        assert_eq!(Outcome::Success.value(), 1.0);
        assert_eq!(Outcome::Partial.value(), 0.5);
        assert_eq!(Outcome::Fail.value(), 0.0);
        assert_eq!(Outcome::Blocked.value(), 0.0);
    }

    #[test]
    fn test_outcome_serde_roundtrip() {
        for o in [Outcome::Success, Outcome::Partial, Outcome::Fail, Outcome::Blocked] {
            let json = serde_json::to_string(&o).unwrap();
            let back: Outcome = serde_json::from_str(&json).unwrap();
            assert_eq!(o, back);
        }
    }

    #[test]
    fn test_action_type_serde() {
        let json = serde_json::to_string(&ActionType::ToolRequest).unwrap();
        assert_eq!(json, "\"tool_request\"");
    }
}
