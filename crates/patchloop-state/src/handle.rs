//! ActionMemory: the persistent, time-decayed store of context -> action ->
//! outcome rows the repair loop consults for priors before calling the model.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::MemoryError;
use crate::schema::{ActionOutcomeRecord, ActionPrior, ActionType, IngestOffset, Outcome};
use crate::Result;

/// Housekeeping and decay parameters, set from the CLI's
/// `--learning-half-life-days` / `--learning-max-age-days` / `--learning-max-rows`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    pub half_life_days: f64,
    pub max_age_days: i64,
    pub max_rows: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            half_life_days: 14.0,
            max_age_days: 90,
            max_rows: 2000,
        }
    }
}

/// The context a caller queries priors for. Mirrors `ContextSignature` in
/// `patchloop-core` field-for-field; kept independent here so this crate
/// does not depend on the core crate.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub repo_type: String,
    pub failure_class: String,
    pub language: String,
    pub env_fingerprint: String,
    pub attempt_bucket: u8,
    pub failing_test_file: Option<String>,
    pub sig_prefix: Option<String>,
    pub stalled: bool,
}

impl QueryContext {
    fn similarity(&self, row: &ActionOutcomeRecord) -> f64 {
        let mut s = 0.0;
        if self.env_fingerprint == row.env_fingerprint {
            s += 0.45;
        }
        if self.attempt_bucket == row.attempt_bucket {
            s += 0.20;
        }
        if self.failing_test_file.is_some() && self.failing_test_file == row.failing_test_file {
            s += 0.15;
        }
        if self.sig_prefix.is_some() && self.sig_prefix == row.sig_prefix {
            s += 0.10;
        }
        if self.stalled == row.stalled {
            s += 0.10;
        }
        s
    }
}

/// SurrealDB-backed action-outcome memory handle.
pub struct ActionMemory {
    db: Surreal<Db>,
    config: MemoryConfig,
    next_ts: AtomicI64,
}

const SCHEMA: &str = r#"
    DEFINE TABLE action_outcomes SCHEMAFULL;
    DEFINE FIELD event_hash ON action_outcomes TYPE string;
    DEFINE FIELD source_run_id ON action_outcomes TYPE string;
    DEFINE FIELD created_ts ON action_outcomes TYPE int;
    DEFINE FIELD failure_class ON action_outcomes TYPE string;
    DEFINE FIELD repo_type ON action_outcomes TYPE string;
    DEFINE FIELD language ON action_outcomes TYPE string;
    DEFINE FIELD env_fingerprint ON action_outcomes TYPE string;
    DEFINE FIELD attempt_bucket ON action_outcomes TYPE int;
    DEFINE FIELD failing_test_file ON action_outcomes TYPE option<string>;
    DEFINE FIELD sig_prefix ON action_outcomes TYPE option<string>;
    DEFINE FIELD stalled ON action_outcomes TYPE bool;
    DEFINE FIELD context_hash ON action_outcomes TYPE string;
    DEFINE FIELD action_type ON action_outcomes TYPE string;
    DEFINE FIELD action_key ON action_outcomes TYPE string;
    DEFINE FIELD action_json ON action_outcomes FLEXIBLE TYPE object;
    DEFINE FIELD outcome ON action_outcomes TYPE string;
    DEFINE FIELD score ON action_outcomes TYPE float;
    DEFINE FIELD confidence_weight ON action_outcomes TYPE float;
    DEFINE FIELD exec_time_ms ON action_outcomes TYPE int;
    DEFINE FIELD command_count ON action_outcomes TYPE int;
    DEFINE FIELD diff_lines ON action_outcomes TYPE int;
    DEFINE FIELD regressions ON action_outcomes TYPE int;
    DEFINE FIELD inserted_at ON action_outcomes TYPE datetime;
    DEFINE INDEX idx_event_hash ON action_outcomes FIELDS event_hash UNIQUE;
    DEFINE INDEX idx_context_lookup ON action_outcomes FIELDS repo_type, failure_class, language;

    DEFINE TABLE ingest_offsets SCHEMAFULL;
    DEFINE FIELD pack_id ON ingest_offsets TYPE string;
    DEFINE FIELD base_ts ON ingest_offsets TYPE int;
    DEFINE INDEX idx_pack_id ON ingest_offsets FIELDS pack_id UNIQUE;
"#;

impl ActionMemory {
    /// Opens an in-memory store (used by tests and dry-run invocations).
    #[instrument(skip_all)]
    pub async fn open_in_memory(config: MemoryConfig) -> Result<Self> {
        info!("opening in-memory action memory store");
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| MemoryError::Connection(e.to_string()))?;
        Self::from_connection(db, config).await
    }

    /// Opens (creating if absent) a durable, file-backed store.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_file(path: impl AsRef<Path>, config: MemoryConfig) -> Result<Self> {
        info!("opening durable action memory store");
        let db = Surreal::new::<SurrealKv>(path.as_ref())
            .await
            .map_err(|e| MemoryError::Connection(e.to_string()))?;
        Self::from_connection(db, config).await
    }

    async fn from_connection(db: Surreal<Db>, config: MemoryConfig) -> Result<Self> {
        db.use_ns("patchloop")
            .use_db("memory")
            .await
            .map_err(|e| MemoryError::Connection(e.to_string()))?;

        db.query(SCHEMA)
            .await
            .map_err(|e| MemoryError::SchemaSetup(e.to_string()))?;

        let next_ts = Self::load_next_ts(&db).await?;
        let memory = Self {
            db,
            config,
            next_ts: AtomicI64::new(next_ts),
        };
        memory.housekeep().await?;
        Ok(memory)
    }

    async fn load_next_ts(db: &Surreal<Db>) -> Result<i64> {
        #[derive(serde::Deserialize)]
        struct MaxTs {
            max_ts: Option<i64>,
        }
        let mut result = db
            .query("SELECT math::max(created_ts) AS max_ts FROM action_outcomes")
            .await
            .map_err(|e| MemoryError::Query(e.to_string()))?;
        let rows: Vec<MaxTs> = result.take(0).map_err(|e| MemoryError::Query(e.to_string()))?;
        Ok(rows.into_iter().next().and_then(|r| r.max_ts).map(|t| t + 1).unwrap_or(0))
    }

    /// Drops rows older than `max_age_days` (relative to the newest row),
    /// then keeps only the most recent `max_rows` rows. Runs once at open.
    #[instrument(skip(self))]
    async fn housekeep(&self) -> Result<()> {
        let newest = self.next_ts.load(Ordering::SeqCst) - 1;
        if newest < 0 {
            return Ok(());
        }
        // created_ts advances roughly one per event; treat max_age_days as
        // a count-equivalent cutoff scaled against the monotone counter so
        // housekeeping stays reproducible without touching the wall clock.
        let age_cutoff = newest - self.config.max_age_days * 24;
        if age_cutoff > 0 {
            self.db
                .query("DELETE action_outcomes WHERE created_ts < $cutoff")
                .bind(("cutoff", age_cutoff))
                .await
                .map_err(|e| MemoryError::Query(e.to_string()))?;
        }

        let count: Option<i64> = {
            #[derive(serde::Deserialize)]
            struct Count {
                c: i64,
            }
            let mut result = self
                .db
                .query("SELECT count() AS c FROM action_outcomes GROUP ALL")
                .await
                .map_err(|e| MemoryError::Query(e.to_string()))?;
            let rows: Vec<Count> = result.take(0).map_err(|e| MemoryError::Query(e.to_string()))?;
            rows.into_iter().next().map(|r| r.c)
        };

        if let Some(count) = count {
            let excess = count - self.config.max_rows as i64;
            if excess > 0 {
                self.db
                    .query(
                        "DELETE action_outcomes WHERE event_hash IN \
                         (SELECT VALUE event_hash FROM action_outcomes ORDER BY created_ts ASC, event_hash ASC LIMIT $n)",
                    )
                    .bind(("n", excess))
                    .await
                    .map_err(|e| MemoryError::Query(e.to_string()))?;
            }
        }

        debug!("housekeeping complete");
        Ok(())
    }

    /// Records an action outcome. `event_hash` is the uniqueness key;
    /// duplicates are silently ignored (idempotent re-ingestion).
    #[instrument(skip(self, action_json), fields(action_key = %action_key, context_hash = %context_hash))]
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        source_run_id: &str,
        context_hash: &str,
        ctx: &QueryContext,
        action_type: ActionType,
        action_key: &str,
        action_json: serde_json::Value,
        outcome: Outcome,
        score: f64,
        confidence_weight: f64,
        exec_time_ms: u64,
        command_count: u32,
        diff_lines: u32,
        regressions: u32,
    ) -> Result<bool> {
        let created_ts = self.next_ts.fetch_add(1, Ordering::SeqCst);

        let event_material = format!(
            "{created_ts}|{context_hash}|{:?}|{action_key}|{source_run_id}",
            action_type
        );
        let event_hash = crate::digest_hex(event_material.as_bytes());

        let existing: Option<ActionOutcomeRecord> = self
            .db
            .query("SELECT * FROM action_outcomes WHERE event_hash = $h")
            .bind(("h", event_hash.clone()))
            .await
            .map_err(|e| MemoryError::Query(e.to_string()))?
            .take::<Vec<ActionOutcomeRecord>>(0)
            .map_err(|e| MemoryError::Query(e.to_string()))?
            .into_iter()
            .next();

        if existing.is_some() {
            debug!("duplicate event_hash, skipping insert");
            return Ok(false);
        }

        let record = ActionOutcomeRecord {
            event_hash,
            source_run_id: source_run_id.to_string(),
            created_ts,
            failure_class: ctx.failure_class.clone(),
            repo_type: ctx.repo_type.clone(),
            language: ctx.language.clone(),
            env_fingerprint: ctx.env_fingerprint.clone(),
            attempt_bucket: ctx.attempt_bucket,
            failing_test_file: ctx.failing_test_file.clone(),
            sig_prefix: ctx.sig_prefix.clone(),
            stalled: ctx.stalled,
            context_hash: context_hash.to_string(),
            action_type,
            action_key: action_key.to_string(),
            action_json,
            outcome,
            score,
            confidence_weight,
            exec_time_ms,
            command_count,
            diff_lines,
            regressions,
            inserted_at: chrono::Utc::now(),
        };

        let _created: Option<ActionOutcomeRecord> = self
            .db
            .create("action_outcomes")
            .content(record)
            .await
            .map_err(|e| MemoryError::Transaction(e.to_string()))?;

        Ok(true)
    }

    /// Returns the top-K decayed, similarity-weighted priors for `ctx`.
    /// `now_ts` defaults to the newest `created_ts` seen, which keeps
    /// replays deterministic.
    #[instrument(skip(self, ctx))]
    pub async fn query_priors(
        &self,
        ctx: &QueryContext,
        top_k: usize,
        candidate_limit: usize,
        min_similarity: f64,
        now_ts: Option<i64>,
    ) -> Result<Vec<ActionPrior>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM action_outcomes \
                 WHERE repo_type = $repo_type AND failure_class = $failure_class AND language = $language \
                 ORDER BY created_ts DESC LIMIT $limit",
            )
            .bind(("repo_type", ctx.repo_type.clone()))
            .bind(("failure_class", ctx.failure_class.clone()))
            .bind(("language", ctx.language.clone()))
            .bind(("limit", candidate_limit as i64))
            .await
            .map_err(|e| MemoryError::Query(e.to_string()))?;

        let rows: Vec<ActionOutcomeRecord> = result.take(0).map_err(|e| MemoryError::Query(e.to_string()))?;

        let now_ts = now_ts.unwrap_or_else(|| rows.iter().map(|r| r.created_ts).max().unwrap_or(0));

        use std::collections::HashMap;
        struct Agg {
            weight_sum: f64,
            weighted_outcome: f64,
            weighted_score: f64,
            n: u32,
        }

        let mut aggregates: HashMap<String, Agg> = HashMap::new();

        for row in &rows {
            let s = ctx.similarity(row);
            if s < min_similarity {
                continue;
            }
            let age = (now_ts - row.created_ts).max(0) as f64;
            let decay = (-std::f64::consts::LN_2 * age / (self.config.half_life_days * 24.0)).exp();
            let w = row.confidence_weight * s * decay;

            let entry = aggregates.entry(row.action_key.clone()).or_insert(Agg {
                weight_sum: 0.0,
                weighted_outcome: 0.0,
                weighted_score: 0.0,
                n: 0,
            });
            entry.weight_sum += w;
            entry.weighted_outcome += w * row.outcome.value();
            entry.weighted_score += w * row.score;
            entry.n += 1;
        }

        let mut priors: Vec<ActionPrior> = aggregates
            .into_iter()
            .filter(|(_, agg)| agg.weight_sum > 0.0)
            .map(|(action_key, agg)| ActionPrior {
                action_key,
                weight_sum: agg.weight_sum,
                success_rate: agg.weighted_outcome / agg.weight_sum,
                mean_score: agg.weighted_score / agg.weight_sum,
                n: agg.n,
            })
            .collect();

        priors.sort_by(|a, b| {
            b.weight_sum
                .partial_cmp(&a.weight_sum)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.mean_score.partial_cmp(&a.mean_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.action_key.cmp(&b.action_key))
        });
        priors.truncate(top_k);

        Ok(priors)
    }

    /// Returns the stable `base_ts` for an evidence pack, assigning one on
    /// first ingest so re-ingesting the same pack replays identical
    /// timestamps (and therefore identical `event_hash`es).
    #[instrument(skip(self))]
    pub async fn ingest_offset(&self, pack_id: &str) -> Result<i64> {
        let mut result = self
            .db
            .query("SELECT * FROM ingest_offsets WHERE pack_id = $id")
            .bind(("id", pack_id.to_string()))
            .await
            .map_err(|e| MemoryError::Query(e.to_string()))?;
        let existing: Vec<IngestOffset> = result.take(0).map_err(|e| MemoryError::Query(e.to_string()))?;
        if let Some(offset) = existing.into_iter().next() {
            return Ok(offset.base_ts);
        }

        let base_ts = self.next_ts.load(Ordering::SeqCst);
        let record = IngestOffset {
            pack_id: pack_id.to_string(),
            base_ts,
        };
        let created: Option<IngestOffset> = self
            .db
            .create("ingest_offsets")
            .content(record)
            .await
            .map_err(|e| MemoryError::Transaction(e.to_string()))?;
        created
            .map(|o| o.base_ts)
            .ok_or_else(|| MemoryError::IngestOffsetConflict {
                pack_id: pack_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> QueryContext {
        QueryContext {
            repo_type: "python".into(),
            failure_class: "import_error".into(),
            language: "python".into(),
            env_fingerprint: "env1".into(),
            attempt_bucket: 2,
            failing_test_file: Some("tests/test_x.py".into()),
            sig_prefix: Some("abc123".into()),
            stalled: false,
        }
    }

    #[tokio::test]
    async fn test_open_in_memory_succeeds() {
        let mem = ActionMemory::open_in_memory(MemoryConfig::default()).await;
        assert!(mem.is_ok());
    }

    #[tokio::test]
    async fn test_record_and_duplicate_is_noop() {
        let mem = ActionMemory::open_in_memory(MemoryConfig::default()).await.unwrap();
        let inserted = mem
            .record(
                "run_1",
                "ctxhash1",
                &ctx(),
                ActionType::Patch,
                "patch:abcdef",
                serde_json::json!({"diff": "..."}),
                Outcome::Success,
                90.0,
                1.0,
                1200,
                2,
                10,
                0,
            )
            .await
            .unwrap();
        assert!(inserted);

        // Re-inserting deterministically computed fields is idempotent only
        // when created_ts and context match; here we simulate that by
        // recording the same logical event through ingest_offset-driven ts,
        // tested separately. This asserts the happy path inserts once.
        let priors = mem.query_priors(&ctx(), 5, 100, 0.25, None).await.unwrap();
        assert_eq!(priors.len(), 1);
        assert_eq!(priors[0].action_key, "patch:abcdef");
    }

    #[tokio::test]
    async fn test_query_priors_respects_min_similarity() {
        let mem = ActionMemory::open_in_memory(MemoryConfig::default()).await.unwrap();
        let mut other = ctx();
        other.env_fingerprint = "different-env".into();
        other.failing_test_file = None;
        other.sig_prefix = None;
        other.stalled = true;
        mem.record(
            "run_1",
            "ctxhash2",
            &other,
            ActionType::ToolRequest,
            "tool:read_file",
            serde_json::json!({}),
            Outcome::Success,
            50.0,
            1.0,
            100,
            1,
            0,
            0,
        )
        .await
        .unwrap();

        // similarity(ctx(), other) only matches on attempt_bucket (0.20) and
        // stalled mismatch (false vs true, no match) => below 0.25 threshold
        let priors = mem.query_priors(&ctx(), 5, 100, 0.25, None).await.unwrap();
        assert!(priors.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_offset_stable_across_calls() {
        let mem = ActionMemory::open_in_memory(MemoryConfig::default()).await.unwrap();
        let first = mem.ingest_offset("pack-1").await.unwrap();
        let second = mem.ingest_offset("pack-1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_ingest_offset_distinct_packs() {
        let mem = ActionMemory::open_in_memory(MemoryConfig::default()).await.unwrap();
        mem.record(
            "run_1",
            "ctxhash1",
            &ctx(),
            ActionType::Patch,
            "patch:a",
            serde_json::json!({}),
            Outcome::Success,
            1.0,
            1.0,
            1,
            1,
            1,
            0,
        )
        .await
        .unwrap();
        let a = mem.ingest_offset("pack-a").await.unwrap();
        let b = mem.ingest_offset("pack-b").await.unwrap();
        assert_ne!(a, b);
    }
}
