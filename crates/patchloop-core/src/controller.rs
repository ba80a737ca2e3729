//! `ControllerLoop`: the top-level phase state machine that drives a single
//! repair or feature run from INGEST through EVIDENCE_PACK.
//!
//! Every other module in this crate is a component the loop wires together:
//! the sandbox substrate, the buildpack/trace-parser/LLM-client/evidence-sink
//! collaborators, the policy and hygiene gates, the patch evaluator, and the
//! stall/budget trackers. Nothing here talks to a real subprocess, model
//! provider, or filesystem path outside the sandbox directly; it only calls
//! through the traits and structs those modules expose.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use patchloop_state::{ActionMemory, ActionType, Outcome, QueryContext};

use crate::budget::{BudgetLimits, BudgetTracker};
use crate::clock::Clock;
use crate::collaborators::{Buildpack, EvidenceSink, LlmClient, TraceParser};
use crate::command::{Command, CommandLogEntry, ResourceCaps};
use crate::domain::{ContextSignature, ControllerError, Diff, FailureInfo, Phase, PhaseTransition, Result, RunHeader, VerifyResult};
use crate::evaluator::{self, EvalCandidate, PatchEvaluator};
use crate::executor::Executor;
use crate::hygiene::{self, HygieneLimits, HygieneProfile, ProfileLanguage};
use crate::intent::{self, Intent};
use crate::model::{self, ModelResponse};
use crate::policy::{CommandPolicy, Language, PolicyRejection};
use crate::prompt::{GoalSection, LabelledFile, PromptBuilder};
use crate::sandbox::Sandbox;
use crate::stall::StallDetector;
use crate::tool_governor::{ToolGovernor, ToolGovernorConfig, ToolRequest};

/// What the run is trying to accomplish when it isn't plain repair.
#[derive(Debug, Clone)]
pub struct FeatureGoal {
    pub description: String,
    pub acceptance_criteria: Vec<String>,
}

/// How `FINAL_VERIFY` combines the effective test command with any
/// `--verify-cmd-extra` commands the caller supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    #[default]
    TestsOnly,
    CmdsThenTests,
    CmdsOnly,
}

/// Everything the loop needs to know about the run before it starts.
#[derive(Clone)]
pub struct RunConfig {
    pub repo_url: String,
    pub checkout_ref: Option<String>,
    pub test_cmd_override: Option<String>,
    pub feature: Option<FeatureGoal>,
    pub temperatures: Vec<f64>,
    pub stall_threshold: usize,
    pub budget_limits: BudgetLimits,
    pub tool_governor_config: ToolGovernorConfig,
    pub repo_type: String,
    pub env_fingerprint: String,
    pub results_root: PathBuf,
    pub resource_caps: ResourceCaps,
    pub install_timeout_sec: Option<u64>,
    pub focus_timeout_sec: u64,
    pub full_timeout_sec: u64,
    pub max_lines_changed_override: Option<usize>,
    pub max_files_changed_override: Option<usize>,
    pub allow_lockfile_changes: bool,
    pub verify_policy: VerifyPolicy,
    pub verify_cmd_extra: Vec<String>,
    pub focused_verify_cmd_override: Option<String>,
    pub enable_sysdeps: bool,
    pub sysdeps_tier: u8,
    pub sysdeps_max_packages: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            checkout_ref: None,
            test_cmd_override: None,
            feature: None,
            temperatures: vec![0.0, 0.4, 0.8],
            stall_threshold: 3,
            budget_limits: BudgetLimits::default(),
            tool_governor_config: ToolGovernorConfig::default(),
            repo_type: "generic".to_string(),
            env_fingerprint: "unknown".to_string(),
            results_root: PathBuf::from("results"),
            resource_caps: ResourceCaps::default(),
            install_timeout_sec: None,
            focus_timeout_sec: 90,
            full_timeout_sec: 180,
            max_lines_changed_override: None,
            max_files_changed_override: None,
            allow_lockfile_changes: false,
            verify_policy: VerifyPolicy::default(),
            verify_cmd_extra: Vec::new(),
            focused_verify_cmd_override: None,
            enable_sysdeps: false,
            sysdeps_tier: 0,
            sysdeps_max_packages: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetupStepReport {
    pub argv: Vec<String>,
    pub ok: bool,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub steps: Vec<SetupStepReport>,
    pub critical_failure: bool,
}

/// The result of one `execute_tool` call: the observation folded back into
/// the next prompt, plus what ActionMemory needs to score the invocation.
struct ToolExecution {
    observation: String,
    outcome: Outcome,
    command_count: u32,
}

impl ToolExecution {
    fn ok(observation: String, command_count: u32) -> Self {
        Self { observation, outcome: Outcome::Success, command_count }
    }

    fn fail(observation: String, command_count: u32) -> Self {
        Self { observation, outcome: Outcome::Fail, command_count }
    }

    fn blocked(observation: String) -> Self {
        Self { observation, outcome: Outcome::Blocked, command_count: 0 }
    }
}

/// What the caller sees when `run()` returns: the phase the loop ended in
/// and (if repair succeeded) the diff that was applied.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub ok: bool,
    pub phase: Phase,
    pub bailout_reason: Option<String>,
    pub steps_taken: u64,
    pub winner_diff: Option<Diff>,
    pub baseline_output: String,
    pub final_output: String,
}

/// The controller loop's state. One instance per run; not reused across runs.
pub struct ControllerLoop {
    clock: Arc<dyn Clock>,
    sandbox: Arc<Sandbox>,
    executor: Arc<dyn Executor>,
    buildpacks: Vec<Box<dyn Buildpack>>,
    trace_parser: Arc<dyn TraceParser>,
    llm: Arc<dyn LlmClient>,
    memory: Option<Arc<ActionMemory>>,
    evidence_sink: Option<Arc<dyn EvidenceSink>>,
    run_header: RunHeader,
    config: RunConfig,
    evaluator: PatchEvaluator,
    command_log: std::sync::Mutex<Vec<CommandLogEntry>>,
    run_log: std::sync::Mutex<Vec<serde_json::Value>>,
    observations: std::sync::Mutex<Vec<String>>,
    tool_governor: ToolGovernor,
    stall_detector: StallDetector,
    budget: BudgetTracker,
    tried_diff_hashes: std::sync::Mutex<HashSet<String>>,
}

#[allow(clippy::too_many_arguments)]
impl ControllerLoop {
    pub fn new(
        clock: Arc<dyn Clock>,
        sandbox: Arc<Sandbox>,
        executor: Arc<dyn Executor>,
        buildpacks: Vec<Box<dyn Buildpack>>,
        trace_parser: Arc<dyn TraceParser>,
        llm: Arc<dyn LlmClient>,
        memory: Option<Arc<ActionMemory>>,
        evidence_sink: Option<Arc<dyn EvidenceSink>>,
        run_header: RunHeader,
        config: RunConfig,
    ) -> Self {
        let evaluator = PatchEvaluator::new(sandbox.clone(), executor.clone())
            .with_timeouts(config.focus_timeout_sec, config.full_timeout_sec)
            .with_resource_caps(config.resource_caps);
        let stall_detector = StallDetector::new(config.stall_threshold);
        let budget = BudgetTracker::new(config.budget_limits);
        let tool_governor = ToolGovernor::new(config.tool_governor_config);
        Self {
            clock,
            sandbox,
            executor,
            buildpacks,
            trace_parser,
            llm,
            memory,
            evidence_sink,
            run_header,
            config,
            evaluator,
            command_log: std::sync::Mutex::new(Vec::new()),
            run_log: std::sync::Mutex::new(Vec::new()),
            observations: std::sync::Mutex::new(Vec::new()),
            tool_governor,
            stall_detector,
            budget,
            tried_diff_hashes: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Drives the run through its full phase sequence. Always returns a
    /// `RunOutcome`; errors inside a phase move the loop to `Bailout` rather
    /// than propagating, since an evidence pack must still be written.
    #[instrument(skip(self), fields(run_id = %self.run_header.run_id))]
    pub async fn run(&self) -> RunOutcome {
        let mut phase = Phase::Ingest;

        if let Err(e) = self.ingest().await {
            return self.bail_out(phase, format!("ingest failed: {e}"), String::new(), String::new()).await;
        }
        self.transition(phase, Phase::Detect, "repo cloned and checked out");
        phase = Phase::Detect;

        let buildpack_idx = self.select_buildpack();
        self.transition(phase, Phase::Setup, format!("selected buildpack '{}'", self.buildpacks[buildpack_idx].name()));
        phase = Phase::Setup;

        let setup_report = self.setup(buildpack_idx).await;
        if setup_report.critical_failure {
            return self
                .bail_out(phase, "setup failed on a critical install step".to_string(), String::new(), String::new())
                .await;
        }

        self.transition(phase, Phase::Baseline, "setup complete");
        phase = Phase::Baseline;

        let effective_test_cmd = self.effective_test_command(buildpack_idx);
        let baseline = self.baseline(&effective_test_cmd).await;

        if baseline.ok {
            self.transition(phase, Phase::FinalVerify, "baseline already passing");
            phase = Phase::FinalVerify;
            let final_result = self.final_verify(&effective_test_cmd).await;
            self.transition(phase, Phase::EvidencePack, "nothing to repair");
            phase = Phase::EvidencePack;
            self.write_evidence_pack(phase, None, &baseline, &final_result).await;
            return RunOutcome {
                run_id: self.run_header.run_id.clone(),
                ok: final_result.ok,
                phase,
                bailout_reason: None,
                steps_taken: self.budget.steps(),
                winner_diff: None,
                baseline_output: format!("{}\n{}", baseline.stdout, baseline.stderr),
                final_output: format!("{}\n{}", final_result.stdout, final_result.stderr),
            };
        }

        self.transition(phase, Phase::RepairLoop, "baseline failing; entering repair loop");
        phase = Phase::RepairLoop;

        let (next_phase, bailout_reason, winner) = self.repair_loop(buildpack_idx, &effective_test_cmd, &baseline).await;
        phase = next_phase;

        let final_result = if winner.is_some() {
            self.final_verify(&effective_test_cmd).await
        } else {
            VerifyResult::default()
        };

        self.transition(phase, Phase::EvidencePack, "repair loop concluded");
        phase = Phase::EvidencePack;
        self.write_evidence_pack(phase, winner.clone(), &baseline, &final_result).await;

        RunOutcome {
            run_id: self.run_header.run_id.clone(),
            ok: winner.is_some() && final_result.ok,
            phase,
            bailout_reason,
            steps_taken: self.budget.steps(),
            winner_diff: winner,
            baseline_output: format!("{}\n{}", baseline.stdout, baseline.stderr),
            final_output: format!("{}\n{}", final_result.stdout, final_result.stderr),
        }
    }

    async fn bail_out(&self, from: Phase, reason: String, baseline_output: String, final_output: String) -> RunOutcome {
        self.transition(from, Phase::Bailout, reason.clone());
        self.transition(Phase::Bailout, Phase::EvidencePack, "writing evidence pack after bailout");
        let bundle = self.build_evidence_bundle(Phase::EvidencePack, None, None, None);
        self.write_bundle(&bundle).await;
        RunOutcome {
            run_id: self.run_header.run_id.clone(),
            ok: false,
            phase: Phase::EvidencePack,
            bailout_reason: Some(reason),
            steps_taken: self.budget.steps(),
            winner_diff: None,
            baseline_output,
            final_output,
        }
    }

    async fn ingest(&self) -> Result<()> {
        // An empty `repo_url` means the sandbox's repo dir was already
        // populated by the caller (tests, or a replayed local checkout);
        // skip the clone rather than fail validation on an empty URL.
        if !self.config.repo_url.is_empty() {
            self.sandbox.clone_github(&self.config.repo_url).await.map_err(|e| ControllerError::Ingest(e.to_string()))?;
        }
        if let Some(reference) = &self.config.checkout_ref {
            self.sandbox.checkout(reference).await.map_err(|e| ControllerError::Ingest(e.to_string()))?;
        }
        Ok(())
    }

    fn select_buildpack(&self) -> usize {
        if let Some(text) = &self.config.test_cmd_override {
            let first_token = text.split_whitespace().next().unwrap_or("");
            if let Some(idx) = self.buildpacks.iter().position(|bp| bp.name() == first_token) {
                return idx;
            }
        }

        let files = self.sandbox.list_tree(2000, true);
        self.buildpacks
            .iter()
            .enumerate()
            .map(|(idx, bp)| (idx, bp.detect(&files)))
            .filter(|(_, confidence)| *confidence > 0.5)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn effective_test_command(&self, buildpack_idx: usize) -> Vec<String> {
        match &self.config.test_cmd_override {
            Some(text) => text.split_whitespace().map(String::from).collect(),
            None => self.buildpacks[buildpack_idx].test_plan(),
        }
    }

    async fn setup(&self, buildpack_idx: usize) -> SetupReport {
        let mut report = SetupReport::default();

        if self.config.enable_sysdeps && self.config.sysdeps_tier > 0 {
            let whitelist = self.buildpacks[buildpack_idx].sysdeps_whitelist();
            let tier_fraction = (self.config.sysdeps_tier as f64 / 7.0 * whitelist.len() as f64).ceil() as usize;
            let take = tier_fraction.min(self.config.sysdeps_max_packages as usize).min(whitelist.len());
            if take > 0 {
                let mut argv = vec!["apt-get".to_string(), "install".to_string(), "-y".to_string()];
                argv.extend(whitelist[..take].iter().map(|s| s.to_string()));
                let command = Command::new(argv, self.sandbox.repo_dir(), self.config.install_timeout_sec.unwrap_or(600))
                    .with_network(true)
                    .with_resource_caps(self.config.resource_caps);
                match self.executor.run(&command).await {
                    Ok(result) => {
                        self.log_command("SETUP", &command, &result);
                        report.steps.push(SetupStepReport {
                            argv: command.argv.clone(),
                            ok: result.ok,
                            exit_code: result.exit_code,
                        });
                        // sysdeps install is best-effort: a missing apt package
                        // shouldn't bail out a run that doesn't actually need it.
                    }
                    Err(e) => warn!(error = %e, "sysdeps install failed to execute"),
                }
            }
        }

        for command in self.buildpacks[buildpack_idx].install_steps() {
            let mut command = command.with_network(true).with_resource_caps(self.config.resource_caps);
            if let Some(timeout) = self.config.install_timeout_sec {
                command.timeout_sec = timeout;
            }
            match self.executor.run(&command).await {
                Ok(result) => {
                    self.log_command("SETUP", &command, &result);
                    report.steps.push(SetupStepReport {
                        argv: command.argv.clone(),
                        ok: result.ok,
                        exit_code: result.exit_code,
                    });
                    if !result.ok {
                        report.critical_failure = true;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "setup step failed to execute");
                    report.steps.push(SetupStepReport { argv: command.argv.clone(), ok: false, exit_code: -1 });
                    report.critical_failure = true;
                }
            }
        }
        report
    }

    async fn baseline(&self, effective_test_cmd: &[String]) -> VerifyResult {
        self.run_verify(effective_test_cmd, "BASELINE").await
    }

    async fn final_verify(&self, effective_test_cmd: &[String]) -> VerifyResult {
        let run_cmds_first = matches!(self.config.verify_policy, VerifyPolicy::CmdsThenTests | VerifyPolicy::CmdsOnly);
        let run_tests = !matches!(self.config.verify_policy, VerifyPolicy::CmdsOnly);

        if run_cmds_first {
            for extra in &self.config.verify_cmd_extra {
                let argv: Vec<String> = extra.split_whitespace().map(String::from).collect();
                if argv.is_empty() {
                    continue;
                }
                let result = self.run_verify(&argv, "FINAL_VERIFY_EXTRA").await;
                if !result.ok {
                    return result;
                }
            }
        }

        if run_tests {
            self.run_verify(effective_test_cmd, "FINAL_VERIFY").await
        } else {
            VerifyResult { ok: true, ..VerifyResult::default() }
        }
    }

    async fn run_verify(&self, argv: &[String], phase_label: &str) -> VerifyResult {
        self.budget.record_verification_attempt();
        let network_allowed = crate::executor::test_command_network_allowed(argv);
        let command = Command::new(argv.to_vec(), self.sandbox.repo_dir(), self.config.full_timeout_sec)
            .with_network(network_allowed)
            .with_resource_caps(self.config.resource_caps);
        let result = match self.executor.run(&command).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "verification command failed to execute");
                crate::command::CommandResult {
                    ok: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    timed_out: false,
                }
            }
        };
        self.log_command(phase_label, &command, &result);

        let info = self.trace_parser.parse(&result.stdout, &result.stderr);
        VerifyResult {
            ok: result.ok,
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            failing_tests: info.failing_tests,
            sig: info.signature,
        }
    }

    /// The bounded iteration that proposes, evaluates, and applies a winning
    /// patch. Returns the phase to transition into next, an optional bailout
    /// reason, and the winning diff if one was applied.
    async fn repair_loop(
        &self,
        buildpack_idx: usize,
        effective_test_cmd: &[String],
        baseline: &VerifyResult,
    ) -> (Phase, Option<String>, Option<Diff>) {
        let mut current = self.run_verify(effective_test_cmd, "REPAIR_LOOP").await;
        if current.ok {
            return (Phase::FinalVerify, None, None);
        }
        let _ = baseline;

        loop {
            let stalled = self.stall_detector.update(current.failing_count(), current.top_failing_test(), &current.sig);

            let elapsed_minutes = self.elapsed_minutes();
            if let Some(exceeded) = self.budget.check(elapsed_minutes) {
                return (Phase::Bailout, Some(format!("budget exceeded: {exceeded}")), None);
            }

            let combined_output = format!("{}\n{}", current.stdout, current.stderr);
            let policy_choice = intent::choose_policy(
                &combined_output,
                current.top_failing_test(),
                &effective_test_cmd.join(" "),
                stalled,
            );

            let failure_info = self.trace_parser.parse(&current.stdout, &current.stderr);
            let high_signal_files = self.collect_high_signal_files(&failure_info);
            let files: Vec<LabelledFile> = high_signal_files
                .iter()
                .filter_map(|path| {
                    self.sandbox
                        .read_file(path, 120 * 1024, true)
                        .ok()
                        .map(|bytes| LabelledFile { path: path.clone(), content: String::from_utf8_lossy(&bytes).into_owned() })
                })
                .collect();

            let language = self.policy_language(buildpack_idx);
            let profile_language = self.profile_language(buildpack_idx);

            let context = ContextSignature::new(
                policy_choice.intent_label(),
                self.config.repo_type.clone(),
                format!("{:?}", language),
                self.config.env_fingerprint.clone(),
                self.budget.steps().min(255) as u8,
            )
            .with_failing_test_file(current.top_failing_test().unwrap_or_default())
            .with_sig_prefix(current.sig.chars().take(8).collect::<String>())
            .with_stalled(stalled);

            let priors = self.query_priors(&context).await;

            let goal = match &self.config.feature {
                Some(feature) => GoalSection::Feature {
                    description: feature.description.clone(),
                    acceptance_criteria: feature.acceptance_criteria.clone(),
                    completed_subgoals: Vec::new(),
                    current_subgoal: policy_choice.subgoal.clone(),
                },
                None => GoalSection::Repair { intent: format!("{:?}", policy_choice.intent), subgoal: policy_choice.subgoal.clone() },
            };

            let mut builder = PromptBuilder::new(goal, effective_test_cmd.join(" "))
                .with_failure_output(combined_output.clone())
                .with_repo_tree(self.sandbox.list_tree(2000, true))
                .with_files(files);
            if let Some(focus) = &policy_choice.focus_cmd {
                builder = builder.with_focus_test_command(focus.clone());
            }
            if let Some(priors) = &priors {
                builder = builder.with_action_priors(priors.clone());
            }
            let observations_text = self.observations.lock().unwrap().join("\n");
            if !observations_text.is_empty() {
                builder = builder.with_observations(observations_text);
            }
            let prompt = builder.build();

            let mut candidates = Vec::new();
            let mut made_progress = false;
            let mut low_confidence = true;

            for temperature in &self.config.temperatures {
                let reply = match self.llm.call_model(&prompt, *temperature).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "model call failed");
                        continue;
                    }
                };
                let validated = model::validate(&reply);
                if validated.validation_error.is_some() {
                    self.observations.lock().unwrap().push(format!("model response rejected: {:?}", validated.validation_error));
                }

                match validated.response {
                    ModelResponse::ToolRequest { requests, why } => {
                        self.observations.lock().unwrap().push(format!("tool_request ({why})"));
                        let (allowed, blocked) = self.tool_governor.filter(requests);
                        self.budget.record_tool_calls(allowed.len() as u64);
                        for reason in blocked {
                            self.observations.lock().unwrap().push(format!("tool request blocked: {reason}"));
                        }
                        for request in &allowed {
                            let execution = self.execute_tool(request, language).await;
                            let signature = crate::domain::digest::tool_request_signature(&request.tool, &request.args)
                                .unwrap_or_else(|_| request.tool.clone());
                            let action_json = serde_json::json!({"tool": request.tool, "args": request.args});
                            // score = 100*outcome - 1*commandCount - 0.02*diffLines - 50*regressions;
                            // tool calls never carry a diff or regressions, so those terms are zero.
                            let score = 100.0 * execution.outcome.value() - execution.command_count as f64;
                            self.record_action(&context, ActionType::ToolRequest, &signature, action_json, execution.outcome, score, execution.command_count, 0, 0)
                                .await;
                            self.observations.lock().unwrap().push(execution.observation);
                        }
                    }
                    ModelResponse::Patch { diff } => {
                        low_confidence = false;
                        let diff = Diff::parse(diff);
                        let mut seen = self.tried_diff_hashes.lock().unwrap();
                        if seen.contains(&diff.hash) {
                            continue;
                        }
                        seen.insert(diff.hash.clone());
                        drop(seen);

                        self.budget.record_patch_attempt();

                        let profile = match &self.config.feature {
                            Some(_) => HygieneProfile::Feature,
                            None => HygieneProfile::Repair,
                        };
                        let mut limits = HygieneLimits::for_profile(profile, profile_language);
                        if let Some(max_lines) = self.config.max_lines_changed_override {
                            limits.max_lines = max_lines;
                        }
                        if let Some(max_files) = self.config.max_files_changed_override {
                            limits.max_files = max_files;
                        }
                        if self.config.allow_lockfile_changes {
                            limits.allow_lockfile_changes = true;
                        }
                        let hygiene_result = hygiene::check(&diff, &limits);
                        if !hygiene_result.is_valid {
                            self.observations.lock().unwrap().push(format!(
                                "patch rejected by hygiene gate: {}",
                                hygiene_result.violations.join("; ")
                            ));
                            let action_json = serde_json::json!({"diff_hash": diff.hash, "files_changed": diff.files_changed});
                            self.record_action(&context, ActionType::Patch, &diff.hash, action_json, Outcome::Blocked, 0.0, 0, 0, 0).await;
                            continue;
                        }

                        candidates.push(EvalCandidate { diff, temperature: *temperature });
                    }
                    ModelResponse::FeatureSummary { summary, completion_status } => {
                        self.observations.lock().unwrap().push(format!("feature_summary ({completion_status:?}): {summary}"));
                    }
                }
            }

            if !candidates.is_empty() {
                let focus_fallback: Vec<String> = match &self.config.focused_verify_cmd_override {
                    Some(cmd) => cmd.split_whitespace().map(String::from).collect(),
                    None => effective_test_cmd.to_vec(),
                };
                let outcomes = self
                    .evaluator
                    .evaluate(candidates, &policy_choice.focus_cmd_argv(&focus_fallback), effective_test_cmd)
                    .await;

                for outcome in &outcomes {
                    let action_outcome = if outcome.ok { Outcome::Success } else { Outcome::Fail };
                    let score = evaluator::score_diff(&outcome.diff, &failure_info.likely_files) as f64;
                    let action_json = serde_json::json!({"diff_hash": outcome.diff.hash, "files_changed": outcome.diff.files_changed});
                    self.record_action(
                        &context,
                        ActionType::Patch,
                        &outcome.diff.hash,
                        action_json,
                        action_outcome,
                        score,
                        1,
                        outcome.diff.total_lines_changed() as u32,
                        0,
                    )
                    .await;
                }

                if let Some(winner) = evaluator::select_winner(&outcomes, &failure_info.likely_files) {
                    if let Err(e) = self.sandbox.apply_patch(&winner.diff.text).await {
                        warn!(error = %e, "failed to apply winning diff to the main repo");
                    } else {
                        made_progress = true;
                        self.sandbox.invalidate_caches();
                        self.budget.record_step(made_progress);
                        self.budget.record_confidence(false);
                        return (Phase::FinalVerify, None, Some(winner.diff.clone()));
                    }
                }
            }

            self.budget.record_step(made_progress);
            self.budget.record_confidence(low_confidence);

            if stalled && self.stall_detector.repeat_count() >= self.config.stall_threshold * 3 {
                return (Phase::Bailout, Some("Prolonged stall: same failure signature past the widened threshold".to_string()), None);
            }

            current = self.run_verify(effective_test_cmd, "REPAIR_LOOP").await;
            if current.ok {
                return (Phase::FinalVerify, None, None);
            }
        }
    }

    /// Executes a single tool request against the sandbox, returning a short
    /// observation string to fold back into the next prompt along with the
    /// outcome and command count ActionMemory needs to score the invocation.
    async fn execute_tool(&self, request: &ToolRequest, language: Language) -> ToolExecution {
        match request.tool.as_str() {
            "sandbox.read_file" => {
                let path = request.args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                match self.sandbox.read_file(path, 120 * 1024, true) {
                    Ok(bytes) => ToolExecution::ok(format!("read_file({path}):\n{}", String::from_utf8_lossy(&bytes)), 0),
                    Err(e) => ToolExecution::fail(format!("read_file({path}) failed: {e}"), 0),
                }
            }
            "sandbox.list_tree" => {
                let tree = self.sandbox.list_tree(2000, true);
                ToolExecution::ok(format!("list_tree: {} files\n{}", tree.len(), tree.join("\n")), 0)
            }
            "sandbox.grep" => {
                let query = request.args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                let matches = self.sandbox.grep(query, 200);
                ToolExecution::ok(format!("grep({query}): {} matches\n{}", matches.len(), matches.join("\n")), 0)
            }
            "sandbox.run" => {
                let cmd_text = request.args.get("cmd").and_then(|v| v.as_str()).unwrap_or_default();
                let policy = CommandPolicy::new(language);
                match policy.check_text(cmd_text) {
                    Ok(argv) => {
                        let command = Command::new(argv, self.sandbox.repo_dir(), 60);
                        match self.executor.run(&command).await {
                            Ok(result) => {
                                self.log_command("REPAIR_LOOP", &command, &result);
                                let observation = format!("run({cmd_text}) exit={}:\n{}\n{}", result.exit_code, result.stdout, result.stderr);
                                if result.ok {
                                    ToolExecution::ok(observation, 1)
                                } else {
                                    ToolExecution::fail(observation, 1)
                                }
                            }
                            Err(e) => ToolExecution::fail(format!("run({cmd_text}) failed: {e}"), 1),
                        }
                    }
                    Err(rejection) => ToolExecution::blocked(format!("run({cmd_text}) denied by policy: {rejection}")),
                }
            }
            other => ToolExecution::blocked(format!("unknown tool '{other}' requested; ignored")),
        }
    }

    /// Picks up to six files likely relevant to the failure: the top failing
    /// test, the parser's `likely_files`, and (for QuixBugs-shaped repos) the
    /// program module a `python_testcases/test_X.py` failure implicates.
    fn collect_high_signal_files(&self, info: &FailureInfo) -> Vec<String> {
        let mut files = Vec::new();

        if let Some(test) = info.failing_tests.first() {
            files.push(test.clone());
            if let Some(program) = quixbugs_program_for_test(test) {
                files.push(program);
            }
        }

        for candidate in &info.likely_files {
            if files.len() >= 6 {
                break;
            }
            if hygiene::is_test_file(candidate) && Some(candidate.as_str()) != info.failing_tests.first().map(String::as_str) {
                continue;
            }
            if !files.contains(candidate) {
                files.push(candidate.clone());
            }
        }

        files.truncate(6);
        files
    }

    async fn query_priors(&self, context: &ContextSignature) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let query_context = QueryContext {
            repo_type: context.repo_type.clone(),
            failure_class: context.failure_class.clone(),
            language: context.language.clone(),
            env_fingerprint: context.env_fingerprint.clone(),
            attempt_bucket: context.attempt_bucket,
            failing_test_file: context.failing_test_file.clone(),
            sig_prefix: context.sig_prefix.clone(),
            stalled: context.stalled,
        };
        match memory.query_priors(&query_context, 5, 200, 0.2, None).await {
            Ok(priors) if !priors.is_empty() => Some(
                priors
                    .iter()
                    .map(|p| format!("{}: success_rate={:.2} mean_score={:.1} n={}", p.action_key, p.success_rate, p.mean_score, p.n))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to query action priors");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_action(
        &self,
        context: &ContextSignature,
        action_type: ActionType,
        action_key: &str,
        action_json: serde_json::Value,
        outcome: Outcome,
        score: f64,
        command_count: u32,
        diff_lines: u32,
        regressions: u32,
    ) {
        let Some(memory) = self.memory.as_ref() else { return };
        let Ok(context_hash) = context.hash() else { return };
        let query_context = QueryContext {
            repo_type: context.repo_type.clone(),
            failure_class: context.failure_class.clone(),
            language: context.language.clone(),
            env_fingerprint: context.env_fingerprint.clone(),
            attempt_bucket: context.attempt_bucket,
            failing_test_file: context.failing_test_file.clone(),
            sig_prefix: context.sig_prefix.clone(),
            stalled: context.stalled,
        };
        if let Err(e) = memory
            .record(
                &self.run_header.run_id,
                &context_hash,
                &query_context,
                action_type,
                action_key,
                action_json,
                outcome,
                score,
                1.0,
                0,
                command_count,
                diff_lines,
                regressions,
            )
            .await
        {
            warn!(error = %e, "failed to record action outcome");
        }
    }

    fn transition(&self, from: Phase, to: Phase, reason: impl Into<String>) {
        let transition = PhaseTransition::new(from, to, reason);
        info!(from = from.as_str(), to = to.as_str(), reason = %transition.reason, "phase transition");
        self.run_log.lock().unwrap().push(serde_json::json!({
            "from": transition.from.as_str(),
            "to": transition.to.as_str(),
            "reason": transition.reason,
        }));
    }

    fn elapsed_minutes(&self) -> u64 {
        let elapsed = self.clock.now_utc() - self.run_header.start_utc;
        (elapsed.num_seconds().max(0) / 60) as u64
    }

    fn log_command(&self, phase: &str, command: &Command, result: &crate::command::CommandResult) {
        self.command_log.lock().unwrap().push(CommandLogEntry::new(phase, command, result));
    }

    fn build_evidence_bundle(
        &self,
        phase: Phase,
        winner: Option<&Diff>,
        baseline: Option<&VerifyResult>,
        final_result: Option<&VerifyResult>,
    ) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_header.run_id,
            "phase": phase.as_str(),
            "steps_taken": self.budget.steps(),
            "tool_calls": self.budget.total_tool_calls(),
            "winner_diff": winner.map(|d| &d.text),
            "baseline": baseline.map(|b| serde_json::json!({"ok": b.ok, "exit_code": b.exit_code})),
            "final": final_result.map(|f| serde_json::json!({"ok": f.ok, "exit_code": f.exit_code})),
            "baseline_output": baseline.map(|b| format!("{}\n{}", b.stdout, b.stderr)),
            "final_output": final_result.map(|f| format!("{}\n{}", f.stdout, f.stderr)),
            "command_log": &*self.command_log.lock().unwrap(),
            "run_log": &*self.run_log.lock().unwrap(),
        })
    }

    async fn write_evidence_pack(&self, phase: Phase, winner: Option<Diff>, baseline: &VerifyResult, final_result: &VerifyResult) {
        let bundle = self.build_evidence_bundle(phase, winner.as_ref(), Some(baseline), Some(final_result));
        self.write_bundle(&bundle).await;
    }

    async fn write_bundle(&self, bundle: &serde_json::Value) {
        let Some(sink) = self.evidence_sink.as_ref() else { return };
        let run_dir = self.config.results_root.join(&self.run_header.run_id);
        if let Err(e) = sink.write(&run_dir, bundle).await {
            warn!(error = %e, "failed to write evidence pack");
        }
    }

    fn policy_language(&self, buildpack_idx: usize) -> Language {
        match self.buildpacks[buildpack_idx].name() {
            "python" => Language::Python,
            "node" => Language::Node,
            "rust" => Language::Rust,
            "go" => Language::Go,
            "java" => Language::Java,
            "dotnet" => Language::DotNet,
            _ => Language::Other,
        }
    }

    fn profile_language(&self, buildpack_idx: usize) -> ProfileLanguage {
        match self.buildpacks[buildpack_idx].name() {
            "java" => ProfileLanguage::Java,
            "node" => ProfileLanguage::Node,
            _ => ProfileLanguage::Other,
        }
    }
}

/// QuixBugs-shaped repos name their failing test `python_testcases/test_X.py`
/// for a buggy module at `python_programs/X.py`; map one to the other when
/// the shape matches, since it is cheap, high-signal context for the model.
fn quixbugs_program_for_test(test_path: &str) -> Option<String> {
    let file_name = test_path.rsplit('/').next()?;
    let stem = file_name.strip_prefix("test_")?.strip_suffix(".py")?;
    if test_path.contains("python_testcases/") {
        Some(format!("python_programs/{stem}.py"))
    } else {
        None
    }
}

trait PolicyChoiceExt {
    fn intent_label(&self) -> String;
    fn focus_cmd_argv(&self, fallback: &[String]) -> Vec<String>;
}

impl PolicyChoiceExt for intent::PolicyChoice {
    fn intent_label(&self) -> String {
        format!("{:?}", self.intent)
    }

    fn focus_cmd_argv(&self, fallback: &[String]) -> Vec<String> {
        match &self.focus_cmd {
            Some(cmd) => cmd.split_whitespace().map(String::from).collect(),
            None => fallback.to_vec(),
        }
    }
}
