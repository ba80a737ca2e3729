//! The full CLI flag surface and the pure `from_cli` function that turns a
//! parsed [`Cli`] into the `RunConfig` (and surrounding wiring parameters)
//! `main` hands to a `ControllerLoop`. Kept free of any I/O so it is
//! unit-testable without a sandbox, executor, or network access.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use patchloop_core::budget::BudgetLimits;
use patchloop_core::command::ResourceCaps;
use patchloop_core::controller::{FeatureGoal, RunConfig, VerifyPolicy};
use patchloop_core::domain::TimeMode;
use patchloop_core::sandbox::validate_github_url;
use patchloop_core::tool_governor::ToolGovernorConfig;
use patchloop_state::MemoryConfig;
use thiserror::Error;

/// Bad input caught before any sandbox is created — a URL, ref, or flag
/// combination the controller loop should never have to reason about.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid repo URL '{0}': must be a public https://github.com/<owner>/<repo> URL")]
    InvalidRepoUrl(String),

    #[error("--feature-mode requires --feature-description")]
    MissingFeatureDescription,

    #[error("--test must not be empty")]
    EmptyTestCommand,

    #[error("--sysdeps-tier must be between 0 and 7, got {0}")]
    SysdepsTierOutOfRange(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum TimeModeArg {
    Frozen,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum VerifyPolicyArg {
    TestsOnly,
    CmdsThenTests,
    CmdsOnly,
}

/// `patchloop`: drives a candidate edit against a test command until it
/// passes, scores winners in isolated git worktrees, and writes an
/// evidence pack.
#[derive(Parser, Debug)]
#[command(name = "patchloop")]
#[command(author = "Patchloop Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A bounded, sandboxed autonomous code-repair controller", long_about = None)]
pub struct Cli {
    /// Public GitHub repo to repair, e.g. https://github.com/org/repo
    #[arg(long)]
    pub repo: String,

    /// Test command to verify against
    #[arg(long, default_value = "pytest -q")]
    pub test: String,

    /// Optional checkout target (branch, tag, or SHA)
    #[arg(long = "ref")]
    pub checkout_ref: Option<String>,

    /// Max repair-loop iterations
    #[arg(long, default_value_t = 12)]
    pub steps: u64,

    /// Remove the step cap entirely
    #[arg(long)]
    pub fix_all: bool,

    /// Bail out after this many iterations without improvement
    #[arg(long, default_value_t = 10)]
    pub max_steps_without_progress: u64,

    /// LLM selector; names prefixed `deepseek-` use DeepSeek, else Gemini
    #[arg(long, env = "RFSN_MODEL", default_value = "gemini-2.0-flash")]
    pub model: String,

    /// Deterministic-replay vs host-clock time source
    #[arg(long, value_enum, default_value_t = TimeModeArg::Frozen)]
    pub time_mode: TimeModeArg,

    /// ISO-8601 UTC anchor for a frozen-clock replay
    #[arg(long)]
    pub run_started_at_utc: Option<String>,

    /// Deterministic replay seed folded into the run id
    #[arg(long, default_value_t = 0)]
    pub time_seed: i64,

    /// Deterministic replay seed for any randomised selection
    #[arg(long, default_value_t = 0)]
    pub rng_seed: u64,

    /// Docker image used when no buildpack-specific image applies
    #[arg(long, default_value = "python:3.11-slim")]
    pub docker_image: String,

    /// DANGER: run commands on the host instead of in a container
    #[arg(long)]
    pub unsafe_host_exec: bool,

    /// CPU share per command
    #[arg(long, default_value_t = 2.0)]
    pub cpu: f64,

    /// Memory ceiling per command, in MiB
    #[arg(long, default_value_t = 2048)]
    pub mem_mb: u64,

    /// Process-id ceiling per command
    #[arg(long, default_value_t = 256)]
    pub pids: u32,

    /// Mount the container root filesystem read-only
    #[arg(long)]
    pub docker_readonly: bool,

    /// Seconds allowed for each dependency-install command
    #[arg(long, default_value_t = 600)]
    pub install_timeout: u64,

    /// Seconds allowed for a focused (scoped) verification run
    #[arg(long, default_value_t = 90)]
    pub focus_timeout: u64,

    /// Seconds allowed for a full verification run
    #[arg(long, default_value_t = 180)]
    pub full_timeout: u64,

    /// Run-lifetime cap on model-requested tool invocations
    #[arg(long, default_value_t = 40)]
    pub max_tool_calls: u64,

    /// Allow installing a whitelisted system package set before the
    /// buildpack's own install steps
    #[arg(long)]
    pub enable_sysdeps: bool,

    /// Sysdeps package-set tier (0 = none, 7 = broadest)
    #[arg(long, default_value_t = 0)]
    pub sysdeps_tier: u8,

    /// Hard cap on packages a sysdeps install may request
    #[arg(long, default_value_t = 10)]
    pub sysdeps_max_packages: u32,

    /// Path to the ActionMemory SurrealKV file; in-memory (non-durable) if omitted
    #[arg(long)]
    pub learning_db: Option<PathBuf>,

    /// Half-life, in days, of an action-outcome row's similarity weight
    #[arg(long, default_value_t = 14.0)]
    pub learning_half_life_days: f64,

    /// Rows older than this are dropped during housekeeping
    #[arg(long, default_value_t = 90)]
    pub learning_max_age_days: i64,

    /// Row-count ceiling enforced during housekeeping
    #[arg(long, default_value_t = 2000)]
    pub learning_max_rows: usize,

    /// Run as a feature implementation rather than a repair
    #[arg(long)]
    pub feature_mode: bool,

    /// Natural-language description of the feature to implement
    #[arg(long)]
    pub feature_description: Option<String>,

    /// Acceptance criterion; repeatable
    #[arg(long = "acceptance-criteria")]
    pub acceptance_criteria: Vec<String>,

    /// How FINAL_VERIFY combines the test command with extra verify commands
    #[arg(long, value_enum, default_value_t = VerifyPolicyArg::TestsOnly)]
    pub verify_policy: VerifyPolicyArg,

    /// Extra command FINAL_VERIFY must also pass; repeatable
    #[arg(long = "verify-cmd-extra")]
    pub verify_cmd_extra: Vec<String>,

    /// Overrides the scoped test command a candidate patch is focus-verified against
    #[arg(long)]
    pub focused_verify_cmd: Option<String>,

    /// Hygiene gate: max changed lines a candidate patch may carry
    #[arg(long)]
    pub max_lines_changed: Option<usize>,

    /// Hygiene gate: max files a candidate patch may touch
    #[arg(long)]
    pub max_files_changed: Option<usize>,

    /// Hygiene gate: permit changes to lockfiles
    #[arg(long)]
    pub allow_lockfile_changes: bool,

    /// Directory evidence packs are written under
    #[arg(long, default_value = "results")]
    pub results_root: PathBuf,

    /// Verbose (debug-level) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit newline-delimited JSON log lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Everything `main` needs to construct and run one `ControllerLoop`, split
/// out from `RunConfig` where it governs component *selection* (which
/// executor, which model, where the memory file lives) rather than the
/// loop's own behaviour.
pub struct ControllerConfig {
    pub run_config: RunConfig,
    pub model: String,
    pub docker_image: String,
    pub unsafe_host_exec: bool,
    pub docker_readonly: bool,
    pub learning_db: Option<PathBuf>,
    pub memory_config: MemoryConfig,
    pub time_mode: TimeMode,
    pub run_started_at_utc: Option<String>,
    pub time_seed: i64,
    pub rng_seed: u64,
    pub results_root: PathBuf,
    pub verbose: bool,
    pub json_logs: bool,
}

impl ControllerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, InputError> {
        validate_github_url(&cli.repo).map_err(|_| InputError::InvalidRepoUrl(cli.repo.clone()))?;

        if cli.test.trim().is_empty() {
            return Err(InputError::EmptyTestCommand);
        }

        if cli.feature_mode && cli.feature_description.is_none() {
            return Err(InputError::MissingFeatureDescription);
        }

        if cli.sysdeps_tier > 7 {
            return Err(InputError::SysdepsTierOutOfRange(cli.sysdeps_tier));
        }

        let feature = if cli.feature_mode {
            Some(FeatureGoal {
                description: cli.feature_description.clone().unwrap_or_default(),
                acceptance_criteria: cli.acceptance_criteria.clone(),
            })
        } else {
            None
        };

        let mut budget_limits = BudgetLimits {
            max_steps_without_progress: cli.max_steps_without_progress,
            max_tool_calls: cli.max_tool_calls,
            ..BudgetLimits::default()
        };
        if cli.fix_all {
            budget_limits.max_steps = u64::MAX;
        } else {
            budget_limits.max_steps = cli.steps;
        }

        let verify_policy = match cli.verify_policy {
            VerifyPolicyArg::TestsOnly => VerifyPolicy::TestsOnly,
            VerifyPolicyArg::CmdsThenTests => VerifyPolicy::CmdsThenTests,
            VerifyPolicyArg::CmdsOnly => VerifyPolicy::CmdsOnly,
        };

        let run_config = RunConfig {
            repo_url: cli.repo.clone(),
            checkout_ref: cli.checkout_ref.clone(),
            test_cmd_override: Some(cli.test.clone()),
            feature,
            budget_limits,
            tool_governor_config: ToolGovernorConfig {
                max_per_run: cli.max_tool_calls as usize,
                ..ToolGovernorConfig::default()
            },
            repo_type: repo_type_from_url(&cli.repo),
            env_fingerprint: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            results_root: cli.results_root.clone(),
            resource_caps: ResourceCaps {
                cpu: cli.cpu,
                mem_mb: cli.mem_mb,
                pids: cli.pids,
                read_only: cli.docker_readonly,
            },
            install_timeout_sec: Some(cli.install_timeout),
            focus_timeout_sec: cli.focus_timeout,
            full_timeout_sec: cli.full_timeout,
            max_lines_changed_override: cli.max_lines_changed,
            max_files_changed_override: cli.max_files_changed,
            allow_lockfile_changes: cli.allow_lockfile_changes,
            verify_policy,
            verify_cmd_extra: cli.verify_cmd_extra.clone(),
            focused_verify_cmd_override: cli.focused_verify_cmd.clone(),
            enable_sysdeps: cli.enable_sysdeps,
            sysdeps_tier: cli.sysdeps_tier,
            sysdeps_max_packages: cli.sysdeps_max_packages,
            ..RunConfig::default()
        };

        let time_mode = match cli.time_mode {
            TimeModeArg::Frozen => TimeMode::Frozen,
            TimeModeArg::Live => TimeMode::Live,
        };

        let memory_config = MemoryConfig {
            half_life_days: cli.learning_half_life_days,
            max_age_days: cli.learning_max_age_days,
            max_rows: cli.learning_max_rows,
        };

        Ok(Self {
            run_config,
            model: cli.model,
            docker_image: cli.docker_image,
            unsafe_host_exec: cli.unsafe_host_exec,
            docker_readonly: cli.docker_readonly,
            learning_db: cli.learning_db,
            memory_config,
            time_mode,
            run_started_at_utc: cli.run_started_at_utc,
            time_seed: cli.time_seed,
            rng_seed: cli.rng_seed,
            results_root: cli.results_root,
            verbose: cli.verbose,
            json_logs: cli.json_logs,
        })
    }
}

fn repo_type_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or("generic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["patchloop", "--repo", "https://github.com/org/repo"])
    }

    #[test]
    fn test_rejects_non_github_url() {
        let mut cli = base_cli();
        cli.repo = "https://gitlab.com/org/repo".to_string();
        assert_eq!(ControllerConfig::from_cli(cli).unwrap_err(), InputError::InvalidRepoUrl("https://gitlab.com/org/repo".to_string()));
    }

    #[test]
    fn test_accepts_well_formed_github_url() {
        let config = ControllerConfig::from_cli(base_cli()).unwrap();
        assert_eq!(config.run_config.repo_url, "https://github.com/org/repo");
        assert_eq!(config.run_config.repo_type, "repo");
    }

    #[test]
    fn test_fix_all_removes_step_cap() {
        let mut cli = base_cli();
        cli.fix_all = true;
        let config = ControllerConfig::from_cli(cli).unwrap();
        assert_eq!(config.run_config.budget_limits.max_steps, u64::MAX);
    }

    #[test]
    fn test_feature_mode_without_description_is_rejected() {
        let mut cli = base_cli();
        cli.feature_mode = true;
        assert_eq!(ControllerConfig::from_cli(cli).unwrap_err(), InputError::MissingFeatureDescription);
    }

    #[test]
    fn test_feature_mode_with_description_builds_feature_goal() {
        let mut cli = base_cli();
        cli.feature_mode = true;
        cli.feature_description = Some("add a health endpoint".to_string());
        cli.acceptance_criteria = vec!["returns 200".to_string()];
        let config = ControllerConfig::from_cli(cli).unwrap();
        let feature = config.run_config.feature.expect("feature goal");
        assert_eq!(feature.description, "add a health endpoint");
        assert_eq!(feature.acceptance_criteria, vec!["returns 200".to_string()]);
    }

    #[test]
    fn test_sysdeps_tier_out_of_range_is_rejected() {
        let mut cli = base_cli();
        cli.sysdeps_tier = 9;
        assert_eq!(ControllerConfig::from_cli(cli).unwrap_err(), InputError::SysdepsTierOutOfRange(9));
    }

    #[test]
    fn test_model_env_fallback_defaults_to_gemini_name() {
        let cli = base_cli();
        assert_eq!(cli.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_deepseek_model_name_is_passed_through() {
        let mut cli = base_cli();
        cli.model = "deepseek-chat".to_string();
        let config = ControllerConfig::from_cli(cli).unwrap();
        assert_eq!(config.model, "deepseek-chat");
    }
}
