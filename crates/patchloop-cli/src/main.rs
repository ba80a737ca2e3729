//! `patchloop`: parses the CLI surface, wires up the sandbox, executor,
//! buildpacks, trace parser, learning store, LLM client, and evidence
//! sink, then drives one `ControllerLoop` run to completion.

mod config;
mod trace;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use patchloop_core::clock::{Clock, FrozenClock, LiveClock};
use patchloop_core::controller::{ControllerLoop, RunConfig};
use patchloop_core::domain::{RunHeader, TimeMode};
use patchloop_core::evidence::FilesystemEvidenceSink;
use patchloop_core::executor::{DockerExecutor, Executor, HostExecutor};
use patchloop_core::llm::build_client;
use patchloop_core::sandbox::Sandbox;
use patchloop_state::ActionMemory;

use config::{Cli, ControllerConfig, InputError};
use trace::CompositeTraceParser;

/// Respects `RUST_LOG` when set; otherwise falls back to `level`. Safe to
/// call more than once — later calls are silently ignored.
fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer().with_target(false).json()).try_init().ok();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer().with_target(false)).try_init().ok();
    }
}

fn parse_start_utc(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        Some(s) => DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).with_context(|| format!("--run-started-at-utc '{s}' is not a valid RFC3339 timestamp")),
        None => Ok(Utc::now()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    let config = match ControllerConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e @ InputError::InvalidRepoUrl(_))
        | Err(e @ InputError::MissingFeatureDescription)
        | Err(e @ InputError::EmptyTestCommand)
        | Err(e @ InputError::SysdepsTierOutOfRange(_)) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let start_utc = parse_start_utc(config.run_started_at_utc.as_deref())?;
    let run_header = RunHeader::new(start_utc, config.time_seed, config.rng_seed, config.time_mode);

    info!(run_id = %run_header.run_id, repo = %config.run_config.repo_url, "starting run");

    let clock: Arc<dyn Clock> = match config.time_mode {
        TimeMode::Frozen => Arc::new(FrozenClock::new(start_utc, 1)),
        TimeMode::Live => Arc::new(LiveClock::new()),
    };

    let sandbox = Arc::new(Sandbox::create(&run_header.run_id).context("failed to create sandbox")?);

    let executor: Arc<dyn Executor> = if config.unsafe_host_exec {
        Arc::new(HostExecutor::new(true).context("failed to construct host executor")?)
    } else {
        Arc::new(DockerExecutor::new(config.docker_image.clone()).with_read_only(config.docker_readonly))
    };

    let buildpacks = patchloop_runner::default_buildpacks();
    let trace_parser = Arc::new(CompositeTraceParser::new());

    let memory = match &config.learning_db {
        Some(path) => Some(Arc::new(ActionMemory::open_file(path, config.memory_config.clone()).await.context("failed to open learning database")?)),
        None => Some(Arc::new(ActionMemory::open_in_memory(config.memory_config.clone()).await.context("failed to open in-memory learning database")?)),
    };

    let evidence_sink = Some(Arc::new(FilesystemEvidenceSink::new()) as Arc<dyn patchloop_core::collaborators::EvidenceSink>);

    let llm = Arc::from(build_client(&config.model));

    let run_config: RunConfig = config.run_config;

    let controller = ControllerLoop::new(clock, sandbox, executor, buildpacks, trace_parser, llm, memory, evidence_sink, run_header, run_config);

    let outcome = controller.run().await;

    info!(
        run_id = %outcome.run_id,
        ok = outcome.ok,
        phase = ?outcome.phase,
        steps_taken = outcome.steps_taken,
        "run finished"
    );
    if let Some(reason) = &outcome.bailout_reason {
        eprintln!("bailout: {reason}");
    }
    println!(
        "run {} finished in phase {:?} ({})",
        outcome.run_id,
        outcome.phase,
        if outcome.ok { "ok" } else { "failed" }
    );

    std::process::exit(if outcome.ok { 0 } else { 1 });
}
