//! `cpd run` — wire config, gateway, state, engine, and controller together.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cpd_config::{Config, ExecutionMode};
use cpd_engine::{Engine, EngineSettings, TargetSpec};
use cpd_runner::{Controller, RunMode, Shutdown};
use cpd_state::StateStore;
use cpd_terminal_sim::SimTerminal;
use tracing::{info, warn};
use uuid::Uuid;

pub fn execute(config_paths: &[String], mode_override: Option<ExecutionMode>) -> Result<ExitCode> {
    let loaded = super::load(config_paths)?;
    let errors = loaded.validation_errors();
    if !errors.is_empty() {
        eprintln!("configuration validation failed:");
        for error in &errors {
            eprintln!("  - {error}");
        }
        return Ok(ExitCode::FAILURE);
    }

    let config = loaded.config.clone();
    super::init_tracing(&config.logging.level);

    let run_id = Uuid::new_v4();
    info!(%run_id, config_hash = %loaded.config_hash, "copydesk starting");

    let gateway = build_gateway(&config)?;
    let store = StateStore::load(&config.state.path);
    let settings = engine_settings(&config);
    let mut engine = Engine::new(gateway, settings, store);

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            warn!("shutdown signal received, finishing current cycle");
            shutdown.request();
        })
        .context("install signal handler failed")?;
    }

    let mode = mode_override.unwrap_or(config.run.mode);
    let run_mode = run_mode(&config, mode);
    info!(mode = mode.as_str(), "run mode selected");

    let controller = Controller::new(run_mode, shutdown);
    let summary = controller.run(|iteration| {
        info!(iteration, "cycle starting");
        Ok(engine.run_cycle())
    });

    info!(
        iterations = summary.iterations,
        succeeded = summary.cycles_succeeded,
        failed = summary.cycles_failed,
        orders_copied = summary.orders_copied,
        orders_updated = summary.orders_updated,
        orders_cancelled = summary.orders_cancelled,
        positions_updated = summary.positions_updated,
        positions_closed = summary.positions_closed,
        "run finished"
    );

    // Loop modes exit 0 after a clean shutdown; only a single-shot run
    // propagates the cycle outcome into the exit code.
    let code = match mode {
        ExecutionMode::Once if !summary.all_succeeded() => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    };
    Ok(code)
}

fn build_gateway(config: &Config) -> Result<SimTerminal> {
    match config.gateway.kind.as_str() {
        "sim" => {
            let fixture = config
                .gateway
                .fixture
                .as_ref()
                .context("gateway.fixture missing")?;
            SimTerminal::from_fixture_file(fixture)
        }
        other => bail!("no gateway adapter compiled in for kind '{other}'"),
    }
}

fn engine_settings(config: &Config) -> EngineSettings {
    EngineSettings {
        source_name: config.source.name.clone(),
        source_credentials: config.source.credentials.clone(),
        targets: config
            .targets
            .iter()
            .map(|t| TargetSpec {
                name: t.name.clone(),
                credentials: t.credentials.clone(),
                policy: t.policy.clone(),
            })
            .collect(),
        on_target_failure: config.run.on_target_failure,
    }
}

fn run_mode(config: &Config, mode: ExecutionMode) -> RunMode {
    match mode {
        ExecutionMode::Once => RunMode::Once,
        ExecutionMode::Interval => RunMode::Interval {
            interval: Duration::from_secs(config.run.interval_secs),
            max_iterations: match config.run.max_iterations {
                0 => None,
                n => Some(n),
            },
        },
        ExecutionMode::Continuous => RunMode::Continuous {
            delay: Duration::from_secs(config.run.delay_secs),
            max_runtime: match config.run.max_runtime_hours {
                h if h > 0.0 => Some(Duration::from_secs_f64(h * 3600.0)),
                _ => None,
            },
        },
    }
}
