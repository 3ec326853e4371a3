//! Suite Orchestrator - grouped parallel test-suite runner
//!
//! Discovers `test_<NN>_<name>` units, runs them group by group (units
//! sharing a tens-digit run together, first unit in the foreground),
//! collects the result record each unit writes, and reconciles line coverage
//! from direct-linked and full-binary sources.
//!
//! ## Usage
//!
//! ```bash
//! # Run every unit
//! suite-orchestrator run
//!
//! # Run two units, one at a time
//! suite-orchestrator run test_10_startup 30
//!
//! # Keep groups 3 and 5 sequential
//! suite-orchestrator run --sequential-groups=3,5
//!
//! # Inside a unit
//! suite-orchestrator wait --log app.log --pattern "STARTUP COMPLETE" --pid $PID
//! suite-orchestrator subtest pass "Startup"
//! suite-orchestrator record
//!
//! # Coverage
//! suite-orchestrator coverage --direct build/unity --full build/blackbox
//! ```

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod channel;
mod cli;
mod config;
mod context;
mod coverage;
mod executor;
mod lifecycle;
mod models;
mod output;
mod results;
mod utils;
mod waiter;

use channel::{FileChannel, SubtestTally};
use cli::Args;
use config::{get_env, get_env_parse, print_env_help, ConfigFile, EnvConfig, OrchestratorConfig};
use context::{RunContext, RUN_TIMESTAMP_FORMAT};
use coverage::{CoverageHistory, CoverageReconciler};
use executor::{discover, GroupedScheduler, ScheduleMode};
use lifecycle::AppInstance;
use models::{ExecutionGroup, ResultRecord};
use output::{OutputFormat, ResultFormatter};
use results::{aggregate, publish, ResultsStorage};
use utils::logger::{init_logger, LogLevel};
use waiter::{parse_pattern, Condition, ConditionWaiter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logger(LogLevel::from_verbose(args.verbose));

    let env = EnvConfig::load();
    let explicit = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let (file, source) = ConfigFile::resolve(explicit.as_deref())?;
    if let Some(path) = &source {
        debug!("Using configuration {}", path.display());
    }

    let mut config = file.orchestrator;
    config.apply_env(&env);

    match args.command {
        cli::Command::Run(run_args) => run_units(run_args, config, &env).await,
        cli::Command::List(list_args) => list_units(list_args, config),
        cli::Command::Coverage(coverage_args) => run_coverage(coverage_args, config),
        cli::Command::Wait(wait_args) => wait_condition(wait_args).await,
        cli::Command::Subtest(subtest_args) => {
            report_subtest(
                subtest_args.verdict == cli::Verdict::Pass,
                &subtest_args.name,
            )?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Record(record_args) => write_record(record_args),
        cli::Command::App(app_args) => drive_app(app_args.action, config).await,
        cli::Command::Config(config_args) => {
            manage_config(config_args.action, config, source)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_units(
    args: cli::RunArgs,
    mut config: OrchestratorConfig,
    env: &EnvConfig,
) -> Result<ExitCode> {
    if let Some(dir) = args.unit_dir {
        config.paths.unit_dir = dir;
    }
    if let Some(dir) = args.results_dir {
        config.paths.results_dir = dir;
    }
    if let Some(report) = args.report {
        config.paths.report_document = Some(report);
    }
    if let Some(max) = args.max_parallel {
        config.scheduler.max_parallel = max.max(1);
    }
    if let Some(timeout) = args.timeout {
        config.scheduler.unit_timeout_secs = timeout;
    }

    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow!("Unknown output format: {}", args.format))?;
    let formatter = ResultFormatter::new(format).auto_color();

    let mode = ScheduleMode {
        skip_execution: args.skip_tests,
        all_sequential: args.sequential || env.sequential.unwrap_or(false),
        sequential_groups: args.sequential_groups.into_iter().collect(),
        named: args.units,
    };

    let ctx = Arc::new(RunContext::new(config)?);
    info!("Run {} started", ctx.run_id);

    let scheduler = GroupedScheduler::new(ctx.clone()).with_formatter(formatter.clone());
    let mut stdout = std::io::stdout();
    let outcome = scheduler.run(&mode, &mut stdout).await?;

    let mut summary =
        aggregate(&outcome.outcomes, outcome.wall_clock).with_run(&ctx.run_id, &ctx.run_timestamp);

    if args.coverage {
        let reconciler = CoverageReconciler::new(ctx.config.coverage.clone());
        match reconciler.run() {
            Ok(report) => {
                let history = CoverageHistory::new(ctx.results_dir());
                if let Err(e) = history.record(&ctx.run_timestamp, &report) {
                    warn!("Failed to update coverage history: {}", e);
                }
                summary = summary.with_coverage(report);
            }
            Err(e) => warn!("Coverage reconciliation failed: {}", e),
        }
    }

    ResultsStorage::new(ctx.results_dir()).save(&summary)?;

    if let Some(document) = &ctx.config.paths.report_document {
        match publish(&summary, document) {
            Ok(true) => info!("Updated {}", document.display()),
            Ok(false) => debug!("{} unchanged", document.display()),
            Err(e) => warn!("Failed to update {}: {}", document.display(), e),
        }
    }

    println!("{}", formatter.format_summary(&summary));

    if outcome.is_success() && summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn list_units(args: cli::ListArgs, config: OrchestratorConfig) -> Result<ExitCode> {
    let unit_dir = args.unit_dir.unwrap_or(config.paths.unit_dir);
    let units = discover(&unit_dir, &config.scheduler.meta_unit)?;
    let groups = ExecutionGroup::partition(units, &config.scheduler.sequential_groups, false);

    println!("\nTest units in {}\n", unit_dir.display());
    print!("{}", ResultFormatter::default().auto_color().unit_inventory(&groups));
    Ok(ExitCode::SUCCESS)
}

fn run_coverage(args: cli::CoverageArgs, config: OrchestratorConfig) -> Result<ExitCode> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow!("Unknown output format: {}", args.format))?;

    let direct = args.direct.unwrap_or_else(|| config.coverage.direct_dir.clone());
    let full = args.full.unwrap_or_else(|| config.coverage.full_dir.clone());
    let report = CoverageReconciler::new(config.coverage.clone())
        .run_dirs(&direct, &full)
        .context("Coverage reconciliation failed")?;

    if !args.no_history {
        let timestamp = Local::now().format(RUN_TIMESTAMP_FORMAT).to_string();
        CoverageHistory::new(&config.paths.results_dir)
            .record(&timestamp, &report)
            .context("Failed to update coverage history")?;
    }

    println!(
        "{}",
        ResultFormatter::new(format).auto_color().format_coverage(&report)
    );
    Ok(ExitCode::SUCCESS)
}

async fn wait_condition(args: cli::WaitArgs) -> Result<ExitCode> {
    let condition = if let Some(log) = args.log {
        let text = args
            .pattern
            .ok_or_else(|| anyhow!("--log requires --pattern"))?;
        Condition::log_count(log, parse_pattern(&text, args.regex)?, args.count)
    } else if let Some(pid) = args.gone {
        Condition::ProcessGone { pid }
    } else if let Some(path) = args.path {
        Condition::PathExists { path }
    } else {
        bail!("Nothing to wait for: use --log/--pattern, --gone or --path");
    };

    let mut waiter = ConditionWaiter::from_secs(args.timeout, args.interval)
        .map_err(|e| anyhow!("Invalid --timeout or --interval: {e}"))?;
    if let Some(pid) = args.pid {
        waiter = waiter.watching(pid);
    }

    let outcome = waiter.wait_for(&condition).await;
    info!("{}: {}", condition, outcome);
    Ok(ExitCode::from(outcome.exit_code()))
}

/// Print the subtest line and tally it when running inside a unit
fn report_subtest(passed: bool, name: &str) -> Result<()> {
    println!(
        "{}",
        ResultFormatter::default().auto_color().subtest_line(passed, name)
    );

    match get_env("RESULT_FILE") {
        Some(result_file) => {
            SubtestTally::for_result_file(Path::new(&result_file)).append(passed, name)?
        }
        None => debug!("No result file in the environment; subtest not tallied"),
    }
    Ok(())
}

/// Exits non-zero when the record shows a failure, so a unit can end with
/// `suite-orchestrator record; exit $?`
fn write_record(args: cli::RecordArgs) -> Result<ExitCode> {
    let result_file = args
        .result_file
        .or_else(|| get_env("RESULT_FILE").map(PathBuf::from))
        .ok_or_else(|| anyhow!("No result file: pass --result-file or run under the orchestrator"))?;

    let (total, passed) = match (args.total, args.passed) {
        (Some(total), Some(passed)) => (total, passed),
        _ => SubtestTally::for_result_file(&result_file).counts()?,
    };
    if total == 0 {
        warn!("No subtests reported for {}", result_file.display());
    }

    let identifier = get_env_parse("UNIT_ID").unwrap_or(0);
    let name = args
        .name
        .or_else(|| get_env("UNIT_NAME"))
        .unwrap_or_else(|| "Unnamed".to_string());

    let record = ResultRecord::new(identifier, name, total, passed, args.elapsed);
    FileChannel::write_to(&result_file, &record)?;
    info!(
        "Recorded {}/{} passed to {}",
        record.subtest_passed,
        record.subtest_total,
        result_file.display()
    );

    if record.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn drive_app(action: cli::AppAction, config: OrchestratorConfig) -> Result<ExitCode> {
    let app = AppInstance::launch(&config.app)?;
    let mut all_passed = true;
    let mut check = |passed: bool, name: &str| -> Result<()> {
        all_passed &= passed;
        report_subtest(passed, name)
    };

    let started = app.wait_startup().await;
    check(started.is_satisfied(), "Startup complete")?;
    if !started.is_satisfied() {
        return Ok(ExitCode::FAILURE);
    }

    match action {
        cli::AppAction::Smoke => {
            if let Some(workers) = app.wait_workers().await {
                check(
                    workers.outcome.is_satisfied(),
                    &format!("Workers ready ({}/{})", workers.completed, workers.launched),
                )?;
            }

            let report = app.shutdown().await;
            check(report.marker.is_satisfied(), "Shutdown complete")?;
            check(report.is_clean(), "Clean exit")?;
        }
        cli::AppAction::Crash => {
            let report = app.crash().await;
            check(
                report.core_outcome.is_satisfied(),
                &format!("Core file {}", report.core_file.display()),
            )?;
            check(report.exit_code != Some(0), "Abnormal exit")?;
        }
    }

    if all_passed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn manage_config(
    action: cli::ConfigAction,
    config: OrchestratorConfig,
    source: Option<PathBuf>,
) -> Result<()> {
    match action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show => {
            match source {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# Built-in defaults"),
            }
            let file = ConfigFile {
                orchestrator: config,
                ..Default::default()
            };
            println!("{}", serde_yaml::to_string(&file)?);
        }

        cli::ConfigAction::Env => {
            EnvConfig::load().print_summary();
            println!();
            print_env_help();
        }
    }

    Ok(())
}
