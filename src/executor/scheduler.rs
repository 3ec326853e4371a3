//! Grouped scheduler
//!
//! Partitions units into groups by tens-digit and runs the groups in
//! ascending order. A failing unit flips the overall exit code but never
//! stops later groups.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::discovery::{discover, select_named};
use super::parallel::{replay_captures, ParallelExecutor};
use super::process::OutputMode;
use super::runner::UnitRunner;
use super::SchedulerError;
use crate::context::RunContext;
use crate::models::{
    ExecutionGroup, GroupMode, RecordSource, ResultRecord, TestUnit, UnitOutcome,
};
use crate::output::ResultFormatter;
use crate::utils::Timer;

/// What to run and how
#[derive(Clone, Debug, Default)]
pub struct ScheduleMode {
    /// Discover and report, but execute nothing
    pub skip_execution: bool,
    /// Run every group one unit at a time
    pub all_sequential: bool,
    /// Extra groups forced to run sequentially
    pub sequential_groups: BTreeSet<u32>,
    /// Explicit unit names; empty means every discovered unit
    pub named: Vec<String>,
}

impl ScheduleMode {
    fn runs_sequentially(&self) -> bool {
        self.all_sequential || !self.named.is_empty()
    }
}

/// Result of a whole run
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Unknown named units first, then units in execution order
    pub outcomes: Vec<UnitOutcome>,
    pub exit_code: i32,
    pub wall_clock: Duration,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct GroupedScheduler {
    ctx: Arc<RunContext>,
    runner: UnitRunner,
    executor: ParallelExecutor,
    formatter: ResultFormatter,
}

impl GroupedScheduler {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        let runner = UnitRunner::from_context(&ctx);
        let executor = ParallelExecutor::from_context(&ctx);
        Self {
            ctx,
            runner,
            executor,
            formatter: ResultFormatter::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Discover units and resolve names into ordered groups.
    ///
    /// Unknown names come back as failed outcomes.
    pub fn plan(
        &self,
        mode: &ScheduleMode,
    ) -> Result<(Vec<ExecutionGroup>, Vec<UnitOutcome>), SchedulerError> {
        let config = &self.ctx.config;
        let discovered = discover(&config.paths.unit_dir, &config.scheduler.meta_unit)?;

        let (units, missing) = if mode.named.is_empty() {
            (discovered, Vec::new())
        } else {
            let selection = select_named(&discovered, &mode.named);
            let missing = selection
                .unknown
                .iter()
                .map(|name| {
                    UnitOutcome::new(
                        "Missing",
                        ResultRecord::missing_unit(name),
                        RecordSource::Synthetic,
                    )
                })
                .collect();
            (selection.units, missing)
        };

        let mut sequential_groups = config.scheduler.sequential_groups.clone();
        sequential_groups.extend(mode.sequential_groups.iter().copied());

        let groups =
            ExecutionGroup::partition(units, &sequential_groups, mode.runs_sequentially());
        Ok((groups, missing))
    }

    /// Run every planned group and return all outcomes plus the exit code
    pub async fn run<W: Write>(
        &self,
        mode: &ScheduleMode,
        out: &mut W,
    ) -> Result<RunOutcome, SchedulerError> {
        let timer = Timer::start("run");
        let (groups, mut outcomes) = self.plan(mode)?;

        for missing in &outcomes {
            error!("Unit not found: {}", missing.record.display_name);
            emit(out, &self.formatter.unit_line(missing));
        }

        info!(
            "Running {} units in {} groups",
            groups.iter().map(|g| g.units.len()).sum::<usize>(),
            groups.len()
        );

        for group in &groups {
            outcomes.extend(self.run_group(group, mode, out).await);
        }

        let exit_code = if outcomes.iter().all(UnitOutcome::is_success) {
            0
        } else {
            1
        };

        Ok(RunOutcome {
            outcomes,
            exit_code,
            wall_clock: timer.stop(),
        })
    }

    /// Run one group. Empty groups are a no-op.
    pub async fn run_group<W: Write>(
        &self,
        group: &ExecutionGroup,
        mode: &ScheduleMode,
        out: &mut W,
    ) -> Vec<UnitOutcome> {
        if group.is_empty() {
            return Vec::new();
        }

        emit(out, &self.formatter.group_header(group));

        let outcomes = if mode.skip_execution {
            group.units.iter().map(UnitRunner::skipped).collect()
        } else {
            match group.mode {
                GroupMode::Sequential => self.run_sequential(&group.units, out).await,
                GroupMode::Parallel => {
                    self.executor
                        .run_group(&self.ctx, &self.runner, group, out)
                        .await
                }
            }
        };

        if group.mode == GroupMode::Parallel || mode.skip_execution {
            for outcome in &outcomes {
                emit(out, &self.formatter.unit_line(outcome));
            }
        }

        outcomes
    }

    async fn run_sequential<W: Write>(
        &self,
        units: &[TestUnit],
        out: &mut W,
    ) -> Vec<UnitOutcome> {
        let stream = self.ctx.config.scheduler.stream_foreground;
        let mut outcomes = Vec::with_capacity(units.len());

        for unit in units {
            let output = if stream {
                OutputMode::Inherit
            } else {
                OutputMode::Capture(self.ctx.capture_file(unit))
            };

            let outcome = self.runner.run(&self.ctx, unit, output).await;
            if let Err(e) = replay_captures(std::slice::from_ref(&outcome), out) {
                error!("Failed to replay output of {}: {}", unit, e);
            }
            emit(out, &self.formatter.unit_line(&outcome));
            outcomes.push(outcome);
        }

        outcomes
    }
}

fn emit<W: Write>(out: &mut W, line: &str) {
    let _ = writeln!(out, "{line}").and_then(|_| out.flush());
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn write_record(id: u32, total: u32, passed: u32) -> String {
        format!(
            r#"printf '{{"identifier":{id},"display_name":"U{id}","subtest_total":{total},"subtest_passed":{passed},"elapsed_secs":0.1}}' > "$SUITE_ORCH_RESULT_FILE""#
        )
    }

    fn scheduler(dir: &Path) -> GroupedScheduler {
        let units = dir.join("units");
        std::fs::create_dir_all(&units).unwrap();

        let mut config = OrchestratorConfig::default();
        config.paths.unit_dir = units;
        config.paths.results_dir = dir.join("results");
        config.scheduler.stagger_ms = 0;
        config.scheduler.record_grace_ms = 0;
        config.scheduler.stream_foreground = false;
        config.scheduler.unit_timeout_secs = 30;

        let ctx = Arc::new(RunContext::new(config).unwrap());
        GroupedScheduler::new(ctx).with_formatter(ResultFormatter::default().no_color())
    }

    #[tokio::test]
    async fn test_crash_does_not_stop_later_groups() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let units = dir.path().join("units");
        script(&units, "test_30_crash.sh", "kill -SEGV $$");
        script(&units, "test_40_after.sh", &write_record(40, 2, 2));
        script(&units, "test_41_after.sh", &write_record(41, 1, 1));

        let mut out = Vec::new();
        let run = scheduler
            .run(&ScheduleMode::default(), &mut out)
            .await
            .unwrap();

        assert_eq!(run.exit_code, 1);
        let ids: Vec<u32> = run.outcomes.iter().map(|o| o.record.identifier).collect();
        assert_eq!(ids, vec![30, 40, 41]);

        let crashed = &run.outcomes[0];
        assert_eq!(crashed.record.subtest_total, 1);
        assert_eq!(crashed.record.subtest_passed, 0);
        assert!(run.outcomes[1].is_success());
        assert!(run.outcomes[2].is_success());
    }

    #[tokio::test]
    async fn test_every_unit_has_a_record() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let units = dir.path().join("units");
        script(&units, "test_10_a.sh", &write_record(10, 3, 3));
        script(&units, "test_11_b.sh", "exit 0");
        script(&units, "test_12_c.sh", &format!("{}\nexit 0", write_record(12, 4, 3)));

        let run = scheduler
            .run(&ScheduleMode::default(), &mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(run.outcomes.len(), 3);
        assert_eq!(run.outcomes[0].source, RecordSource::Reported);
        assert_eq!(run.outcomes[1].source, RecordSource::Fallback);
        assert!(run.outcomes[1].is_success());
        assert!(!run.outcomes[2].is_success());
        assert_eq!(run.exit_code, 1);
    }

    #[tokio::test]
    async fn test_skip_execution() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let units = dir.path().join("units");
        script(&units, "test_10_never.sh", "exit 9");
        script(&units, "test_20_never.sh", "exit 9");

        let mode = ScheduleMode {
            skip_execution: true,
            ..Default::default()
        };
        let run = scheduler.run(&mode, &mut std::io::sink()).await.unwrap();

        assert!(run.is_success());
        assert!(run
            .outcomes
            .iter()
            .all(|o| o.source == RecordSource::Synthetic));
    }

    #[tokio::test]
    async fn test_unknown_named_unit_counts_as_failure() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let units = dir.path().join("units");
        script(&units, "test_10_ok.sh", "exit 0");

        let mode = ScheduleMode {
            named: vec!["test_10_ok".to_string(), "test_77_ghost".to_string()],
            ..Default::default()
        };
        let mut out = Vec::new();
        let run = scheduler.run(&mode, &mut out).await.unwrap();

        assert_eq!(run.exit_code, 1);
        assert_eq!(run.outcomes.len(), 2);
        assert!(run.outcomes[0].record.display_name.contains("test_77_ghost"));
        assert!(run.outcomes[1].is_success());
        assert!(String::from_utf8(out).unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_plan_named_is_sequential() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let units = dir.path().join("units");
        script(&units, "test_10_a.sh", "exit 0");
        script(&units, "test_11_b.sh", "exit 0");

        let (groups, missing) = scheduler
            .plan(&ScheduleMode {
                named: vec!["10".to_string(), "11".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(missing.is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mode, GroupMode::Sequential);

        let (groups, _) = scheduler.plan(&ScheduleMode::default()).unwrap();
        assert_eq!(groups[0].mode, GroupMode::Parallel);

        let (groups, _) = scheduler
            .plan(&ScheduleMode {
                sequential_groups: BTreeSet::from([1]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(groups[0].mode, GroupMode::Sequential);
    }

    #[tokio::test]
    async fn test_missing_unit_dir_aborts() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        std::fs::remove_dir(dir.path().join("units")).unwrap();

        let result = scheduler
            .run(&ScheduleMode::default(), &mut std::io::sink())
            .await;
        assert!(matches!(result, Err(SchedulerError::UnitDirMissing(_))));
    }
}
