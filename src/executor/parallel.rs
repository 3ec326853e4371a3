//! Parallel group execution
//!
//! Background units are launched first, staggered and admitted against a
//! concurrency cap; the foreground unit then runs with live output. Captured
//! background output is replayed in discovery order once every job is done.

use futures::future::join_all;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::process::OutputMode;
use super::runner::{label_for, UnitRunner};
use crate::context::RunContext;
use crate::models::{ExecutionGroup, RecordSource, ResultRecord, UnitOutcome};

/// Parallel group executor
pub struct ParallelExecutor {
    max_concurrent: usize,
    stagger: Duration,
    stream_foreground: bool,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            stagger: Duration::ZERO,
            stream_foreground: true,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Capture the foreground unit too; it is then replayed first
    pub fn with_stream_foreground(mut self, stream: bool) -> Self {
        self.stream_foreground = stream;
        self
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        let scheduler = &ctx.config.scheduler;
        Self::new(scheduler.max_parallel)
            .with_stagger(scheduler.stagger())
            .with_stream_foreground(scheduler.stream_foreground)
    }

    /// Run one group; outcomes come back in discovery order
    pub async fn run_group<W: Write>(
        &self,
        ctx: &Arc<RunContext>,
        runner: &UnitRunner,
        group: &ExecutionGroup,
        out: &mut W,
    ) -> Vec<UnitOutcome> {
        let Some(foreground) = group.foreground() else {
            return Vec::new();
        };
        let background = group.background();

        info!(
            "Group {}: {} in foreground, {} in background (max {} concurrent)",
            group.group_id,
            foreground,
            background.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(background.len());

        for unit in background {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let runner = runner.clone();
            let unit = unit.clone();
            let capture = ctx.capture_file(&unit);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!("Launching {} in background", unit);
                runner.run(&ctx, &unit, OutputMode::Capture(capture)).await
            }));

            if !self.stagger.is_zero() {
                sleep(self.stagger).await;
            }
        }

        let foreground_output = if self.stream_foreground {
            OutputMode::Inherit
        } else {
            OutputMode::Capture(ctx.capture_file(foreground))
        };
        let mut outcomes = vec![runner.run(ctx, foreground, foreground_output).await];

        for (unit, joined) in background.iter().zip(join_all(handles).await) {
            let outcome = joined.unwrap_or_else(|e| {
                warn!("Background job for {} failed: {}", unit, e);
                UnitOutcome::new(
                    label_for(unit),
                    ResultRecord::fallback(unit, 1, 0.0),
                    RecordSource::Fallback,
                )
            });
            outcomes.push(outcome);
        }

        if let Err(e) = replay_captures(&outcomes, out) {
            warn!("Failed to replay captured output: {}", e);
        }

        outcomes
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Copy each captured output to `out`, in the order given
pub fn replay_captures<W: Write>(outcomes: &[UnitOutcome], out: &mut W) -> io::Result<()> {
    for outcome in outcomes {
        let Some(path) = &outcome.capture else {
            continue;
        };

        writeln!(
            out,
            "──── {} {} (captured) ────",
            outcome.label, outcome.record.display_name
        )?;
        match File::open(path) {
            Ok(mut file) => {
                io::copy(&mut file, out)?;
            }
            Err(e) => writeln!(out, "(capture unavailable: {e})")?,
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_executor_creation() {
        let executor = ParallelExecutor::new(0)
            .with_stagger(Duration::from_millis(5))
            .with_stream_foreground(false);
        assert_eq!(executor.max_concurrent, 1);
        assert_eq!(executor.stagger, Duration::from_millis(5));
        assert!(!executor.stream_foreground);
    }

    #[test]
    fn test_replay_skips_uncaptured() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("b.log");
        std::fs::write(&capture, "from b\n").unwrap();

        let live = UnitOutcome::new("Test 10", ResultRecord::new(10, "A", 1, 1, 0.0), RecordSource::Reported);
        let mut captured =
            UnitOutcome::new("Test 11", ResultRecord::new(11, "B", 1, 1, 0.0), RecordSource::Reported);
        captured.capture = Some(capture);
        let mut missing =
            UnitOutcome::new("Test 12", ResultRecord::new(12, "C", 1, 1, 0.0), RecordSource::Reported);
        missing.capture = Some(PathBuf::from("/nonexistent/c.log"));

        let mut out = Vec::new();
        replay_captures(&[live, captured, missing], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("Test 10"));
        assert!(text.contains("from b"));
        assert!(text.find("Test 11").unwrap() < text.find("Test 12").unwrap());
        assert!(text.contains("capture unavailable"));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use crate::config::OrchestratorConfig;
        use crate::models::{ExecutionGroup, GroupMode, TestUnit};
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, name: &str, body: &str) -> TestUnit {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            TestUnit::from_path(&path).unwrap()
        }

        #[tokio::test]
        async fn test_replay_in_discovery_order() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = OrchestratorConfig::default();
            config.paths.results_dir = dir.path().join("results");
            config.scheduler.record_grace_ms = 0;
            let ctx = Arc::new(RunContext::new(config).unwrap());

            // Finish in reverse order of discovery.
            let units = vec![
                script(dir.path(), "test_20_first.sh", "sleep 0.4; echo first-output"),
                script(dir.path(), "test_21_second.sh", "sleep 0.2; echo second-output"),
                script(dir.path(), "test_22_third.sh", "echo third-output"),
            ];
            let group = ExecutionGroup {
                group_id: 2,
                mode: GroupMode::Parallel,
                units,
            };

            let executor = ParallelExecutor::new(4).with_stream_foreground(false);
            let runner = UnitRunner::from_context(&ctx);
            let mut out = Vec::new();
            let outcomes = executor.run_group(&ctx, &runner, &group, &mut out).await;

            let ids: Vec<u32> = outcomes.iter().map(|o| o.record.identifier).collect();
            assert_eq!(ids, vec![20, 21, 22]);

            let text = String::from_utf8(out).unwrap();
            let first = text.find("first-output").unwrap();
            let second = text.find("second-output").unwrap();
            let third = text.find("third-output").unwrap();
            assert!(first < second && second < third);
        }

        fn context(dir: &Path) -> Arc<RunContext> {
            let mut config = OrchestratorConfig::default();
            config.paths.results_dir = dir.join("results");
            config.scheduler.record_grace_ms = 0;
            Arc::new(RunContext::new(config).unwrap())
        }

        #[tokio::test]
        async fn test_shared_identifier_keeps_separate_captures() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(dir.path());
            let record = |name: &str, passed: u32| {
                format!(
                    r#"printf '{{"identifier":10,"display_name":"{name}","subtest_total":1,"subtest_passed":{passed},"elapsed_secs":0.1}}' > "$SUITE_ORCH_RESULT_FILE""#
                )
            };

            let group = ExecutionGroup {
                group_id: 1,
                mode: GroupMode::Parallel,
                units: vec![
                    script(
                        dir.path(),
                        "test_10_a.sh",
                        &format!("echo output-of-a\n{}", record("A", 1)),
                    ),
                    script(
                        dir.path(),
                        "test_10_z.sh",
                        &format!("sleep 0.2\necho output-of-z\n{}", record("Z", 0)),
                    ),
                ],
            };

            let executor = ParallelExecutor::new(4).with_stream_foreground(false);
            let runner = UnitRunner::from_context(&ctx);
            let mut out = Vec::new();
            let outcomes = executor.run_group(&ctx, &runner, &group, &mut out).await;

            assert_ne!(outcomes[0].capture, outcomes[1].capture);
            assert_eq!(outcomes[0].record.display_name, "A");
            assert_eq!(outcomes[1].record.display_name, "Z");
            assert!(outcomes[0].is_success());
            assert!(!outcomes[1].is_success());

            let text = String::from_utf8(out).unwrap();
            let a = text.find("output-of-a").unwrap();
            let z = text.find("output-of-z").unwrap();
            assert!(a < z);
        }

        #[tokio::test]
        async fn test_cap_of_one_serializes_background_units() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(dir.path());
            let marks = dir.path().join("marks");
            let body = |name: &str| {
                format!(
                    "echo \"start {name}\" >> \"{m}\"\nsleep 0.15\necho \"end {name}\" >> \"{m}\"",
                    m = marks.display()
                )
            };

            let group = ExecutionGroup {
                group_id: 6,
                mode: GroupMode::Parallel,
                units: vec![
                    script(dir.path(), "test_60_fg.sh", "exit 0"),
                    script(dir.path(), "test_61_b.sh", &body("b")),
                    script(dir.path(), "test_62_c.sh", &body("c")),
                    script(dir.path(), "test_63_d.sh", &body("d")),
                ],
            };

            let executor = ParallelExecutor::new(1).with_stream_foreground(false);
            let runner = UnitRunner::from_context(&ctx);
            let outcomes = executor
                .run_group(&ctx, &runner, &group, &mut io::sink())
                .await;
            assert!(outcomes.iter().all(UnitOutcome::is_success));

            let text = std::fs::read_to_string(&marks).unwrap();
            let mut running = 0;
            let mut starts = 0;
            for line in text.lines() {
                if line.starts_with("start") {
                    running += 1;
                    starts += 1;
                } else {
                    running -= 1;
                }
                assert!(running <= 1, "background units overlapped:\n{text}");
            }
            assert_eq!(starts, 3);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_background_launches_are_staggered() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(dir.path());
            let launches = dir.path().join("launches");
            let body = format!("date +%s%N >> \"{}\"", launches.display());

            let group = ExecutionGroup {
                group_id: 7,
                mode: GroupMode::Parallel,
                units: vec![
                    script(dir.path(), "test_70_fg.sh", "exit 0"),
                    script(dir.path(), "test_71_b.sh", &body),
                    script(dir.path(), "test_72_c.sh", &body),
                    script(dir.path(), "test_73_d.sh", &body),
                ],
            };

            let stagger = Duration::from_millis(150);
            let executor = ParallelExecutor::new(4)
                .with_stagger(stagger)
                .with_stream_foreground(false);
            let runner = UnitRunner::from_context(&ctx);
            executor
                .run_group(&ctx, &runner, &group, &mut io::sink())
                .await;

            let mut stamps: Vec<u128> = std::fs::read_to_string(&launches)
                .unwrap()
                .lines()
                .map(|l| l.trim().parse().unwrap())
                .collect();
            stamps.sort_unstable();
            assert_eq!(stamps.len(), 3);

            let min_gap = (stagger - Duration::from_millis(50)).as_nanos();
            for pair in stamps.windows(2) {
                assert!(pair[1] - pair[0] >= min_gap, "launches {:?} closer than {:?}", pair, stagger);
            }
        }

        #[tokio::test]
        async fn test_concurrency_cap_of_one_still_completes() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = OrchestratorConfig::default();
            config.paths.results_dir = dir.path().join("results");
            config.scheduler.record_grace_ms = 0;
            let ctx = Arc::new(RunContext::new(config).unwrap());

            let group = ExecutionGroup {
                group_id: 5,
                mode: GroupMode::Parallel,
                units: vec![
                    script(dir.path(), "test_50_a.sh", "exit 0"),
                    script(dir.path(), "test_51_b.sh", "exit 0"),
                    script(dir.path(), "test_52_c.sh", "exit 2"),
                ],
            };

            let executor = ParallelExecutor::new(1)
                .with_stagger(Duration::from_millis(10))
                .with_stream_foreground(false);
            let runner = UnitRunner::from_context(&ctx);
            let outcomes = executor
                .run_group(&ctx, &runner, &group, &mut io::sink())
                .await;

            assert_eq!(outcomes.len(), 3);
            assert!(outcomes[0].is_success());
            assert!(outcomes[1].is_success());
            assert!(!outcomes[2].is_success());
        }
    }
}
