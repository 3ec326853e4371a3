//! Condition waiter
//!
//! Polls a growing log, process liveness, or a path until a condition holds
//! or a deadline passes. Used for startup and shutdown detection, crash
//! artifacts, and asynchronous sub-worker readiness.

mod pattern;
mod scanner;

pub use pattern::{contains, parse_pattern, Contains, LogPattern, Matches};
pub use scanner::LogWatch;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, TryFromFloatSecsError};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Something worth waiting for
#[derive(Clone, Debug)]
pub enum Condition {
    /// Log holds at least `count` lines matching `pattern`
    LogContains {
        log: PathBuf,
        pattern: Arc<dyn LogPattern>,
        count: usize,
    },
    /// Process no longer exists
    ProcessGone { pid: u32 },
    /// Path has appeared (e.g. a core file)
    PathExists { path: PathBuf },
}

impl Condition {
    pub fn log_contains(log: impl Into<PathBuf>, pattern: Arc<dyn LogPattern>) -> Self {
        Condition::LogContains {
            log: log.into(),
            pattern,
            count: 1,
        }
    }

    pub fn log_count(log: impl Into<PathBuf>, pattern: Arc<dyn LogPattern>, count: usize) -> Self {
        Condition::LogContains {
            log: log.into(),
            pattern,
            count,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::LogContains {
                log,
                pattern,
                count,
            } => write!(
                f,
                "{} x{} in {}",
                pattern.describe(),
                count,
                log.display()
            ),
            Condition::ProcessGone { pid } => write!(f, "process {pid} to exit"),
            Condition::PathExists { path } => write!(f, "{} to appear", path.display()),
        }
    }
}

/// How a wait ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
    /// The watched process died before the condition held
    ProcessExited,
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }

    /// Exit code used by the `wait` command
    pub fn exit_code(&self) -> u8 {
        match self {
            WaitOutcome::Satisfied => 0,
            WaitOutcome::TimedOut => 1,
            WaitOutcome::ProcessExited => 2,
        }
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitOutcome::Satisfied => write!(f, "satisfied"),
            WaitOutcome::TimedOut => write!(f, "timed out"),
            WaitOutcome::ProcessExited => write!(f, "process exited"),
        }
    }
}

/// Result of waiting for asynchronous sub-workers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerReadiness {
    pub launched: usize,
    pub completed: usize,
    pub outcome: WaitOutcome,
}

/// Deadline-bounded poller
#[derive(Clone, Debug)]
pub struct ConditionWaiter {
    timeout: Duration,
    poll_interval: Duration,
    watch_pid: Option<u32>,
}

impl ConditionWaiter {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            watch_pid: None,
        }
    }

    /// Fails on negative, non-finite, or overflowing values
    pub fn from_secs(timeout_secs: f64, poll_secs: f64) -> Result<Self, TryFromFloatSecsError> {
        Ok(Self::new(
            Duration::try_from_secs_f64(timeout_secs)?,
            Duration::try_from_secs_f64(poll_secs)?,
        ))
    }

    /// Report `ProcessExited` if `pid` dies before a log condition holds
    pub fn watching(mut self, pid: u32) -> Self {
        self.watch_pid = Some(pid);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a single condition
    pub async fn wait_for(&self, condition: &Condition) -> WaitOutcome {
        debug!("Waiting up to {:?} for {}", self.timeout, condition);

        let outcome = match condition {
            Condition::LogContains {
                log,
                pattern,
                count,
            } => {
                let mut watch = LogWatch::new(log, vec![pattern.clone()]);
                let target = *count;
                // An unterminated last line counts as soon as it matches.
                self.poll_until(|_| {
                    if let Err(e) = watch.refresh() {
                        debug!("Failed to read {}: {}", watch.path().display(), e);
                    }
                    watch.count_with_partial(0) >= target
                })
                .await
            }
            Condition::ProcessGone { pid } => {
                let pid = *pid;
                self.poll_until(|_| !pid_alive(pid)).await
            }
            Condition::PathExists { path } => self.poll_until(|_| path.exists()).await,
        };

        debug!("Wait for {} ended: {}", condition, outcome);
        outcome
    }

    /// Wait until `expected` launch messages appear, then until the
    /// completion count catches up with the launch count.
    ///
    /// Both phases share one deadline.
    pub async fn wait_for_workers(
        &self,
        log: impl Into<PathBuf>,
        launch: Arc<dyn LogPattern>,
        complete: Arc<dyn LogPattern>,
        expected: usize,
    ) -> WorkerReadiness {
        let mut watch = LogWatch::new(log, vec![launch, complete]);
        let deadline = Instant::now() + self.timeout;

        let launched_phase = self
            .poll_until_deadline(deadline, |_| {
                let _ = watch.refresh();
                watch.count(0) >= expected
            })
            .await;

        if !launched_phase.is_satisfied() {
            return WorkerReadiness {
                launched: watch.count(0),
                completed: watch.count(1),
                outcome: launched_phase,
            };
        }

        let outcome = self
            .poll_until_deadline(deadline, |last_chance| {
                let _ = watch.refresh();
                let completed = if last_chance {
                    watch.count_with_partial(1)
                } else {
                    watch.count(1)
                };
                completed >= watch.count(0)
            })
            .await;

        WorkerReadiness {
            launched: watch.count(0),
            completed: watch.count(1),
            outcome,
        }
    }

    async fn poll_until<F>(&self, check: F) -> WaitOutcome
    where
        F: FnMut(bool) -> bool,
    {
        self.poll_until_deadline(Instant::now() + self.timeout, check)
            .await
    }

    /// `check(last_chance)` is called once per poll; `last_chance` is set on
    /// the final re-check after a timeout or after the watched process died.
    async fn poll_until_deadline<F>(&self, deadline: Instant, mut check: F) -> WaitOutcome
    where
        F: FnMut(bool) -> bool,
    {
        loop {
            if check(false) {
                return WaitOutcome::Satisfied;
            }

            if let Some(pid) = self.watch_pid {
                if !pid_alive(pid) {
                    return if check(true) {
                        WaitOutcome::Satisfied
                    } else {
                        WaitOutcome::ProcessExited
                    };
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return if check(true) {
                    WaitOutcome::Satisfied
                } else {
                    WaitOutcome::TimedOut
                };
            }

            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl Default for ConditionWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_millis(100))
    }
}

/// Whether a process exists and has not yet exited.
///
/// Zombies count as exited.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // SAFETY: signal 0 only performs permission and existence checks.
    let rc = unsafe { libc::kill(raw, 0) };
    let exists =
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);

    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn fast(timeout_ms: u64) -> ConditionWaiter {
        ConditionWaiter::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_log_already_satisfied() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "boot\nSTARTUP COMPLETE\n");

        let condition = Condition::log_contains(&log, contains("STARTUP COMPLETE"));
        assert_eq!(fast(200).wait_for(&condition).await, WaitOutcome::Satisfied);
    }

    #[tokio::test]
    async fn test_log_times_out() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "boot\n");

        let condition = Condition::log_contains(&log, contains("STARTUP COMPLETE"));
        let started = std::time::Instant::now();
        assert_eq!(fast(100).wait_for(&condition).await, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_log_appears_while_waiting() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        let writer_log = log.clone();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            append(&writer_log, "SHUTDOWN COMPLETE\n");
        });

        let condition = Condition::log_contains(&log, contains("SHUTDOWN COMPLETE"));
        let outcome = fast(2000).wait_for(&condition).await;
        writer.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[tokio::test]
    async fn test_unterminated_marker_satisfies_early() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "boot\nSTARTUP COMPLETE");

        let condition = Condition::log_contains(&log, contains("STARTUP COMPLETE"));
        let started = std::time::Instant::now();
        assert_eq!(fast(5000).wait_for(&condition).await, WaitOutcome::Satisfied);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_completed_partial_line_counts_once() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "hit\nhi");

        let two = Condition::log_count(&log, contains("hit"), 2);
        assert_eq!(fast(50).wait_for(&two).await, WaitOutcome::TimedOut);

        append(&log, "t");
        assert_eq!(fast(50).wait_for(&two).await, WaitOutcome::Satisfied);

        append(&log, "\n");
        let three = Condition::log_count(&log, contains("hit"), 3);
        assert_eq!(fast(50).wait_for(&three).await, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_from_secs_rejects_invalid_durations() {
        assert!(ConditionWaiter::from_secs(1.5, 0.1).is_ok());
        assert!(ConditionWaiter::from_secs(f64::NAN, 0.1).is_err());
        assert!(ConditionWaiter::from_secs(f64::INFINITY, 0.1).is_err());
        assert!(ConditionWaiter::from_secs(1e30, 0.1).is_err());
        assert!(ConditionWaiter::from_secs(-1.0, 0.1).is_err());
        assert!(ConditionWaiter::from_secs(1.0, f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_log_count() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "hit\nmiss\nhit\n");

        let two = Condition::log_count(&log, contains("hit"), 2);
        let three = Condition::log_count(&log, contains("hit"), 3);
        assert_eq!(fast(100).wait_for(&two).await, WaitOutcome::Satisfied);
        assert_eq!(fast(50).wait_for(&three).await, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_path_exists_blocking() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("hydrogen.core.1234");
        std::fs::write(&core, b"core").unwrap();

        let condition = Condition::PathExists { path: core };
        let outcome = tokio_test::block_on(fast(100).wait_for(&condition));
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_gone() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 0.1"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        assert!(pid_alive(pid));

        let outcome = fast(3000)
            .wait_for(&Condition::ProcessGone { pid })
            .await;
        assert_eq!(outcome, WaitOutcome::Satisfied);
        child.wait().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_without_marker() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "starting\n");

        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 0.1"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let condition = Condition::log_contains(&log, contains("SHUTDOWN COMPLETE"));
        let outcome = fast(3000).watching(pid).wait_for(&condition).await;
        assert_eq!(outcome, WaitOutcome::ProcessExited);
        child.wait().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_after_marker_is_satisfied() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");

        let script = format!("printf 'SHUTDOWN COMPLETE' >> '{}'", log.display());
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", &script])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let condition = Condition::log_contains(&log, contains("SHUTDOWN COMPLETE"));
        let outcome = fast(3000).watching(pid).wait_for(&condition).await;
        assert_eq!(outcome, WaitOutcome::Satisfied);
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_ready() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(
            &log,
            "DQM launched\nDQM launched\nDQM ready\nDQM ready\n",
        );

        let readiness = fast(200)
            .wait_for_workers(&log, contains("DQM launched"), contains("DQM ready"), 2)
            .await;
        assert_eq!(readiness.outcome, WaitOutcome::Satisfied);
        assert_eq!(readiness.launched, 2);
        assert_eq!(readiness.completed, 2);
    }

    #[tokio::test]
    async fn test_workers_partial_initialization() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "DQM launched\nDQM launched\nDQM launched\nDQM ready\n");

        let readiness = fast(100)
            .wait_for_workers(&log, contains("DQM launched"), contains("DQM ready"), 2)
            .await;
        assert_eq!(readiness.outcome, WaitOutcome::TimedOut);
        assert_eq!(readiness.launched, 3);
        assert_eq!(readiness.completed, 1);
    }

    #[tokio::test]
    async fn test_workers_never_launched() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "DQM launched\n");

        let readiness = fast(50)
            .wait_for_workers(&log, contains("DQM launched"), contains("DQM ready"), 2)
            .await;
        assert_eq!(readiness.outcome, WaitOutcome::TimedOut);
        assert_eq!(readiness.launched, 1);
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(WaitOutcome::Satisfied.exit_code(), 0);
        assert_eq!(WaitOutcome::TimedOut.exit_code(), 1);
        assert_eq!(WaitOutcome::ProcessExited.exit_code(), 2);
    }
}
