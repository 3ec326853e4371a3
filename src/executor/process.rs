//! Unit process supervision
//!
//! Spawns one unit in its own process group and enforces the unit timeout:
//! SIGINT to the group, then SIGKILL once the grace period runs out.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::models::TestUnit;
use crate::utils::signal::{self, Signal};

/// Exit code reported when a unit could not be started
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Where a unit's stdout/stderr go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream live to the orchestrator's terminal
    Inherit,
    /// Both streams into one capture file
    Capture(PathBuf),
}

/// How a unit process ended
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessExit {
    pub code: i32,
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct UnitProcess {
    timeout: Option<Duration>,
    kill_grace: Duration,
}

impl UnitProcess {
    pub fn new(timeout: Option<Duration>, kill_grace: Duration) -> Self {
        Self {
            timeout,
            kill_grace,
        }
    }

    /// Run a unit to completion. Spawn failures come back as exit code 127.
    pub async fn run(
        &self,
        unit: &TestUnit,
        env: &[(String, String)],
        output: &OutputMode,
    ) -> ProcessExit {
        let start = Instant::now();

        let mut child = match self.spawn(unit, env, output) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", unit.path.display(), e);
                if let OutputMode::Capture(path) = output {
                    let _ = std::fs::write(path, format!("failed to start unit: {e}\n"));
                }
                return ProcessExit {
                    code: SPAWN_FAILURE_CODE,
                    timed_out: false,
                    elapsed: start.elapsed(),
                };
            }
        };
        let pid = child.id();
        debug!("Started {} (pid {:?})", unit, pid);

        let mut timed_out = false;
        let status = match self.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    timed_out = true;
                    warn!("{} exceeded {:?}, interrupting", unit, limit);
                    self.interrupt(&mut child, pid).await
                }
            },
            None => child.wait().await,
        };

        let code = match status {
            Ok(status) => signal::exit_code(&status),
            Err(e) => {
                warn!("Failed to wait for {}: {}", unit, e);
                1
            }
        };

        ProcessExit {
            code,
            timed_out,
            elapsed: start.elapsed(),
        }
    }

    fn spawn(
        &self,
        unit: &TestUnit,
        env: &[(String, String)],
        output: &OutputMode,
    ) -> std::io::Result<Child> {
        let mut command = Command::new(&unit.path);
        command
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        match output {
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Capture(path) => {
                let file = File::create(path)?;
                command.stdout(file.try_clone()?).stderr(file);
            }
        }

        command.spawn()
    }

    async fn interrupt(
        &self,
        child: &mut Child,
        pid: Option<u32>,
    ) -> std::io::Result<std::process::ExitStatus> {
        if let Some(pid) = pid {
            if let Err(e) = signal::send_group(pid, Signal::Interrupt) {
                debug!("SIGINT to group {} failed: {}", pid, e);
            }
        }

        if let Ok(status) = timeout(self.kill_grace, child.wait()).await {
            return status;
        }

        warn!("Unit did not stop within {:?}, killing", self.kill_grace);
        match pid.map(|pid| signal::send_group(pid, Signal::Kill)) {
            Some(Ok(())) => {}
            _ => child.start_kill()?,
        }
        child.wait().await
    }
}
