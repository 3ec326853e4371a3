//! Application lifecycle helper
//!
//! Drives one instance of the application under test through its
//! collaborator contract: launch with the log captured, wait for the startup
//! marker, shut down with SIGINT and confirm the shutdown marker, or fault it
//! with SIGUSR1 and wait for the core file.

use std::fs::{self, File};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::utils::signal::{self, Signal};
use crate::waiter::{contains, Condition, ConditionWaiter, WaitOutcome, WorkerReadiness};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to open application log {path}: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("Application exited before reporting a pid")]
    NoPid,
}

/// What happened during a graceful shutdown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub marker: WaitOutcome,
    pub exit_code: Option<i32>,
    /// Had to be killed after the shutdown timeout
    pub killed: bool,
    /// `Some(true)` when the configured port was still bound afterwards
    pub port_lingering: Option<bool>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.marker.is_satisfied() && !self.killed && self.exit_code == Some(0)
    }
}

/// What happened after a deliberate fault
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashReport {
    pub core_file: PathBuf,
    pub core_outcome: WaitOutcome,
    pub exit_code: Option<i32>,
}

/// Core file name the application writes on a deliberate fault
pub fn core_file_path(binary: &Path, pid: u32) -> PathBuf {
    let mut name = binary.as_os_str().to_os_string();
    name.push(format!(".core.{pid}"));
    PathBuf::from(name)
}

/// Whether something is still listening on `port` on the loopback interface
pub fn port_in_use(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(_) => false,
        Err(e) => e.kind() == std::io::ErrorKind::AddrInUse,
    }
}

/// A running application instance
pub struct AppInstance {
    config: AppConfig,
    child: Child,
    pid: u32,
}

impl AppInstance {
    /// Start the binary with stdout and stderr appended to the configured log
    pub fn launch(config: &AppConfig) -> Result<Self, LifecycleError> {
        let log_error = |source| LifecycleError::Log {
            path: config.log.clone(),
            source,
        };

        if let Some(parent) = config.log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(log_error)?;
        }
        let log = File::create(&config.log).map_err(log_error)?;
        let log_err = log.try_clone().map_err(log_error)?;

        let mut command = Command::new(&config.binary);
        if let Some(app_config) = &config.config {
            command.arg(app_config);
        }
        command
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| LifecycleError::Spawn {
            binary: config.binary.clone(),
            source,
        })?;
        let pid = child.id().ok_or(LifecycleError::NoPid)?;

        info!("Launched {} (pid {})", config.binary.display(), pid);

        Ok(Self {
            config: config.clone(),
            child,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn log(&self) -> &Path {
        &self.config.log
    }

    fn waiter(&self, secs: u64) -> ConditionWaiter {
        ConditionWaiter::new(Duration::from_secs(secs), POLL_INTERVAL).watching(self.pid)
    }

    /// Wait for the startup marker; `ProcessExited` means the app died first
    pub async fn wait_startup(&self) -> WaitOutcome {
        let condition = Condition::log_contains(&self.config.log, contains(&self.config.startup_marker));
        let outcome = self
            .waiter(self.config.startup_timeout_secs)
            .wait_for(&condition)
            .await;

        match outcome {
            WaitOutcome::Satisfied => info!("Startup complete (pid {})", self.pid),
            other => warn!("Startup not observed for pid {}: {}", self.pid, other),
        }
        outcome
    }

    /// Count sub-worker launches against the expected number, then wait for
    /// as many readiness messages. `None` when no workers are expected.
    pub async fn wait_workers(&self) -> Option<WorkerReadiness> {
        if self.config.expected_workers == 0 {
            return None;
        }

        let readiness = self
            .waiter(self.config.startup_timeout_secs)
            .wait_for_workers(
                &self.config.log,
                contains(&self.config.worker_launch_pattern),
                contains(&self.config.worker_ready_pattern),
                self.config.expected_workers,
            )
            .await;

        debug!(
            "Workers launched {}, ready {}: {}",
            readiness.launched, readiness.completed, readiness.outcome
        );
        Some(readiness)
    }

    /// SIGINT, wait for the shutdown marker and the exit, then check the port
    pub async fn shutdown(mut self) -> ShutdownReport {
        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);

        if let Err(e) = signal::send(self.pid, Signal::Interrupt) {
            warn!("Failed to send SIGINT to {}: {}", self.pid, e);
        }

        let condition = Condition::log_contains(&self.config.log, contains(&self.config.shutdown_marker));
        let marker = self
            .waiter(self.config.shutdown_timeout_secs)
            .wait_for(&condition)
            .await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let (exit_code, killed) = match timeout(remaining, self.child.wait()).await {
            Ok(Ok(status)) => (Some(signal::exit_code(&status)), false),
            Ok(Err(e)) => {
                warn!("Failed to wait for pid {}: {}", self.pid, e);
                (None, false)
            }
            Err(_) => {
                warn!(
                    "Application (pid {}) still running after {}s, killing",
                    self.pid, self.config.shutdown_timeout_secs
                );
                (self.kill().await, true)
            }
        };

        let port_lingering = self.config.port.map(|port| {
            let lingering = port_in_use(port);
            if lingering {
                warn!("Port {} is still bound after shutdown", port);
            }
            lingering
        });

        ShutdownReport {
            marker,
            exit_code,
            killed,
            port_lingering,
        }
    }

    /// SIGUSR1, then wait for `<binary>.core.<pid>` and the exit
    pub async fn crash(mut self) -> CrashReport {
        let core_file = core_file_path(&self.config.binary, self.pid);

        if let Err(e) = signal::send(self.pid, Signal::User1) {
            warn!("Failed to send SIGUSR1 to {}: {}", self.pid, e);
        }

        let core_outcome = ConditionWaiter::new(
            Duration::from_secs(self.config.crash_timeout_secs),
            POLL_INTERVAL,
        )
        .wait_for(&Condition::PathExists {
            path: core_file.clone(),
        })
        .await;

        if !core_outcome.is_satisfied() {
            warn!("No core file at {}", core_file.display());
        }

        let exit_code = match timeout(Duration::from_secs(self.config.crash_timeout_secs), self.child.wait()).await {
            Ok(Ok(status)) => Some(signal::exit_code(&status)),
            _ => self.kill().await,
        };

        CrashReport {
            core_file,
            core_outcome,
            exit_code,
        }
    }

    async fn kill(&mut self) -> Option<i32> {
        if signal::send_group(self.pid, Signal::Kill).is_err() {
            let _ = self.child.start_kill();
        }
        self.child
            .wait()
            .await
            .ok()
            .map(|status| signal::exit_code(&status))
    }
}
