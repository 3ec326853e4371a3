//! Configuration module
//!
//! Handles loading and managing orchestrator configuration.

#![allow(dead_code)]

mod env;
mod file;

pub use env::{
    env_name, get_env, get_env_parse, print_env_help, EnvBuilder, EnvConfig, EnvGuard, ENV_PREFIX,
};
pub use file::ConfigFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Group scheduling and unit supervision
    pub scheduler: SchedulerConfig,

    /// Filesystem layout
    pub paths: PathsConfig,

    /// Coverage sources and exclusion rules
    pub coverage: CoverageConfig,

    /// Application under test
    pub app: AppConfig,
}

impl OrchestratorConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Apply `SUITE_ORCH_*` overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(dir) = &env.unit_dir {
            self.paths.unit_dir = PathBuf::from(dir);
        }
        if let Some(dir) = &env.results_dir {
            self.paths.results_dir = PathBuf::from(dir);
        }
        if let Some(report) = &env.report {
            self.paths.report_document = Some(PathBuf::from(report));
        }
        if let Some(max) = env.max_parallel {
            self.scheduler.max_parallel = max;
        }
        if let Some(stagger) = env.stagger_ms {
            self.scheduler.stagger_ms = stagger;
        }
        if let Some(timeout) = env.timeout {
            self.scheduler.unit_timeout_secs = timeout;
        }
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between background launches in milliseconds
    pub stagger_ms: u64,

    /// Per-unit timeout in seconds (0 disables)
    pub unit_timeout_secs: u64,

    /// Time between SIGINT and SIGKILL for a timed-out unit
    pub kill_grace_secs: u64,

    /// Maximum simultaneously running background units
    pub max_parallel: usize,

    /// Groups that always run one unit at a time
    pub sequential_groups: BTreeSet<u32>,

    /// File stem of the "run everything" unit, never scheduled
    pub meta_unit: String,

    /// How long to wait for a late result record
    pub record_grace_ms: u64,

    /// Stream the foreground unit live instead of capturing it
    pub stream_foreground: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 250,
            unit_timeout_secs: 600,
            kill_grace_secs: 5,
            max_parallel: default_parallelism(),
            sequential_groups: BTreeSet::new(),
            meta_unit: "test_00_all".to_string(),
            record_grace_ms: 500,
            stream_foreground: true,
        }
    }
}

impl SchedulerConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_secs > 0).then(|| Duration::from_secs(self.unit_timeout_secs))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn record_grace(&self) -> Duration {
        Duration::from_millis(self.record_grace_ms)
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Filesystem layout
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory scanned for `test_<NN>_<name>` executables
    pub unit_dir: PathBuf,

    /// Result records, captures, history and summaries
    pub results_dir: PathBuf,

    /// Markdown document with `Latest Results` / `Individual Results` regions
    pub report_document: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("tests"),
            results_dir: PathBuf::from("tests/results"),
            report_document: None,
        }
    }
}

/// Coverage reconciliation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Artifacts from units linked directly against the sources
    pub direct_dir: PathBuf,

    /// Artifacts from the full instrumented binary
    pub full_dir: PathBuf,

    /// Substrings that mark a source path as third-party
    pub denylist: Vec<String>,

    /// File with one ignore pattern per line (`#` comments)
    pub ignore_file: Option<PathBuf>,

    /// Directory names whose files are always dropped
    pub excluded_dirs: Vec<String>,

    /// Path markers used to normalize source paths (`src/`)
    pub source_markers: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            direct_dir: PathBuf::from("build/coverage/direct"),
            full_dir: PathBuf::from("build/coverage/full"),
            denylist: [
                "/usr/include/",
                "/usr/lib/",
                "unity",
                "mock_",
                "jansson",
                "microhttpd",
                "libwebsockets",
                "_deps/",
                "third_party/",
                "vendor/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignore_file: None,
            excluded_dirs: vec!["tests".to_string(), "examples".to_string()],
            source_markers: vec!["src/".to_string()],
        }
    }
}

/// Application under test
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server binary
    pub binary: PathBuf,

    /// Optional configuration file passed as the first argument
    pub config: Option<PathBuf>,

    /// Where the server's stdout/stderr are redirected
    pub log: PathBuf,

    pub startup_marker: String,
    pub shutdown_marker: String,

    pub startup_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,

    /// Seconds to wait for a core file after SIGUSR1
    pub crash_timeout_secs: u64,

    /// Port checked for lingering listeners after shutdown
    pub port: Option<u16>,

    pub worker_launch_pattern: String,
    pub worker_ready_pattern: String,

    /// Expected number of sub-workers (0 skips the readiness wait)
    pub expected_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("build/hydrogen"),
            config: None,
            log: PathBuf::from("tests/results/app.log"),
            startup_marker: "STARTUP COMPLETE".to_string(),
            shutdown_marker: "SHUTDOWN COMPLETE".to_string(),
            startup_timeout_secs: 15,
            shutdown_timeout_secs: 10,
            crash_timeout_secs: 10,
            port: None,
            worker_launch_pattern: "DQM launched successfully".to_string(),
            worker_ready_pattern: "initialization is complete".to_string(),
            expected_workers: 0,
        }
    }
}
