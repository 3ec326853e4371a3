//! Per-run state
//!
//! Everything a run needs is carried explicitly in a [`RunContext`] and
//! threaded through discovery, scheduling and reporting.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::channel::{FileChannel, RecordKey, ResultChannel};
use crate::config::{env_name, OrchestratorConfig};
use crate::executor::SchedulerError;
use crate::models::TestUnit;

/// Timestamp format shared by record, capture and summary file names
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub struct RunContext {
    pub config: OrchestratorConfig,
    pub run_timestamp: String,
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub results_dir: PathBuf,
    pub channel: Arc<dyn ResultChannel>,
}

impl RunContext {
    /// Create the context and its results directory, using the file channel
    pub fn new(config: OrchestratorConfig) -> Result<Self, SchedulerError> {
        let results_dir = config.paths.results_dir.clone();
        fs::create_dir_all(&results_dir).map_err(|source| SchedulerError::ResultsDir {
            path: results_dir.clone(),
            source,
        })?;

        let channel = Arc::new(FileChannel::new(&results_dir));
        Ok(Self::with_channel(config, results_dir, channel))
    }

    pub fn with_channel(
        config: OrchestratorConfig,
        results_dir: impl Into<PathBuf>,
        channel: Arc<dyn ResultChannel>,
    ) -> Self {
        let started_at = Local::now();
        let run_timestamp = started_at.format(RUN_TIMESTAMP_FORMAT).to_string();
        Self {
            config,
            run_id: generate_run_id(&run_timestamp),
            run_timestamp,
            started_at,
            results_dir: results_dir.into(),
            channel,
        }
    }

    pub fn record_key(&self, unit: &TestUnit) -> RecordKey {
        RecordKey::for_unit(unit, &self.run_timestamp)
    }

    /// Where the unit is told to write its record
    pub fn result_file(&self, unit: &TestUnit) -> PathBuf {
        self.results_dir.join(self.record_key(unit).file_name())
    }

    pub fn capture_file(&self, unit: &TestUnit) -> PathBuf {
        self.results_dir.join(self.record_key(unit).capture_name())
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Environment handed to a unit process
    pub fn unit_env(&self, unit: &TestUnit) -> Vec<(String, String)> {
        vec![
            (
                env_name("RESULT_FILE"),
                self.result_file(unit).display().to_string(),
            ),
            (env_name("RUN_TIMESTAMP"), self.run_timestamp.clone()),
            (
                env_name("RESULTS_DIR"),
                self.results_dir.display().to_string(),
            ),
            (env_name("UNIT_ID"), unit.identifier.to_string()),
            (env_name("UNIT_NAME"), unit.display_name.clone()),
        ]
    }
}

/// Timestamp plus a random suffix, so concurrent runs never collide
fn generate_run_id(timestamp: &str) -> String {
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use tempfile::tempdir;

    #[test]
    fn test_context_creates_results_dir() {
        let dir = tempdir().unwrap();
        let mut config = OrchestratorConfig::default();
        config.paths.results_dir = dir.path().join("results");

        let ctx = RunContext::new(config).unwrap();
        assert!(ctx.results_dir().is_dir());
        assert_eq!(ctx.run_timestamp.len(), 15);
        assert!(ctx.run_id.starts_with(&ctx.run_timestamp));
    }

    #[test]
    fn test_unwritable_results_dir() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let mut config = OrchestratorConfig::default();
        config.paths.results_dir = blocker.join("results");
        assert!(matches!(
            RunContext::new(config),
            Err(SchedulerError::ResultsDir { .. })
        ));
    }

    #[test]
    fn test_unit_paths_and_env() {
        let ctx = RunContext::with_channel(
            OrchestratorConfig::default(),
            "/r",
            Arc::new(MemoryChannel::new()),
        );
        let unit = TestUnit::new(7, "Env Check", "/u/test_07_env_check.sh");

        let result_file = ctx.result_file(&unit);
        assert_eq!(
            result_file,
            PathBuf::from(format!("/r/test_07_env_check_{}.json", ctx.run_timestamp))
        );
        assert!(ctx
            .capture_file(&unit)
            .to_string_lossy()
            .ends_with(".log"));

        let sibling = TestUnit::new(7, "Env Other", "/u/test_07_env_other.sh");
        assert_ne!(ctx.result_file(&sibling), result_file);
        assert_ne!(ctx.capture_file(&sibling), ctx.capture_file(&unit));

        let env = ctx.unit_env(&unit);
        assert!(env.contains(&("SUITE_ORCH_UNIT_ID".to_string(), "7".to_string())));
        assert!(env.contains(&(
            "SUITE_ORCH_RESULT_FILE".to_string(),
            result_file.display().to_string()
        )));
    }
}
