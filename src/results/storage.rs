//! Results storage
//!
//! Persists run summaries in the results directory.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

use super::aggregate::RunSummary;
use super::report::render;

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `summary_<timestamp>.txt`
    pub fn summary_path(&self, run_timestamp: &str) -> PathBuf {
        self.base_dir.join(format!("summary_{run_timestamp}.txt"))
    }

    /// `summary_<timestamp>.json`
    pub fn summary_json_path(&self, run_timestamp: &str) -> PathBuf {
        self.base_dir.join(format!("summary_{run_timestamp}.json"))
    }

    /// Save the rendered table and the machine-readable summary
    pub fn save(&self, summary: &RunSummary) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results directory: {}", self.base_dir.display())
        })?;

        let text_path = self.summary_path(&summary.run_timestamp);
        fs::write(&text_path, render(summary))
            .with_context(|| format!("Failed to write {}", text_path.display()))?;

        let json_path = self.summary_json_path(&summary.run_timestamp);
        let file = File::create(&json_path).context("Failed to create summary file")?;
        serde_json::to_writer_pretty(BufWriter::new(file), summary)
            .context("Failed to write summary")?;

        info!("Saved run summary to {}", text_path.display());
        Ok(text_path)
    }
}
