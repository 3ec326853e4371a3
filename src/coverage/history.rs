//! Coverage history
//!
//! One append-only CSV per coverage source in the results directory.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::reconcile::{format_percentage, CoverageReport, CoverageTotals};
use super::{CoverageError, SourceKind};

/// One history line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: String,
    pub percentage: String,
    pub covered_lines: usize,
    pub total_lines: usize,
    pub instrumented_files: usize,
    pub covered_files: usize,
}

impl HistoryRow {
    pub fn new(timestamp: impl Into<String>, totals: &CoverageTotals) -> Self {
        Self {
            timestamp: timestamp.into(),
            percentage: format_percentage(totals.percentage()),
            covered_lines: totals.covered_lines,
            total_lines: totals.instrumented_lines,
            instrumented_files: totals.instrumented_files,
            covered_files: totals.covered_files,
        }
    }
}

pub struct CoverageHistory {
    dir: PathBuf,
}

impl CoverageHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `coverage_history_<kind>.csv`
    pub fn path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("coverage_history_{kind}.csv"))
    }

    pub fn append(&self, kind: &str, row: &HistoryRow) -> Result<(), CoverageError> {
        let path = self.path(kind);
        let io_err = |source| CoverageError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush().map_err(io_err)?;

        debug!("Appended coverage history to {}", path.display());
        Ok(())
    }

    /// Append a row for each source and for the combined metric
    pub fn record(&self, timestamp: &str, report: &CoverageReport) -> Result<(), CoverageError> {
        for kind in [SourceKind::DirectLinked, SourceKind::FullBinary] {
            self.append(kind.name(), &HistoryRow::new(timestamp, report.totals(kind)))?;
        }
        self.append("combined", &HistoryRow::new(timestamp, &report.combined))
    }

    pub fn read(&self, kind: &str) -> Result<Vec<HistoryRow>, CoverageError> {
        read_rows(&self.path(kind))
    }
}

fn read_rows(path: &Path) -> Result<Vec<HistoryRow>, CoverageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .collect::<Result<Vec<HistoryRow>, csv::Error>>()
        .map_err(CoverageError::from)
}
