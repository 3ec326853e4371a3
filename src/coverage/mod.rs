//! Coverage reconciliation
//!
//! Merges line coverage gathered by two independently instrumented
//! execution paths into per-source and combined metrics without counting a
//! line twice.

#![allow(dead_code)]

mod history;
mod parse;
mod reconcile;

pub use history::{CoverageHistory, HistoryRow};
pub use parse::{load_source, normalize_source_path, parse_gcov, parse_lcov, CoverageMap, FileLines};
pub use reconcile::{
    format_percentage, percentages, reconcile, CoverageReconciler, CoverageReport, CoverageTotals,
    ExclusionRules, FileBreakdown, LineCounts,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coverage artifact errors
#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("Failed to read coverage artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed coverage artifact {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to update coverage history: {0}")]
    History(#[from] csv::Error),
}

/// Which execution path produced a coverage artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Units linked directly against the sources
    DirectLinked,
    /// The full instrumented application binary
    FullBinary,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::DirectLinked => "direct_linked",
            SourceKind::FullBinary => "full_binary",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::DirectLinked => "Direct-linked",
            SourceKind::FullBinary => "Full binary",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
