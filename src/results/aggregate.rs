//! Run aggregation
//!
//! Folds unit outcomes into run totals.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::coverage::CoverageReport;
use crate::models::{RecordSource, UnitOutcome, UnitStatus};

/// One unit's row in the summary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitRow {
    pub identifier: u32,
    pub label: String,
    pub display_name: String,
    pub subtest_total: u32,
    pub subtest_passed: u32,
    pub elapsed_secs: f64,
    pub exit_code: i32,
    pub status: UnitStatus,
    pub source: RecordSource,
    #[serde(default)]
    pub timed_out: bool,
}

impl UnitRow {
    fn from_outcome(outcome: &UnitOutcome) -> Self {
        let record = &outcome.record;
        Self {
            identifier: record.identifier,
            label: outcome.label.clone(),
            display_name: record.display_name.clone(),
            subtest_total: record.subtest_total,
            subtest_passed: record.subtest_passed,
            elapsed_secs: record.elapsed_secs,
            exit_code: record.exit_code,
            status: if outcome.is_success() {
                UnitStatus::Pass
            } else {
                UnitStatus::Fail
            },
            source: outcome.source,
            timed_out: outcome.timed_out,
        }
    }

    pub fn subtest_failed(&self) -> u32 {
        self.subtest_total.saturating_sub(self.subtest_passed)
    }
}

/// Aggregated totals for a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_timestamp: String,
    pub total_units: usize,
    pub passed_units: usize,
    pub failed_units: usize,
    pub total_subtests: u64,
    pub passed_subtests: u64,
    pub failed_subtests: u64,
    /// Run start to run end
    pub wall_clock_secs: f64,
    /// Sum of unit elapsed times
    pub cumulative_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageReport>,
    pub units: Vec<UnitRow>,
}

impl RunSummary {
    pub fn with_run(mut self, run_id: impl Into<String>, run_timestamp: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self.run_timestamp = run_timestamp.into();
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageReport) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn is_success(&self) -> bool {
        self.failed_units == 0
    }

    /// Subtest pass rate in percent
    pub fn pass_rate(&self) -> f64 {
        if self.total_subtests == 0 {
            0.0
        } else {
            self.passed_subtests as f64 * 100.0 / self.total_subtests as f64
        }
    }
}

/// Fold outcomes into a summary; rows keep the order given
pub fn aggregate(outcomes: &[UnitOutcome], wall_clock: Duration) -> RunSummary {
    let units: Vec<UnitRow> = outcomes.iter().map(UnitRow::from_outcome).collect();

    let passed_units = units
        .iter()
        .filter(|u| u.status == UnitStatus::Pass)
        .count();
    let total_subtests = units.iter().map(|u| u64::from(u.subtest_total)).sum();
    let passed_subtests = units.iter().map(|u| u64::from(u.subtest_passed)).sum();
    let failed_subtests = units.iter().map(|u| u64::from(u.subtest_failed())).sum();
    let cumulative_secs = units.iter().map(|u| u.elapsed_secs).sum();

    RunSummary {
        total_units: units.len(),
        passed_units,
        failed_units: units.len() - passed_units,
        total_subtests,
        passed_subtests,
        failed_subtests,
        wall_clock_secs: wall_clock.as_secs_f64(),
        cumulative_secs,
        units,
        ..Default::default()
    }
}
