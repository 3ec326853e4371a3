//! Result record models
//!
//! The record is the contract every unit honors on completion; the outcome
//! wraps it with what the orchestrator observed about the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::unit::TestUnit;

/// Completion report a unit writes through the result channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub identifier: u32,
    pub display_name: String,
    pub subtest_total: u32,
    pub subtest_passed: u32,
    pub elapsed_secs: f64,
    #[serde(default)]
    pub exit_code: i32,
}

impl ResultRecord {
    pub fn new(
        identifier: u32,
        display_name: impl Into<String>,
        subtest_total: u32,
        subtest_passed: u32,
        elapsed_secs: f64,
    ) -> Self {
        let subtest_passed = subtest_passed.min(subtest_total);
        Self {
            identifier,
            display_name: display_name.into(),
            subtest_total,
            subtest_passed,
            elapsed_secs,
            exit_code: if subtest_passed == subtest_total { 0 } else { 1 },
        }
    }

    /// Record synthesized when a unit exited without writing one
    pub fn fallback(unit: &TestUnit, exit_code: i32, elapsed_secs: f64) -> Self {
        Self {
            identifier: unit.identifier,
            display_name: unit.display_name.clone(),
            subtest_total: 1,
            subtest_passed: u32::from(exit_code == 0),
            elapsed_secs,
            exit_code,
        }
    }

    /// Zero-cost record for discovery-only runs
    pub fn synthetic_pass(unit: &TestUnit) -> Self {
        Self {
            identifier: unit.identifier,
            display_name: unit.display_name.clone(),
            subtest_total: 1,
            subtest_passed: 1,
            elapsed_secs: 0.0,
            exit_code: 0,
        }
    }

    /// Record for a named unit that does not exist
    pub fn missing_unit(name: &str) -> Self {
        Self {
            identifier: 0,
            display_name: format!("{name} (not found)"),
            subtest_total: 1,
            subtest_passed: 0,
            elapsed_secs: 0.0,
            exit_code: 1,
        }
    }

    /// Stamp the exit code the parent observed
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn subtest_failed(&self) -> u32 {
        self.subtest_total.saturating_sub(self.subtest_passed)
    }

    pub fn status(&self) -> UnitStatus {
        if self.exit_code == 0 && self.subtest_passed >= self.subtest_total {
            UnitStatus::Pass
        } else {
            UnitStatus::Fail
        }
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }
}

/// Unit pass/fail status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pass,
    Fail,
}

impl UnitStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnitStatus::Pass => "✓",
            UnitStatus::Fail => "✗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Pass)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pass => f.pad("PASS"),
            UnitStatus::Fail => f.pad("FAIL"),
        }
    }
}

/// Where a unit's record came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Written by the unit through the result channel
    Reported,
    /// Synthesized from the exit code
    Fallback,
    /// Produced without executing anything
    Synthetic,
}

/// Everything the orchestrator knows about one unit after its group finished
#[derive(Clone, Debug)]
pub struct UnitOutcome {
    pub label: String,
    pub record: ResultRecord,
    pub source: RecordSource,
    pub timed_out: bool,
    pub capture: Option<PathBuf>,
}

impl UnitOutcome {
    pub fn new(label: impl Into<String>, record: ResultRecord, source: RecordSource) -> Self {
        Self {
            label: label.into(),
            record,
            source,
            timed_out: false,
            capture: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.timed_out && self.record.is_success()
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() {
            UnitStatus::Pass
        } else {
            UnitStatus::Fail
        };
        write!(
            f,
            "{} {} {} [{}/{} passed, {:.3}s]",
            status.symbol(),
            self.label,
            self.record.display_name,
            self.record.subtest_passed,
            self.record.subtest_total,
            self.record.elapsed_secs
        )?;
        if self.timed_out {
            write!(f, " - timed out")?;
        }
        if self.source == RecordSource::Fallback {
            write!(f, " - no result record (exit code {})", self.record.exit_code)?;
        }
        Ok(())
    }
}
