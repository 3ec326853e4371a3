//! Output formatters for run results
//!
//! Colored per-subtest and per-unit lines, group headers, the unit
//! inventory, and the final summary in table, JSON, CSV or brief form.

use std::io::IsTerminal;

use crate::coverage::{CoverageReport, SourceKind};
use crate::models::{ExecutionGroup, GroupMode, RecordSource, UnitOutcome};
use crate::results::{render, RunSummary};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
#[derive(Clone, Debug)]
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Color only when stdout is a terminal and `NO_COLOR` is unset
    pub fn auto_color(mut self) -> Self {
        self.colorize = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn status(&self, passed: bool) -> String {
        if passed {
            self.paint("32", "✓ PASS")
        } else {
            self.paint("31", "✗ FAIL")
        }
    }

    /// Line printed by a unit for each finished subtest
    pub fn subtest_line(&self, passed: bool, name: &str) -> String {
        format!("  {} {}", self.status(passed), name)
    }

    /// One line per finished unit
    pub fn unit_line(&self, outcome: &UnitOutcome) -> String {
        let record = &outcome.record;
        let mut line = format!(
            "{} {} {} [{}/{} passed, {:.3}s]",
            self.status(outcome.is_success()),
            outcome.label,
            record.display_name,
            record.subtest_passed,
            record.subtest_total,
            record.elapsed_secs
        );

        if outcome.timed_out {
            line.push_str(&self.paint("33", " timed out"));
        }
        if outcome.source == RecordSource::Fallback {
            line.push_str(&self.paint(
                "33",
                &format!(" (no result record, exit code {})", record.exit_code),
            ));
        }
        line
    }

    pub fn group_header(&self, group: &ExecutionGroup) -> String {
        let header = format!(
            "── Group {} ({}, {} unit{}) ──",
            group.group_id,
            group.mode,
            group.units.len(),
            if group.units.len() == 1 { "" } else { "s" }
        );
        self.paint("1", &header)
    }

    /// Units grouped by group id, as shown by `list`
    pub fn unit_inventory(&self, groups: &[ExecutionGroup]) -> String {
        let mut output = String::new();
        let total: usize = groups.iter().map(|g| g.units.len()).sum();

        for group in groups {
            output.push_str(&self.group_header(group));
            output.push('\n');
            for (i, unit) in group.units.iter().enumerate() {
                let role = match group.mode {
                    GroupMode::Parallel if i == 0 => "foreground",
                    GroupMode::Parallel => "background",
                    GroupMode::Sequential => "",
                };
                output.push_str(&format!(
                    "  {:02}  {:<32} {:<10} {}\n",
                    unit.identifier,
                    unit.display_name,
                    role,
                    unit.path.display()
                ));
            }
        }

        output.push_str(&format!("\n{} units in {} groups\n", total, groups.len()));
        output
    }

    /// Format the run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => self.format_summary_csv(summary),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::from("\n");
        output.push_str(&render(summary));

        let verdict = if summary.is_success() {
            self.paint("32", "All units passed")
        } else {
            self.paint("31", &format!("{} unit(s) failed", summary.failed_units))
        };
        output.push_str(&verdict);
        output.push('\n');
        output
    }

    fn format_summary_csv(&self, summary: &RunSummary) -> String {
        let mut output = String::new();
        output.push_str("identifier,name,subtest_total,subtest_passed,elapsed_secs,exit_code,status\n");
        for row in &summary.units {
            output.push_str(&format!(
                "{},\"{}\",{},{},{:.3},{},{}\n",
                row.identifier,
                row.display_name.replace('"', "\"\""),
                row.subtest_total,
                row.subtest_passed,
                row.elapsed_secs,
                row.exit_code,
                row.status
            ));
        }
        output
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}/{} units passed, {}/{} subtests ({:.3}%) in {:.3}s",
            summary.passed_units,
            summary.total_units,
            summary.passed_subtests,
            summary.total_subtests,
            summary.pass_rate(),
            summary.wall_clock_secs
        )
    }

    /// Format a coverage report
    pub fn format_coverage(&self, report: &CoverageReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self.format_coverage_csv(report),
            OutputFormat::Summary => format!(
                "direct_linked={} full_binary={} combined={}",
                report.direct.formatted(),
                report.full.formatted(),
                report.combined.formatted()
            ),
            OutputFormat::Table => self.format_coverage_table(report),
        }
    }

    fn format_coverage_table(&self, report: &CoverageReport) -> String {
        let mut output = String::new();
        output.push_str("\n╔═══════════════════╦════════════╦══════════════════╦═══════════════════╗\n");
        output.push_str("║ Source            ║   Coverage ║            Lines ║             Files ║\n");
        output.push_str("╠═══════════════════╬════════════╬══════════════════╬═══════════════════╣\n");

        let rows = [
            (SourceKind::DirectLinked.label(), &report.direct),
            (SourceKind::FullBinary.label(), &report.full),
            ("Combined", &report.combined),
        ];
        for (label, totals) in rows {
            output.push_str(&format!(
                "║ {:<17} ║ {:>9}% ║ {:>16} ║ {:>17} ║\n",
                label,
                totals.formatted(),
                format!("{}/{}", totals.covered_lines, totals.instrumented_lines),
                format!("{}/{}", totals.covered_files, totals.instrumented_files),
            ));
        }

        output.push_str("╚═══════════════════╩════════════╩══════════════════╩═══════════════════╝\n");
        if report.excluded_files > 0 {
            output.push_str(&format!(
                "{} file(s) excluded by denylist or ignore rules\n",
                report.excluded_files
            ));
        }
        output
    }

    fn format_coverage_csv(&self, report: &CoverageReport) -> String {
        let mut output = String::from("file,direct_covered,direct_total,full_covered,full_total,combined_covered,combined_total\n");
        for file in &report.files {
            let direct = file.direct.unwrap_or_default();
            let full = file.full.unwrap_or_default();
            output.push_str(&format!(
                "\"{}\",{},{},{},{},{},{}\n",
                file.path.replace('"', "\"\""),
                direct.covered,
                direct.instrumented,
                full.covered,
                full.instrumented,
                file.combined.covered,
                file.combined.instrumented
            ));
        }
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
