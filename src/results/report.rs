//! Report rendering and publishing
//!
//! Renders the run summary as a text table and rewrites the results regions
//! of a markdown document in place.

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::aggregate::{RunSummary, UnitRow};
use crate::coverage::format_percentage;
use crate::utils::timer::format_hms;

pub const LATEST_HEADING: &str = "## Latest Results";
pub const INDIVIDUAL_HEADING: &str = "## Individual Results";

const NAME_WIDTH: usize = 32;

/// Render the summary as a box-drawn table
pub fn render(summary: &RunSummary) -> String {
    let mut output = String::new();
    let rule = |l: &str, m: &str, r: &str| {
        format!(
            "{l}{}{m}{}{m}{}{m}{}{m}{}{m}{}{r}\n",
            "═".repeat(9),
            "═".repeat(NAME_WIDTH + 2),
            "═".repeat(10),
            "═".repeat(8),
            "═".repeat(14),
            "═".repeat(8),
        )
    };

    output.push_str(&rule("╔", "╦", "╗"));
    output.push_str(&format!(
        "║ {:<7} ║ {:<w$} ║ {:>8} ║ {:>6} ║ {:>12} ║ {:<6} ║\n",
        "Test",
        "Name",
        "Subtests",
        "Failed",
        "Elapsed",
        "Status",
        w = NAME_WIDTH
    ));
    output.push_str(&rule("╠", "╬", "╣"));

    for row in &summary.units {
        output.push_str(&format!(
            "║ {:<7} ║ {:<w$} ║ {:>8} ║ {:>6} ║ {:>12} ║ {:<6} ║\n",
            short_label(row),
            truncate(&row.display_name, NAME_WIDTH),
            format!("{}/{}", row.subtest_passed, row.subtest_total),
            row.subtest_failed(),
            format_hms(row.elapsed_secs),
            row.status,
            w = NAME_WIDTH
        ));
    }

    output.push_str(&rule("╠", "╬", "╣"));
    output.push_str(&format!(
        "║ {:<7} ║ {:<w$} ║ {:>8} ║ {:>6} ║ {:>12} ║ {:<6} ║\n",
        "Total",
        format!("{} units, {} failed", summary.total_units, summary.failed_units),
        format!("{}/{}", summary.passed_subtests, summary.total_subtests),
        summary.failed_subtests,
        format_hms(summary.cumulative_secs),
        if summary.is_success() { "PASS" } else { "FAIL" },
        w = NAME_WIDTH
    ));
    output.push_str(&rule("╚", "╩", "╝"));

    output.push_str(&format!(
        "Wall clock: {}   Cumulative: {}\n",
        format_hms(summary.wall_clock_secs),
        format_hms(summary.cumulative_secs)
    ));

    if let Some(coverage) = &summary.coverage {
        output.push_str(&format!(
            "Coverage: direct-linked {}%   full binary {}%   combined {}%\n",
            coverage.direct.formatted(),
            coverage.full.formatted(),
            coverage.combined.formatted()
        ));
    }

    output
}

fn short_label(row: &UnitRow) -> String {
    if row.identifier == 0 && row.label != "Test 00" {
        row.label.clone()
    } else {
        format!("{:02}", row.identifier)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|")
}

/// Markdown body of the `Latest Results` region
pub fn latest_results_markdown(summary: &RunSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Test Suite Run: {}\n\n", summary.run_timestamp));
    output.push_str("| Metric | Value |\n| --- | --- |\n");
    output.push_str(&format!("| Units | {} |\n", summary.total_units));
    output.push_str(&format!("| Units passed | {} |\n", summary.passed_units));
    output.push_str(&format!("| Units failed | {} |\n", summary.failed_units));
    output.push_str(&format!("| Subtests | {} |\n", summary.total_subtests));
    output.push_str(&format!("| Subtests passed | {} |\n", summary.passed_subtests));
    output.push_str(&format!("| Subtests failed | {} |\n", summary.failed_subtests));
    output.push_str(&format!(
        "| Elapsed | {} |\n",
        format_hms(summary.wall_clock_secs)
    ));
    output.push_str(&format!(
        "| Cumulative | {} |\n",
        format_hms(summary.cumulative_secs)
    ));

    if let Some(coverage) = &summary.coverage {
        output.push_str(&format!(
            "| Direct-linked coverage | {}% |\n",
            coverage.direct.formatted()
        ));
        output.push_str(&format!(
            "| Full binary coverage | {}% |\n",
            coverage.full.formatted()
        ));
        output.push_str(&format!(
            "| Combined coverage | {}% |\n",
            coverage.combined.formatted()
        ));
    }

    output
}

/// Markdown body of the `Individual Results` region
pub fn individual_results_markdown(summary: &RunSummary) -> String {
    let mut output = String::new();
    output.push_str("| Status | Test | Name | Subtests | Passed | Failed | Elapsed | Pass rate |\n");
    output.push_str("| --- | --- | --- | --- | --- | --- | --- | --- |\n");

    for row in &summary.units {
        let rate = if row.subtest_total == 0 {
            0.0
        } else {
            row.subtest_passed as f64 * 100.0 / row.subtest_total as f64
        };
        output.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {}% |\n",
            if row.status.is_success() { "✅" } else { "❌" },
            short_label(row),
            escape_cell(&row.display_name),
            row.subtest_total,
            row.subtest_passed,
            row.subtest_failed(),
            format_hms(row.elapsed_secs),
            format_percentage(rate)
        ));
    }

    output
}

/// Replace the region from `heading` up to the next top-level section, or
/// append it when the heading is missing.
pub fn replace_section(document: &str, heading: &str, body: &str) -> String {
    let section = format!("{heading}\n\n{}\n", body.trim_end());
    let lines: Vec<&str> = document.split_inclusive('\n').collect();

    let Some(start) = lines.iter().position(|l| l.trim_end() == heading) else {
        let mut output = document.to_string();
        if !output.is_empty() {
            if !output.ends_with('\n') {
                output.push('\n');
            }
            output.push('\n');
        }
        output.push_str(&section);
        return output;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("## ") || l.starts_with("# "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut output: String = lines[..start].concat();
    output.push_str(&section);
    if end < lines.len() {
        output.push('\n');
        output.push_str(&lines[end..].concat());
    }
    output
}

/// Rewrite both results regions of `document`. Returns whether it changed.
pub fn publish(summary: &RunSummary, document: &Path) -> std::io::Result<bool> {
    let original = match fs::read_to_string(document) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let updated = replace_section(&original, LATEST_HEADING, &latest_results_markdown(summary));
    let updated = replace_section(
        &updated,
        INDIVIDUAL_HEADING,
        &individual_results_markdown(summary),
    );

    if updated == original {
        debug!("{} already up to date", document.display());
        return Ok(false);
    }

    fs::write(document, updated)?;
    info!("Updated results in {}", document.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordSource, ResultRecord, TestUnit, UnitOutcome};
    use crate::results::aggregate;
    use std::time::Duration;
    use tempfile::tempdir;

    fn summary() -> RunSummary {
        let crashed = TestUnit::new(30, "Crash | Core", "/u/test_30_crash.sh");
        let outcomes = vec![
            UnitOutcome::new(
                "Test 10",
                ResultRecord::new(10, "Startup", 5, 5, 1.25),
                RecordSource::Reported,
            ),
            UnitOutcome::new(
                "Test 30",
                ResultRecord::fallback(&crashed, 139, 0.5),
                RecordSource::Fallback,
            ),
        ];
        aggregate(&outcomes, Duration::from_secs(2)).with_run("run", "20260101_101010")
    }

    #[test]
    fn test_render_contains_rows_and_totals() {
        let text = render(&summary());
        assert!(text.contains("Startup"));
        assert!(text.contains("0/1"));
        assert!(text.contains("5/6"));
        assert!(text.contains("FAIL"));
        assert!(text.contains("Wall clock: 00:00:02.000"));
    }

    #[test]
    fn test_replace_section_between_headings() {
        let doc = "# Project\n\nIntro\n\n## Latest Results\n\nold stuff\nmore old\n\n## Other\n\nkeep me\n";
        let updated = replace_section(doc, LATEST_HEADING, "new body");
        assert_eq!(
            updated,
            "# Project\n\nIntro\n\n## Latest Results\n\nnew body\n\n## Other\n\nkeep me\n"
        );
    }

    #[test]
    fn test_replace_section_at_end() {
        let doc = "# Project\n\n## Individual Results\n\nold\n";
        let updated = replace_section(doc, INDIVIDUAL_HEADING, "fresh");
        assert_eq!(updated, "# Project\n\n## Individual Results\n\nfresh\n");
    }

    #[test]
    fn test_replace_section_appends_missing() {
        let updated = replace_section("# Project", LATEST_HEADING, "body");
        assert_eq!(updated, "# Project\n\n## Latest Results\n\nbody\n");
        assert_eq!(replace_section("", LATEST_HEADING, "body"), "## Latest Results\n\nbody\n");
    }

    #[test]
    fn test_replace_section_is_idempotent() {
        let doc = "# P\n\n## Latest Results\n\nx\n## Tail\n";
        let once = replace_section(doc, LATEST_HEADING, "body");
        let twice = replace_section(&once, LATEST_HEADING, "body");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_publish_twice_is_byte_identical() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("README.md");
        fs::write(&doc, "# Hydrogen\n\nSome intro.\n\n## Latest Results\n\nstale\n\n## License\n\nMIT\n").unwrap();

        let summary = summary();
        assert!(publish(&summary, &doc).unwrap());
        let first = fs::read(&doc).unwrap();
        assert!(!publish(&summary, &doc).unwrap());
        let second = fs::read(&doc).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.contains("## License\n\nMIT"));
        assert!(text.contains("Crash \\| Core"));
        assert!(!text.contains("stale"));
        assert_eq!(text.matches(INDIVIDUAL_HEADING).count(), 1);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long unit name", 10), "a very ...");
    }
}
