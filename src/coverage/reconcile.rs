//! Coverage reconciliation across sources
//!
//! Exclusion rules run first and drop a file from every metric. The combined
//! metric unions line sets per file, so a line two sources both instrument
//! or both cover is counted once.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::parse::{load_source, CoverageMap, FileLines};
use super::{CoverageError, SourceKind};
use crate::config::CoverageConfig;

/// Percentage with the one precision used everywhere
pub fn format_percentage(value: f64) -> String {
    format!("{value:.3}")
}

/// Files and lines that survive the exclusion rules
#[derive(Clone, Debug, Default)]
pub struct ExclusionRules {
    denylist: Vec<String>,
    ignore: Vec<IgnorePattern>,
    excluded_dirs: Vec<String>,
}

#[derive(Clone, Debug)]
enum IgnorePattern {
    Substring(String),
    Glob(Regex),
}

impl ExclusionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build rules from configuration, reading the ignore file if one is set
    pub fn from_config(config: &CoverageConfig) -> Result<Self, CoverageError> {
        let mut rules = Self::new()
            .with_denylist(config.denylist.iter().cloned())
            .with_excluded_dirs(config.excluded_dirs.iter().cloned());

        if let Some(path) = &config.ignore_file {
            match fs::read_to_string(path) {
                Ok(content) => rules = rules.with_ignore_list(&content)?,
                Err(e) => warn!("Ignore list {} not readable: {}", path.display(), e),
            }
        }

        Ok(rules)
    }

    pub fn with_denylist(mut self, entries: impl IntoIterator<Item = String>) -> Self {
        self.denylist
            .extend(entries.into_iter().filter(|e| !e.is_empty()));
        self
    }

    pub fn with_excluded_dirs(mut self, dirs: impl IntoIterator<Item = String>) -> Self {
        self.excluded_dirs.extend(
            dirs.into_iter()
                .map(|d| d.trim_matches('/').to_string())
                .filter(|d| !d.is_empty()),
        );
        self
    }

    /// Add ignore patterns, one per line; `#` starts a comment and `*` is a
    /// wildcard
    pub fn with_ignore_list(mut self, content: &str) -> Result<Self, CoverageError> {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let pattern = if line.contains('*') {
                let escaped = regex::escape(line).replace(r"\*", ".*");
                let regex = Regex::new(&format!("^{escaped}$")).map_err(|source| {
                    CoverageError::Pattern {
                        pattern: line.to_string(),
                        source,
                    }
                })?;
                IgnorePattern::Glob(regex)
            } else {
                IgnorePattern::Substring(line.to_string())
            };
            self.ignore.push(pattern);
        }
        Ok(self)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        if self.denylist.iter().any(|d| path.contains(d.as_str())) {
            return true;
        }

        if self.excluded_dirs.iter().any(|dir| {
            path.starts_with(&format!("{dir}/")) || path.contains(&format!("/{dir}/"))
        }) {
            return true;
        }

        self.ignore.iter().any(|pattern| match pattern {
            IgnorePattern::Substring(s) => path.contains(s.as_str()),
            IgnorePattern::Glob(re) => {
                re.is_match(path)
                    || path
                        .rsplit('/')
                        .next()
                        .map(|name| re.is_match(name))
                        .unwrap_or(false)
            }
        })
    }
}

/// Covered and instrumented line counts for one file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCounts {
    pub covered: usize,
    pub instrumented: usize,
}

impl LineCounts {
    fn of(lines: &FileLines) -> Self {
        Self {
            covered: lines.covered.len(),
            instrumented: lines.instrumented.len(),
        }
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.covered, self.instrumented)
    }
}

fn percentage(covered: usize, instrumented: usize) -> f64 {
    if instrumented == 0 {
        0.0
    } else {
        covered as f64 * 100.0 / instrumented as f64
    }
}

/// Aggregate metrics for one source or for the union
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageTotals {
    pub instrumented_files: usize,
    pub covered_files: usize,
    pub instrumented_lines: usize,
    pub covered_lines: usize,
}

impl CoverageTotals {
    fn add(&mut self, counts: LineCounts) {
        if counts.instrumented == 0 {
            return;
        }
        self.instrumented_files += 1;
        self.instrumented_lines += counts.instrumented;
        self.covered_lines += counts.covered;
        if counts.covered > 0 {
            self.covered_files += 1;
        }
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.covered_lines, self.instrumented_lines)
    }

    pub fn formatted(&self) -> String {
        format_percentage(self.percentage())
    }
}

/// Per-file view of both sources and their union
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBreakdown {
    pub path: String,
    pub direct: Option<LineCounts>,
    pub full: Option<LineCounts>,
    pub combined: LineCounts,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub direct: CoverageTotals,
    pub full: CoverageTotals,
    pub combined: CoverageTotals,
    pub files: Vec<FileBreakdown>,
    /// Files dropped by the exclusion rules
    pub excluded_files: usize,
}

impl CoverageReport {
    pub fn totals(&self, kind: SourceKind) -> &CoverageTotals {
        match kind {
            SourceKind::DirectLinked => &self.direct,
            SourceKind::FullBinary => &self.full,
        }
    }
}

/// Reconcile two coverage maps under `rules`
pub fn reconcile(direct: &CoverageMap, full: &CoverageMap, rules: &ExclusionRules) -> CoverageReport {
    let paths: BTreeSet<&String> = direct.keys().chain(full.keys()).collect();
    let mut report = CoverageReport::default();

    for path in paths {
        if rules.is_excluded(path) {
            debug!("Excluding {} from coverage", path);
            report.excluded_files += 1;
            continue;
        }

        let a = direct.get(path);
        let b = full.get(path);

        let mut union = FileLines::default();
        for lines in [a, b].into_iter().flatten() {
            union.merge(lines);
        }
        if union.is_empty() {
            continue;
        }

        let direct_counts = a.map(LineCounts::of);
        let full_counts = b.map(LineCounts::of);
        let combined = LineCounts::of(&union);

        if let Some(counts) = direct_counts {
            report.direct.add(counts);
        }
        if let Some(counts) = full_counts {
            report.full.add(counts);
        }
        report.combined.add(combined);

        report.files.push(FileBreakdown {
            path: path.clone(),
            direct: direct_counts,
            full: full_counts,
            combined,
        });
    }

    report
}

/// Loads both sources from disk and reconciles them
pub struct CoverageReconciler {
    config: CoverageConfig,
}

impl CoverageReconciler {
    pub fn new(config: CoverageConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<CoverageReport, CoverageError> {
        self.run_dirs(&self.config.direct_dir, &self.config.full_dir)
    }

    pub fn run_dirs(&self, direct_dir: &Path, full_dir: &Path) -> Result<CoverageReport, CoverageError> {
        let rules = ExclusionRules::from_config(&self.config)?;
        let direct = load_source(direct_dir, &self.config.source_markers)?;
        let full = load_source(full_dir, &self.config.source_markers)?;

        let report = reconcile(&direct, &full, &rules);
        info!(
            "Coverage: direct {}%, full {}%, combined {}% ({} files excluded)",
            report.direct.formatted(),
            report.full.formatted(),
            report.combined.formatted(),
            report.excluded_files
        );
        Ok(report)
    }
}

/// Per-source percentages keyed by history name
pub fn percentages(report: &CoverageReport) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        (SourceKind::DirectLinked.name(), report.direct.formatted()),
        (SourceKind::FullBinary.name(), report.full.formatted()),
        ("combined", report.combined.formatted()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(instrumented: std::ops::RangeInclusive<u32>, covered: &[u32]) -> FileLines {
        FileLines {
            instrumented: instrumented.collect(),
            covered: covered.iter().copied().collect(),
        }
    }

    fn map(entries: &[(&str, FileLines)]) -> CoverageMap {
        entries
            .iter()
            .map(|(p, l)| (p.to_string(), l.clone()))
            .collect()
    }

    #[test]
    fn test_overlapping_sources() {
        let direct = map(&[("src/a.c", lines(1..=10, &[1, 2, 3]))]);
        let full = map(&[("src/a.c", lines(1..=10, &[3, 4, 5]))]);

        let report = reconcile(&direct, &full, &ExclusionRules::new());
        assert_eq!(report.combined.covered_lines, 5);
        assert_eq!(report.combined.instrumented_lines, 10);
        assert_eq!(report.combined.formatted(), "50.000");
        assert_eq!(report.direct.formatted(), "30.000");
        assert_eq!(report.full.formatted(), "30.000");
    }

    #[test]
    fn test_combined_never_inflates() {
        let direct = map(&[
            ("src/a.c", lines(1..=10, &[1, 2, 3])),
            ("src/b.c", lines(1..=4, &[1])),
        ]);
        let full = map(&[
            ("src/a.c", lines(1..=12, &[2, 3, 11])),
            ("src/c.c", lines(1..=6, &[])),
        ]);

        let report = reconcile(&direct, &full, &ExclusionRules::new());
        let sum = report.direct.covered_lines + report.full.covered_lines;
        assert!(report.combined.covered_lines <= sum);
        assert_eq!(report.combined.covered_lines, 5);
        assert_eq!(report.combined.instrumented_lines, 12 + 4 + 6);
        assert_eq!(report.combined.instrumented_files, 3);
        assert_eq!(report.combined.covered_files, 2);
    }

    #[test]
    fn test_disjoint_sources_add_up() {
        let direct = map(&[("src/a.c", lines(1..=4, &[1, 2]))]);
        let full = map(&[("src/b.c", lines(1..=4, &[3]))]);

        let report = reconcile(&direct, &full, &ExclusionRules::new());
        assert_eq!(
            report.combined.covered_lines,
            report.direct.covered_lines + report.full.covered_lines
        );
    }

    #[test]
    fn test_absent_source_reports_zero() {
        let direct = map(&[("src/a.c", lines(1..=4, &[1, 2]))]);
        let report = reconcile(&direct, &CoverageMap::new(), &ExclusionRules::new());

        assert_eq!(report.full, CoverageTotals::default());
        assert_eq!(report.full.formatted(), "0.000");
        assert_eq!(report.combined.formatted(), "50.000");
    }

    #[test]
    fn test_exclusions_drop_file_everywhere() {
        let rules = ExclusionRules::new()
            .with_denylist(["unity".to_string()])
            .with_excluded_dirs(["tests".to_string()])
            .with_ignore_list("# generated\nsrc/gen_*.c\nsrc/legacy/ # old code\n")
            .unwrap();

        let direct = map(&[
            ("src/a.c", lines(1..=2, &[1])),
            ("third/unity/unity.c", lines(1..=50, &[1])),
            ("tests/helper.c", lines(1..=5, &[1])),
            ("src/gen_table.c", lines(1..=9, &[1])),
            ("src/legacy/old.c", lines(1..=9, &[1])),
        ]);
        let full = map(&[("third/unity/unity.c", lines(1..=50, &[2]))]);

        let report = reconcile(&direct, &full, &rules);
        assert_eq!(report.excluded_files, 4);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.direct.instrumented_lines, 2);
        assert_eq!(report.full.instrumented_files, 0);
        assert_eq!(report.combined.instrumented_lines, 2);
    }

    #[test]
    fn test_glob_matches_file_name() {
        let rules = ExclusionRules::new().with_ignore_list("mock_*.c").unwrap();
        assert!(rules.is_excluded("src/net/mock_socket.c"));
        assert!(!rules.is_excluded("src/net/socket.c"));
    }

    #[test]
    fn test_empty_report_percentage() {
        let report = reconcile(&CoverageMap::new(), &CoverageMap::new(), &ExclusionRules::new());
        assert_eq!(report.combined.formatted(), "0.000");
        assert!(report.files.is_empty());
    }

    #[test]
    fn test_reconciler_from_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let direct_dir = dir.path().join("direct");
        std::fs::create_dir(&direct_dir).unwrap();
        std::fs::write(
            direct_dir.join("a.info"),
            "SF:/x/src/a.c\nDA:1,1\nDA:2,1\nDA:3,1\nDA:4,0\nDA:5,0\nDA:6,0\nDA:7,0\nDA:8,0\nDA:9,0\nDA:10,0\nend_of_record\n",
        )
        .unwrap();
        let full_dir = dir.path().join("full");
        std::fs::create_dir(&full_dir).unwrap();
        std::fs::write(
            full_dir.join("a.info"),
            "SF:/y/src/a.c\nDA:1,0\nDA:2,0\nDA:3,2\nDA:4,7\nDA:5,1\nDA:6,0\nDA:7,0\nDA:8,0\nDA:9,0\nDA:10,0\nend_of_record\n",
        )
        .unwrap();

        let reconciler = CoverageReconciler::new(CoverageConfig::default());
        let report = reconciler.run_dirs(&direct_dir, &full_dir).unwrap();
        assert_eq!(report.combined.formatted(), "50.000");
        assert_eq!(percentages(&report)["combined"], "50.000");
    }
}
