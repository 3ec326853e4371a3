//! Test unit and execution group models
//!
//! A unit is one executable test program; units sharing a tens-digit form a group.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix every unit file name carries (`test_<NN>_<name>`)
pub const UNIT_PREFIX: &str = "test_";

/// An executable test program discovered in the unit directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUnit {
    pub identifier: u32,
    pub display_name: String,
    pub path: PathBuf,
}

impl TestUnit {
    pub fn new(identifier: u32, display_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier,
            display_name: display_name.into(),
            path: path.into(),
        }
    }

    /// Build a unit from a file path, if the file name follows the unit convention
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let (identifier, name) = parse_unit_file_name(file_name)?;
        Some(Self::new(identifier, display_name_for(&name), path))
    }

    /// Scheduling bucket: all units sharing a tens-digit run as one batch
    pub fn group_id(&self) -> u32 {
        self.identifier / 10
    }

    /// File stem, e.g. `test_10_startup`
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{UNIT_PREFIX}{:02}", self.identifier))
    }

    /// Whether a name given on the command line refers to this unit.
    ///
    /// Accepts the file name, the stem, the stem without the `test_` prefix,
    /// or the bare identifier.
    pub fn matches_name(&self, name: &str) -> bool {
        let stem = self.stem();
        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        name == stem
            || name == file_name
            || stem.strip_prefix(UNIT_PREFIX) == Some(name)
            || name.parse::<u32>().ok() == Some(self.identifier)
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test {:02}: {}", self.identifier, self.display_name)
    }
}

/// Parse `test_<NN>_<name>[.ext]` into its identifier and name part
pub fn parse_unit_file_name(file_name: &str) -> Option<(u32, String)> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let rest = stem.strip_prefix(UNIT_PREFIX)?;
    let (digits, name) = match rest.split_once('_') {
        Some((digits, name)) => (digits, name),
        None => (rest, ""),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let identifier = digits.parse().ok()?;
    Some((identifier, name.to_string()))
}

fn display_name_for(name: &str) -> String {
    let words: Vec<String> = name
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        "Unnamed".to_string()
    } else {
        words.join(" ")
    }
}

/// How the units of a group are executed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    Sequential,
    Parallel,
}

impl fmt::Display for GroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupMode::Sequential => write!(f, "sequential"),
            GroupMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Units sharing a group id, in discovery order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub group_id: u32,
    pub mode: GroupMode,
    pub units: Vec<TestUnit>,
}

impl ExecutionGroup {
    /// Partition units into groups sorted by ascending group id.
    ///
    /// Single-unit groups, groups in `sequential_groups`, and every group when
    /// `all_sequential` is set run sequentially.
    pub fn partition(
        units: Vec<TestUnit>,
        sequential_groups: &BTreeSet<u32>,
        all_sequential: bool,
    ) -> Vec<ExecutionGroup> {
        let mut buckets: BTreeMap<u32, Vec<TestUnit>> = BTreeMap::new();
        for unit in units {
            buckets.entry(unit.group_id()).or_default().push(unit);
        }

        buckets
            .into_iter()
            .map(|(group_id, units)| {
                let mode = if all_sequential
                    || units.len() <= 1
                    || sequential_groups.contains(&group_id)
                {
                    GroupMode::Sequential
                } else {
                    GroupMode::Parallel
                };
                ExecutionGroup {
                    group_id,
                    mode,
                    units,
                }
            })
            .collect()
    }

    /// First unit by discovery order; streams its output live
    pub fn foreground(&self) -> Option<&TestUnit> {
        self.units.first()
    }

    /// Remaining units; captured and replayed afterwards
    pub fn background(&self) -> &[TestUnit] {
        self.units.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
