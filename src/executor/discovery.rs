//! Unit discovery
//!
//! Scans the unit directory for `test_<NN>_<name>[.ext]` executables.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::SchedulerError;
use crate::models::TestUnit;

/// Discover units ordered by identifier then file name, skipping `meta_unit`
pub fn discover(dir: &Path, meta_unit: &str) -> Result<Vec<TestUnit>, SchedulerError> {
    if !dir.is_dir() {
        return Err(SchedulerError::UnitDirMissing(dir.to_path_buf()));
    }

    let mut units = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| SchedulerError::UnitDirUnreadable {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;

        let path = entry.path();
        let Some(unit) = TestUnit::from_path(path) else {
            continue;
        };

        if unit.stem() == meta_unit {
            debug!("Skipping meta unit {}", path.display());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_executable(path) {
            warn!("Skipping {}: not executable", path.display());
            continue;
        }

        units.push(unit);
    }

    units.sort_by(|a, b| {
        a.identifier
            .cmp(&b.identifier)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });

    debug!("Discovered {} units in {}", units.len(), dir.display());
    Ok(units)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Units picked by name from the command line
#[derive(Clone, Debug, Default)]
pub struct Selection {
    /// Found units, in command-line order
    pub units: Vec<TestUnit>,
    /// Names that matched nothing
    pub unknown: Vec<String>,
}

/// Resolve command-line names against discovered units
pub fn select_named(discovered: &[TestUnit], names: &[String]) -> Selection {
    let mut selection = Selection::default();
    for name in names {
        match discovered.iter().find(|u| u.matches_name(name)) {
            Some(unit) if !selection.units.contains(unit) => selection.units.push(unit.clone()),
            Some(_) => {}
            None => selection.unknown.push(name.clone()),
        }
    }
    selection
}
