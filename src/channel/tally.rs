//! Subtest tally
//!
//! Shell units report each subtest as it finishes; the tally lives next to
//! the unit's result file so `record` can derive totals without counting by
//! hand.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ChannelError;

/// One reported subtest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyEntry {
    pub passed: bool,
    pub name: String,
}

/// Append-only subtest log at `<result file>.tally`
#[derive(Clone, Debug)]
pub struct SubtestTally {
    path: PathBuf,
}

impl SubtestTally {
    pub fn for_result_file(result_file: &Path) -> Self {
        let mut name = result_file.as_os_str().to_os_string();
        name.push(".tally");
        Self {
            path: PathBuf::from(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, passed: bool, name: &str) -> Result<(), ChannelError> {
        let io_err = |source| ChannelError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let status = if passed { "PASS" } else { "FAIL" };
        let name = name.replace(['\n', '\r', '\t'], " ");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{status}\t{name}").map_err(io_err)
    }

    pub fn entries(&self) -> Result<Vec<TallyEntry>, ChannelError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ChannelError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(content
            .lines()
            .filter_map(|line| {
                let (status, name) = line.split_once('\t')?;
                let passed = match status {
                    "PASS" => true,
                    "FAIL" => false,
                    _ => return None,
                };
                Some(TallyEntry {
                    passed,
                    name: name.to_string(),
                })
            })
            .collect())
    }

    /// `(total, passed)`
    pub fn counts(&self) -> Result<(u32, u32), ChannelError> {
        let entries = self.entries()?;
        let passed = entries.iter().filter(|e| e.passed).count();
        Ok((entries.len() as u32, passed as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tally_path() {
        let tally = SubtestTally::for_result_file(Path::new("/r/test_10_ts.json"));
        assert_eq!(tally.path(), Path::new("/r/test_10_ts.json.tally"));
    }

    #[test]
    fn test_tally_counts() {
        let dir = tempdir().unwrap();
        let tally = SubtestTally::for_result_file(&dir.path().join("test_10_ts.json"));
        assert_eq!(tally.counts().unwrap(), (0, 0));

        tally.append(true, "Start server").unwrap();
        tally.append(false, "Check\tport").unwrap();
        tally.append(true, "Stop server").unwrap();

        assert_eq!(tally.counts().unwrap(), (3, 2));
        let entries = tally.entries().unwrap();
        assert_eq!(entries[1].name, "Check port");
        assert!(!entries[1].passed);
    }
}
