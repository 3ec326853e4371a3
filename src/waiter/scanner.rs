//! Incremental log scanning
//!
//! Reads only what was appended since the last poll and keeps running match
//! counts per pattern.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::pattern::LogPattern;

/// Tracks a growing log file and counts pattern hits over complete lines
#[derive(Debug)]
pub struct LogWatch {
    path: PathBuf,
    offset: u64,
    partial: String,
    patterns: Vec<Arc<dyn LogPattern>>,
    counts: Vec<usize>,
}

impl LogWatch {
    pub fn new(path: impl Into<PathBuf>, patterns: Vec<Arc<dyn LogPattern>>) -> Self {
        let counts = vec![0; patterns.len()];
        Self {
            path: path.into(),
            offset: 0,
            partial: String::new(),
            patterns,
            counts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume newly appended data. A missing file reads as empty.
    pub fn refresh(&mut self) -> io::Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // Log was truncated or rotated; start over.
            self.offset = 0;
            self.partial.clear();
            self.counts.iter_mut().for_each(|c| *c = 0);
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;

        self.partial.push_str(&String::from_utf8_lossy(&buf));
        if let Some(last_newline) = self.partial.rfind('\n') {
            let complete: String = self.partial.drain(..=last_newline).collect();
            for line in complete.lines() {
                self.count_line(line);
            }
        }
        Ok(())
    }

    fn count_line(&mut self, line: &str) {
        for (pattern, count) in self.patterns.iter().zip(self.counts.iter_mut()) {
            if pattern.matches(line) {
                *count += 1;
            }
        }
    }

    /// Hits for pattern `index` over complete lines
    pub fn count(&self, index: usize) -> usize {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Hits including an unterminated trailing line
    pub fn count_with_partial(&self, index: usize) -> usize {
        let trailing = self
            .patterns
            .get(index)
            .map(|p| !self.partial.is_empty() && p.matches(&self.partial))
            .unwrap_or(false);
        self.count(index) + usize::from(trailing)
    }
}
