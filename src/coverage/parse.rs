//! Coverage artifact parsing
//!
//! Reads gcov text (`*.gcov`) and lcov (`*.info`) artifacts into per-file
//! instrumented/covered line sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::CoverageError;

/// Line sets for one source file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileLines {
    pub instrumented: BTreeSet<u32>,
    pub covered: BTreeSet<u32>,
}

impl FileLines {
    pub fn mark(&mut self, line: u32, hits: u64) {
        self.instrumented.insert(line);
        if hits > 0 {
            self.covered.insert(line);
        }
    }

    /// Union with another artifact for the same file
    pub fn merge(&mut self, other: &FileLines) {
        self.instrumented.extend(other.instrumented.iter().copied());
        self.covered.extend(other.covered.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.instrumented.is_empty()
    }
}

/// Normalized source path to its line sets
pub type CoverageMap = BTreeMap<String, FileLines>;

fn merge_into(map: &mut CoverageMap, path: String, lines: &FileLines) {
    map.entry(path).or_default().merge(lines);
}

/// Parse one gcov text artifact.
///
/// Returns the source path from the `Source:` header (or `fallback_name`)
/// and its line sets.
pub fn parse_gcov(content: &str, fallback_name: &str) -> Result<(String, FileLines), CoverageError> {
    let mut source: Option<String> = None;
    let mut lines = FileLines::default();
    let mut recognized = false;

    for raw in content.lines() {
        let mut parts = raw.splitn(3, ':');
        let (Some(count), Some(lineno), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let Ok(lineno) = lineno.trim().parse::<u32>() else {
            continue;
        };
        recognized = true;

        if lineno == 0 {
            if let Some(path) = text.strip_prefix("Source:") {
                source = Some(path.trim().to_string());
            }
            continue;
        }

        let count = count.trim();
        if count == "-" {
            continue;
        }
        if !count.is_empty() && count.chars().all(|c| matches!(c, '#' | '=' | '%' | '$')) {
            lines.mark(lineno, 0);
            continue;
        }

        let digits = count.trim_end_matches('*');
        match digits.parse::<u64>() {
            Ok(hits) => lines.mark(lineno, hits),
            Err(_) => {
                return Err(CoverageError::Malformed {
                    path: fallback_name.to_string(),
                    reason: format!("bad execution count '{count}' on line {lineno}"),
                })
            }
        }
    }

    if !recognized {
        return Err(CoverageError::Malformed {
            path: fallback_name.to_string(),
            reason: "no gcov line records".to_string(),
        });
    }

    let source = source.unwrap_or_else(|| {
        fallback_name
            .trim_end_matches(".gcov")
            .replace('#', "/")
    });
    Ok((source, lines))
}

/// Parse an lcov tracefile; several records for one file are unioned
pub fn parse_lcov(content: &str) -> Result<CoverageMap, CoverageError> {
    let mut map = CoverageMap::new();
    let mut current: Option<(String, FileLines)> = None;

    for raw in content.lines() {
        let line = raw.trim();

        if let Some(path) = line.strip_prefix("SF:") {
            if let Some((path, lines)) = current.take() {
                merge_into(&mut map, path, &lines);
            }
            current = Some((path.to_string(), FileLines::default()));
        } else if let Some(data) = line.strip_prefix("DA:") {
            let Some((_, lines)) = current.as_mut() else {
                return Err(CoverageError::Malformed {
                    path: "lcov".to_string(),
                    reason: "DA record outside of a source file".to_string(),
                });
            };
            let mut fields = data.split(',');
            let lineno = fields.next().and_then(|f| f.trim().parse::<u32>().ok());
            let hits = fields.next().and_then(|f| f.trim().parse::<u64>().ok());
            match (lineno, hits) {
                (Some(lineno), Some(hits)) if lineno > 0 => lines.mark(lineno, hits),
                _ => {
                    return Err(CoverageError::Malformed {
                        path: "lcov".to_string(),
                        reason: format!("bad line record '{line}'"),
                    })
                }
            }
        } else if line == "end_of_record" {
            if let Some((path, lines)) = current.take() {
                merge_into(&mut map, path, &lines);
            }
        }
    }

    if let Some((path, lines)) = current {
        merge_into(&mut map, path, &lines);
    }

    Ok(map)
}

/// Strip everything before the first source marker (e.g. `src/`).
///
/// Paths without a marker are kept as given, minus a leading `./`.
pub fn normalize_source_path(path: &str, markers: &[String]) -> String {
    let path = path.trim().replace('\\', "/");

    for marker in markers {
        if path.starts_with(marker.as_str()) {
            return path;
        }
        let needle = format!("/{marker}");
        if let Some(pos) = path.find(&needle) {
            return path[pos + 1..].to_string();
        }
    }

    path.trim_start_matches("./").to_string()
}

/// Load every artifact under `dir` into one map.
///
/// A missing directory yields an empty map. Unreadable or malformed
/// artifacts are skipped with a warning.
pub fn load_source(dir: &Path, markers: &[String]) -> Result<CoverageMap, CoverageError> {
    let mut map = CoverageMap::new();
    if !dir.is_dir() {
        warn!("Coverage directory {} not found", dir.display());
        return Ok(map);
    }

    let mut artifacts = 0usize;
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable coverage entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str());
        if !matches!(ext, Some("gcov") | Some("info")) {
            continue;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(source) => {
                warn!(
                    "{}",
                    CoverageError::Io {
                        path: path.to_path_buf(),
                        source
                    }
                );
                continue;
            }
        };

        let parsed = if ext == Some("gcov") {
            let name = entry.file_name().to_string_lossy();
            parse_gcov(&content, &name).map(|(source, lines)| {
                let mut single = CoverageMap::new();
                single.insert(source, lines);
                single
            })
        } else {
            parse_lcov(&content)
        };

        match parsed {
            Ok(parsed) => {
                artifacts += 1;
                for (source, lines) in parsed {
                    merge_into(&mut map, normalize_source_path(&source, markers), &lines);
                }
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    debug!(
        "Loaded {} artifacts covering {} files from {}",
        artifacts,
        map.len(),
        dir.display()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GCOV: &str = "        -:    0:Source:/build/hydrogen/src/api/api_service.c
        -:    0:Graph:api_service.gcno
        -:    1:#include <stdio.h>
        3:    2:int main(void) {
    #####:    3:    unused();
       1*:    4:    partial();
    =====:    5:    throw_path();
        -:    6:}
function main called 3 returned 100%
";

    fn markers() -> Vec<String> {
        vec!["src/".to_string()]
    }

    #[test]
    fn test_parse_gcov() {
        let (source, lines) = parse_gcov(GCOV, "api_service.c.gcov").unwrap();
        assert_eq!(source, "/build/hydrogen/src/api/api_service.c");
        assert_eq!(lines.instrumented, BTreeSet::from([2, 3, 4, 5]));
        assert_eq!(lines.covered, BTreeSet::from([2, 4]));
    }

    #[test]
    fn test_parse_gcov_without_source_header() {
        let content = "        1:    1:x();\n";
        let (source, _) = parse_gcov(content, "src#config#config.c.gcov").unwrap();
        assert_eq!(source, "src/config/config.c");
    }

    #[test]
    fn test_parse_gcov_rejects_garbage() {
        assert!(parse_gcov("not coverage at all", "x.gcov").is_err());
        assert!(parse_gcov("    abc:    3:x", "x.gcov").is_err());
    }

    #[test]
    fn test_parse_lcov_unions_records() {
        let content = "TN:\nSF:/p/src/a.c\nDA:1,1\nDA:2,0\nend_of_record\nSF:/p/src/a.c\nDA:2,4\nDA:3,0\nend_of_record\nSF:/p/src/b.c\nDA:7,0\nend_of_record\n";
        let map = parse_lcov(content).unwrap();

        let a = &map["/p/src/a.c"];
        assert_eq!(a.instrumented, BTreeSet::from([1, 2, 3]));
        assert_eq!(a.covered, BTreeSet::from([1, 2]));
        assert!(map["/p/src/b.c"].covered.is_empty());
    }

    #[test]
    fn test_parse_lcov_malformed() {
        assert!(parse_lcov("DA:1,1\n").is_err());
        assert!(parse_lcov("SF:a.c\nDA:x,1\n").is_err());
    }

    #[test]
    fn test_normalize_source_path() {
        let m = markers();
        assert_eq!(
            normalize_source_path("/home/ci/hydrogen/src/api/api.c", &m),
            "src/api/api.c"
        );
        assert_eq!(normalize_source_path("src/main.c", &m), "src/main.c");
        assert_eq!(normalize_source_path("./lib/x.c", &m), "lib/x.c");
    }

    #[test]
    fn test_load_source_merges_formats() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("api_service.c.gcov"), GCOV).unwrap();
        std::fs::write(
            dir.path().join("nested").join("run.info"),
            "SF:/other/checkout/src/api/api_service.c\nDA:3,2\nDA:9,0\nend_of_record\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.info"), "DA:1,1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let map = load_source(dir.path(), &markers()).unwrap();
        assert_eq!(map.len(), 1);
        let lines = &map["src/api/api_service.c"];
        assert_eq!(lines.instrumented, BTreeSet::from([2, 3, 4, 5, 9]));
        assert_eq!(lines.covered, BTreeSet::from([2, 3, 4]));
    }

    #[test]
    fn test_load_missing_source() {
        let dir = tempdir().unwrap();
        let map = load_source(&dir.path().join("absent"), &markers()).unwrap();
        assert!(map.is_empty());
    }
}
