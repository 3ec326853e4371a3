//! Filesystem result store

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ChannelError, RecordKey, ResultChannel};
use crate::models::ResultRecord;

/// One JSON file per record in a results directory
#[derive(Clone, Debug)]
pub struct FileChannel {
    dir: PathBuf,
}

impl FileChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Write a record straight to `path`, as units do with their result file
    pub fn write_to(path: &Path, record: &ResultRecord) -> Result<(), ChannelError> {
        let io_err = |source| ChannelError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let body = serde_json::to_vec_pretty(record)?;

        // Readers must never observe a half-written record.
        let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&body).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("Wrote result record {}", path.display());
        Ok(())
    }

    /// Read a record from `path`; malformed content reads as missing
    pub fn read_from(path: &Path) -> Result<Option<ResultRecord>, ChannelError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ChannelError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring malformed result record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

impl ResultChannel for FileChannel {
    fn write(&self, key: &RecordKey, record: &ResultRecord) -> Result<(), ChannelError> {
        Self::write_to(&self.path_for(key), record)
    }

    fn read(&self, key: &RecordKey) -> Result<Option<ResultRecord>, ChannelError> {
        Self::read_from(&self.path_for(key))
    }

    fn location(&self, key: &RecordKey) -> Option<PathBuf> {
        Some(self.path_for(key))
    }
}
