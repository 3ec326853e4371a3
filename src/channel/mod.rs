//! Result channel
//!
//! Units run as isolated subprocesses, so they hand their results back by
//! writing a record to a location both sides derive from the unit identifier
//! and the run timestamp. The orchestrator only ever reads that record.

#![allow(dead_code)]

mod file;
mod memory;
mod tally;

pub use file::FileChannel;
pub use memory::MemoryChannel;
pub use tally::{SubtestTally, TallyEntry};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{ResultRecord, TestUnit};
use crate::waiter::{Condition, ConditionWaiter, WaitOutcome};

/// Result channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to access result record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode result record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Result store is poisoned")]
    Poisoned,
}

/// Identifies one unit's record within one run.
///
/// Keyed by the unit's file stem, so units sharing an identifier never
/// share a record or capture file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub unit: String,
    pub run_timestamp: String,
}

impl RecordKey {
    pub fn new(unit: impl Into<String>, run_timestamp: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            run_timestamp: run_timestamp.into(),
        }
    }

    pub fn for_unit(unit: &TestUnit, run_timestamp: impl Into<String>) -> Self {
        Self::new(unit.stem(), run_timestamp)
    }

    fn base_name(&self) -> String {
        format!("{}_{}", self.unit, self.run_timestamp)
    }

    /// `test_<NN>_<name>_<timestamp>.json`
    pub fn file_name(&self) -> String {
        format!("{}.json", self.base_name())
    }

    /// `test_<NN>_<name>_<timestamp>.log`, where background output is captured
    pub fn capture_name(&self) -> String {
        format!("{}.log", self.base_name())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())
    }
}

/// Store that carries result records from units to the orchestrator.
///
/// Writes are idempotent with last-write-wins semantics. Reads are tolerant:
/// an absent or malformed record reads as `None`.
pub trait ResultChannel: Send + Sync {
    fn write(&self, key: &RecordKey, record: &ResultRecord) -> Result<(), ChannelError>;

    fn read(&self, key: &RecordKey) -> Result<Option<ResultRecord>, ChannelError>;

    /// Filesystem location of the record, for stores that have one
    fn location(&self, key: &RecordKey) -> Option<PathBuf> {
        let _ = key;
        None
    }
}

/// Read a record, giving a late writer up to `grace` to publish it
pub async fn await_record(
    channel: &dyn ResultChannel,
    key: &RecordKey,
    grace: Duration,
) -> Result<Option<ResultRecord>, ChannelError> {
    if let Some(record) = channel.read(key)? {
        return Ok(Some(record));
    }

    let Some(path) = channel.location(key).filter(|_| !grace.is_zero()) else {
        return Ok(None);
    };

    let waiter = ConditionWaiter::new(grace, Duration::from_millis(50));
    match waiter.wait_for(&Condition::PathExists { path }).await {
        WaitOutcome::Satisfied => channel.read(key),
        outcome => {
            debug!("No record for {} after grace period ({})", key, outcome);
            Ok(None)
        }
    }
}
