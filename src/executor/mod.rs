//! Test execution engine
//!
//! Discovers units and runs them group by group, in parallel or sequentially.

#![allow(dead_code)]

mod discovery;
mod parallel;
mod process;
mod runner;
mod scheduler;

pub use discovery::{discover, select_named, Selection};
pub use parallel::{replay_captures, ParallelExecutor};
pub use process::{OutputMode, ProcessExit, UnitProcess};
pub use runner::UnitRunner;
pub use scheduler::{GroupedScheduler, RunOutcome, ScheduleMode};

use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure failures that abort a run
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Unit directory not found: {0}")]
    UnitDirMissing(PathBuf),

    #[error("Failed to scan unit directory {path}: {source}")]
    UnitDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Results directory {path} is not writable: {source}")]
    ResultsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
