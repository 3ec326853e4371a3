//! Data models for suite orchestration
//!
//! This module contains all data structures used throughout the application.

mod record;
mod unit;

pub use record::{RecordSource, ResultRecord, UnitOutcome, UnitStatus};
pub use unit::{parse_unit_file_name, ExecutionGroup, GroupMode, TestUnit, UNIT_PREFIX};
