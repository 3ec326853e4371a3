//! Output formatting module
//!
//! Terminal rendering of unit progress, run summaries and coverage.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
