//! Results aggregation and reporting module
//!
//! Turns unit outcomes into run totals, renders them, and persists them.

mod aggregate;
mod report;
mod storage;

pub use aggregate::{aggregate, RunSummary, UnitRow};
pub use report::{
    individual_results_markdown, latest_results_markdown, publish, render, replace_section,
    INDIVIDUAL_HEADING, LATEST_HEADING,
};
pub use storage::ResultsStorage;
