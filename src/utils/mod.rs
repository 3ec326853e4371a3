//! Shared utilities
//!
//! Timing, logging and signalling helpers used across the orchestrator.

pub mod logger;
pub mod signal;
pub mod timer;

pub use signal::Signal;
pub use timer::Timer;
