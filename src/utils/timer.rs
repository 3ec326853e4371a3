//! Timer utilities
//!
//! Provides timing and measurement helpers.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    started_at: DateTime<Local>,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            started_at: Local::now(),
            label: label.into(),
        }
    }

    /// Wall-clock time the timer was started
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {:.3}s", self.label, elapsed.as_secs_f64());
        elapsed
    }
}

/// Format a duration the way the summary table prints it (`HH:MM:SS.mmm`)
pub fn format_hms(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
