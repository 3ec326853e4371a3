//! Log line predicates
//!
//! Matching is kept behind a small trait so it can be tested without a process.

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Predicate over a single log line
pub trait LogPattern: fmt::Debug + Send + Sync {
    fn matches(&self, line: &str) -> bool;

    /// Human-readable form for log messages
    fn describe(&self) -> String;
}

/// Plain substring match
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contains(pub String);

impl LogPattern for Contains {
    fn matches(&self, line: &str) -> bool {
        line.contains(&self.0)
    }

    fn describe(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// Regular expression match
#[derive(Clone, Debug)]
pub struct Matches(pub Regex);

impl LogPattern for Matches {
    fn matches(&self, line: &str) -> bool {
        self.0.is_match(line)
    }

    fn describe(&self) -> String {
        format!("/{}/", self.0.as_str())
    }
}

/// Build a shared pattern from CLI or config text
pub fn parse_pattern(text: &str, regex: bool) -> Result<Arc<dyn LogPattern>> {
    if regex {
        let re = Regex::new(text).with_context(|| format!("Invalid log pattern: {text}"))?;
        Ok(Arc::new(Matches(re)))
    } else {
        Ok(Arc::new(Contains(text.to_string())))
    }
}

/// Shorthand for a substring pattern
pub fn contains(text: impl Into<String>) -> Arc<dyn LogPattern> {
    Arc::new(Contains(text.into()))
}
