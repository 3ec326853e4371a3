//! Single unit execution
//!
//! Runs one unit, then reads its record back through the result channel,
//! falling back to an exit-code-derived record when none was written.

use std::time::Duration;
use tracing::{debug, warn};

use super::process::{OutputMode, UnitProcess};
use crate::channel::await_record;
use crate::context::RunContext;
use crate::models::{RecordSource, ResultRecord, TestUnit, UnitOutcome};

/// Runs units and turns what happened into a [`UnitOutcome`]
#[derive(Clone, Debug)]
pub struct UnitRunner {
    process: UnitProcess,
    record_grace: Duration,
}

impl UnitRunner {
    pub fn new(process: UnitProcess, record_grace: Duration) -> Self {
        Self {
            process,
            record_grace,
        }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        let scheduler = &ctx.config.scheduler;
        Self::new(
            UnitProcess::new(scheduler.unit_timeout(), scheduler.kill_grace()),
            scheduler.record_grace(),
        )
    }

    pub async fn run(&self, ctx: &RunContext, unit: &TestUnit, output: OutputMode) -> UnitOutcome {
        let env = ctx.unit_env(unit);
        let exit = self.process.run(unit, &env, &output).await;
        debug!(
            "{} exited with {} after {:.3}s",
            unit,
            exit.code,
            exit.elapsed.as_secs_f64()
        );

        let key = ctx.record_key(unit);
        let reported = match await_record(ctx.channel.as_ref(), &key, self.record_grace).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read result record for {}: {}", unit, e);
                None
            }
        };

        let (record, source) = match reported {
            Some(mut record) => {
                if record.elapsed_secs <= 0.0 {
                    record.elapsed_secs = exit.elapsed.as_secs_f64();
                }
                (record.with_exit_code(exit.code), RecordSource::Reported)
            }
            None => {
                warn!(
                    "{} left no result record, using exit code {}",
                    unit, exit.code
                );
                (
                    ResultRecord::fallback(unit, exit.code, exit.elapsed.as_secs_f64()),
                    RecordSource::Fallback,
                )
            }
        };

        let mut outcome = UnitOutcome::new(label_for(unit), record, source);
        outcome.timed_out = exit.timed_out;
        if let OutputMode::Capture(path) = output {
            outcome.capture = Some(path);
        }
        outcome
    }

    /// Outcome for a unit that was discovered but deliberately not executed
    pub fn skipped(unit: &TestUnit) -> UnitOutcome {
        UnitOutcome::new(
            label_for(unit),
            ResultRecord::synthetic_pass(unit),
            RecordSource::Synthetic,
        )
    }
}

pub(crate) fn label_for(unit: &TestUnit) -> String {
    format!("Test {:02}", unit.identifier)
}
