//! End-of-run accounting.

use std::fmt;

use tracing::warn;

use crate::errors::Error;

/// Per-category counts reported at the end of a run.
///
/// Per-record failures are recorded here and never abort the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped_validation: usize,
    pub skipped_privacy: usize,
    pub failed_transport: usize,
    pub failed_other: usize,
    /// Classifier answers that could not be parsed (counted as processed, verdict false).
    pub malformed_verdicts: usize,
}

impl RunSummary {
    /// Count a per-record failure under its category and log the reason.
    pub fn record_failure(&mut self, subject: &str, error: &Error) {
        match error {
            Error::Validation(_) => self.skipped_validation += 1,
            Error::PrivacyRestricted(_) => self.skipped_privacy += 1,
            Error::Transport { .. } => self.failed_transport += 1,
            _ => self.failed_other += 1,
        }
        warn!(subject, error = %error, "record skipped");
    }

    pub fn skipped(&self) -> usize {
        self.skipped_validation + self.skipped_privacy
    }

    pub fn failed(&self) -> usize {
        self.failed_transport + self.failed_other
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "processed: {}", self.processed)?;
        writeln!(
            f,
            "skipped:   {} (validation {}, privacy {})",
            self.skipped(),
            self.skipped_validation,
            self.skipped_privacy
        )?;
        write!(
            f,
            "failed:    {} (transport {}, other {})",
            self.failed(),
            self.failed_transport,
            self.failed_other
        )?;
        if self.malformed_verdicts > 0 {
            write!(f, "\nmalformed classifier answers: {}", self.malformed_verdicts)?;
        }
        Ok(())
    }
}
