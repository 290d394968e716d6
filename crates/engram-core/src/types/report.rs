//! Structured result of a pipeline job run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Outcome of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// The run completed (possibly with quarantined records).
    Completed,
    /// Another instance of the same stage held the run lock. Not an error.
    AlreadyRunning,
    /// The run failed after exhausting its retries.
    Failed,
}

/// Structured result every job run returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run outcome.
    pub status: RunStatus,
    /// Records processed this run.
    pub records_processed: usize,
    /// Records quarantined this run.
    pub records_quarantined: usize,
    /// Non-fatal errors encountered while processing continued.
    pub errors: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Start a new report.
    pub fn new() -> Self {
        Self {
            status: RunStatus::Completed,
            records_processed: 0,
            records_quarantined: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A report for a run that never started because the lock was held.
    pub fn already_running() -> Self {
        let mut report = Self::new();
        report.status = RunStatus::AlreadyRunning;
        report.completed_at = Some(report.started_at);
        report
    }

    /// Mark the report complete with the given status.
    pub fn complete(mut self, status: RunStatus) -> Self {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Wall-clock duration of the run, if complete.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
