//! Per-scenario verification reports

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// The daemon behaved differently than expected
    Failed(String),
    /// The scenario could not be carried out
    Errored(String),
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASS"),
            Outcome::Failed(_) => write!(f, "FAIL"),
            Outcome::Errored(_) => write!(f, "ERROR"),
        }
    }
}

/// A single comparison between expectation and observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    /// 1-based index of the step that issued the check
    pub step: usize,
    pub query: String,
    pub expected: String,
    pub observed: String,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    pub target: String,
    pub started_at: DateTime<Local>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub checks: Vec<CheckRecord>,
    pub outcome: Outcome,
    /// Cleanup problem that did not change the outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_warning: Option<String>,
}

impl Report {
    pub fn new(scenario: &str, target: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            target: target.to_string(),
            started_at: Local::now(),
            duration: Duration::ZERO,
            checks: Vec::new(),
            outcome: Outcome::Passed,
            teardown_warning: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome.is_passed()
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckRecord> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Totals over a batch of reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub checks: usize,
}

impl Summary {
    pub fn from_reports(reports: &[Report]) -> Self {
        reports.iter().fold(Summary::default(), |mut summary, report| {
            match report.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::Errored(_) => summary.errored += 1,
            }
            summary.checks += report.checks.len();
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Share of passed scenarios in percent; 100 for an empty batch
    pub fn pass_rate(&self) -> f64 {
        match self.total() {
            0 => 100.0,
            total => self.passed as f64 * 100.0 / total as f64,
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
