//! Per-unit outcomes and the run summary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::calendar::display;
use crate::error::UnitError;
use crate::plan::WorkUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSuccess {
    pub records: u64,
    pub attempts: u32,
    pub exhausted_code: i32,
    /// Final file for the unit: the `.gz` artifact, or the `.csv` when
    /// compaction is off or skipped.
    pub artifact: PathBuf,
}

#[derive(Debug)]
pub enum UnitStatus {
    Succeeded(UnitSuccess),
    Failed(UnitError),
    /// Not run to completion because the whole run was cancelled.
    Cancelled,
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: WorkUnit,
    pub status: UnitStatus,
    pub elapsed: Duration,
}

impl UnitOutcome {
    pub(crate) fn cancelled(unit: WorkUnit) -> Self {
        Self {
            unit,
            status: UnitStatus::Cancelled,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, UnitStatus::Succeeded(_))
    }
}

/// Outcome of every unit of one run, ordered by tag then window.
#[derive(Debug)]
pub struct RunReport {
    outcomes: Vec<UnitOutcome>,
    duration: Duration,
}

impl RunReport {
    pub fn new(mut outcomes: Vec<UnitOutcome>, duration: Duration) -> Self {
        outcomes.sort_by(|a, b| {
            (a.unit.tag(), a.unit.window_start()).cmp(&(b.unit.tag(), b.unit.window_start()))
        });
        Self { outcomes, duration }
    }

    pub fn outcomes(&self) -> &[UnitOutcome] {
        &self.outcomes
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn cancelled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Cancelled))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&WorkUnit, &UnitError)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            UnitStatus::Failed(err) => Some((&o.unit, err)),
            _ => None,
        })
    }

    pub fn records(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                UnitStatus::Succeeded(done) => done.records,
                _ => 0,
            })
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Units: {}, Succeeded: {}, Failed: {}, Cancelled: {}, Records: {}, Duration: {:?}",
            self.total(),
            self.succeeded(),
            self.failed(),
            self.cancelled(),
            self.records(),
            self.duration
        )
    }

    pub fn to_summary(&self) -> ReportSummary {
        ReportSummary {
            total: self.total(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cancelled: self.cancelled(),
            records: self.records(),
            duration_secs: self.duration.as_secs_f64(),
            units: self.outcomes.iter().map(UnitRecord::from).collect(),
        }
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.to_summary())?;
        std::fs::write(path, json)
    }
}

#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub records: u64,
    pub duration_secs: f64,
    pub units: Vec<UnitRecord>,
}

#[derive(Debug, Serialize)]
pub struct UnitRecord {
    pub tag: String,
    pub window_start: String,
    pub window_end: String,
    pub output: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

impl From<&UnitOutcome> for UnitRecord {
    fn from(outcome: &UnitOutcome) -> Self {
        let unit = &outcome.unit;
        let (status, output, records, attempts, error) = match &outcome.status {
            UnitStatus::Succeeded(done) => (
                "succeeded",
                done.artifact.display().to_string(),
                Some(done.records),
                Some(done.attempts),
                None,
            ),
            UnitStatus::Failed(err) => (
                "failed",
                unit.output_path().display().to_string(),
                None,
                None,
                Some(err.to_string()),
            ),
            UnitStatus::Cancelled => (
                "cancelled",
                unit.output_path().display().to_string(),
                None,
                None,
                None,
            ),
        };
        Self {
            tag: unit.tag().to_string(),
            window_start: display(unit.window_start()),
            window_end: display(unit.window_end()),
            output,
            status,
            records,
            attempts,
            error,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
        }
    }
}
