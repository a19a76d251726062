//! Run summary: per-stage counts, failed items, cleanup status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::models::{RunContext, WorkDescriptor};

/// Pipeline stage names as they appear in reports and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Extract,
    Publish,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Publish => "publish",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed item with the error that removed it from the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub period_key: String,
    /// File or object within the period, for stages that fan out per file
    pub item: Option<String>,
    pub error: String,
}

impl ItemFailure {
    pub fn new(period_key: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            period_key: period_key.into(),
            item: None,
            error: error.to_string(),
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
    /// Periods that succeeded without producing any data
    pub empty: Vec<String>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            attempted: 0,
            succeeded: 0,
            failures: Vec::new(),
            empty: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Distinct failed periods, in first-seen order.
    pub fn failed_period_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !keys.contains(&failure.period_key.as_str()) {
                keys.push(&failure.period_key);
            }
        }
        keys
    }
}

/// What happened to the run's transient storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupStatus {
    NotRun,
    Removed,
    AlreadyAbsent,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    /// Objects are staged but at least one warehouse load failed
    CompletedWithLoadFailures,
    Exhausted { stage: Stage },
    Cancelled { stage: Stage },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::CompletedWithLoadFailures)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub work_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub periods: Vec<String>,
    pub stages: Vec<StageReport>,
    pub cleanup: CleanupStatus,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn new(ctx: &RunContext, descriptors: &[WorkDescriptor]) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            work_root: ctx.work_root.clone(),
            started_at: Utc::now(),
            finished_at: None,
            periods: descriptors.iter().map(|d| d.period_key.clone()).collect(),
            stages: Vec::new(),
            cleanup: CleanupStatus::NotRun,
            outcome: RunOutcome::Running,
        }
    }

    /// Record a stage, replacing an earlier entry for the same stage.
    pub fn record(&mut self, report: StageReport) {
        self.stages.retain(|s| s.stage != report.stage);
        self.stages.push(report);
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Entry for `stage`, created empty on first use so counts can be updated as
    /// items complete.
    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageReport {
        let index = match self.stages.iter().position(|s| s.stage == stage) {
            Some(index) => index,
            None => {
                self.stages.push(StageReport::new(stage));
                self.stages.len() - 1
            },
        };
        &mut self.stages[index]
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Emit the summary through the logging pipeline.
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            outcome = ?self.outcome,
            periods = self.periods.len(),
            duration_secs = self.duration_seconds().unwrap_or_default(),
            "Run summary"
        );

        for stage in &self.stages {
            info!(
                run_id = %self.run_id,
                stage = %stage.stage,
                attempted = stage.attempted,
                succeeded = stage.succeeded,
                failed = stage.failed(),
                "Stage summary"
            );
            for period in &stage.empty {
                warn!(run_id = %self.run_id, stage = %stage.stage, period_key = %period, "No data for period");
            }
            for failure in &stage.failures {
                warn!(
                    run_id = %self.run_id,
                    stage = %stage.stage,
                    period_key = %failure.period_key,
                    item = failure.item.as_deref().unwrap_or("-"),
                    error = %failure.error,
                    "Item failed"
                );
            }
        }

        match &self.cleanup {
            CleanupStatus::Failed { error } => {
                warn!(run_id = %self.run_id, error = %error, "Transient storage cleanup failed")
            },
            status => info!(run_id = %self.run_id, cleanup = ?status, "Transient storage cleanup"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_report() -> RunReport {
        let ctx = RunContext::new("/tmp", "r1");
        RunReport::new(&ctx, &[WorkDescriptor::new(2020, 1), WorkDescriptor::new(2020, 2)])
    }

    #[test]
    fn test_record_replaces_same_stage() {
        let mut report = sample_report();
        let mut first = StageReport::new(Stage::Fetch);
        first.attempted = 2;
        report.record(first);

        let mut second = StageReport::new(Stage::Fetch);
        second.attempted = 5;
        report.record(second);

        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stage(Stage::Fetch).unwrap().attempted, 5);
        assert!(report.stage(Stage::Load).is_none());
    }

    #[test]
    fn test_stage_mut_creates_then_updates_in_place() {
        let mut report = sample_report();
        report.stage_mut(Stage::Fetch).attempted = 2;
        report.stage_mut(Stage::Fetch).succeeded += 1;
        report.stage_mut(Stage::Extract).attempted = 1;

        assert_eq!(report.stages.len(), 2);
        let fetch = report.stage(Stage::Fetch).unwrap();
        assert_eq!((fetch.attempted, fetch.succeeded), (2, 1));
    }

    #[test]
    fn test_failed_period_keys_are_distinct() {
        let mut stage = StageReport::new(Stage::Publish);
        stage.failures.push(ItemFailure::new("2020-02", "boom").with_item("a.csv"));
        stage.failures.push(ItemFailure::new("2020-02", "boom").with_item("b.csv"));
        stage.failures.push(ItemFailure::new("2020-01", "boom"));

        assert_eq!(stage.failed(), 3);
        assert_eq!(stage.failed_period_keys(), vec!["2020-02", "2020-01"]);
    }

    #[test]
    fn test_report_serializes_stage_names() {
        let mut report = sample_report();
        report.record(StageReport::new(Stage::Extract));
        report.finish(RunOutcome::Exhausted { stage: Stage::Extract });

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["stages"][0]["stage"], "extract");
        assert_eq!(json["outcome"]["status"], "exhausted");
        assert_eq!(json["outcome"]["stage"], "extract");
        assert_eq!(json["cleanup"]["status"], "not_run");
        assert!(report.finished_at.is_some());
        assert!(!report.outcome.is_success());
    }
}
