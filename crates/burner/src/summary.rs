//! End-of-batch summary.

use crate::pipeline::{FailureKind, OutcomeStatus, PipelineOutcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal state of one entry in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Skipped,
    Failed,
    NotStarted,
}

/// Per-job line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id; empty for folders that never became a job.
    pub job_id: String,
    pub folder: PathBuf,
    pub status: JobStatus,
    pub final_output: Option<PathBuf>,
    /// Size reduction in percent; negative when the output grew.
    pub size_reduction_pct: Option<f64>,
    pub failure_kind: Option<FailureKind>,
    pub detail: Option<String>,
}

/// Counts and per-job details for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub not_started: u64,
    pub cancelled: bool,
    pub jobs: Vec<JobSummary>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pipeline outcome.
    pub fn record(&mut self, outcome: &PipelineOutcome) {
        let (status, failure_kind, detail) = match &outcome.status {
            OutcomeStatus::Success => {
                self.succeeded += 1;
                (JobStatus::Succeeded, None, None)
            }
            OutcomeStatus::Skipped => {
                self.skipped += 1;
                (JobStatus::Skipped, None, None)
            }
            OutcomeStatus::Failed(reason) => {
                self.failed += 1;
                (
                    JobStatus::Failed,
                    Some(reason.kind),
                    Some(reason.detail.clone()),
                )
            }
        };

        self.jobs.push(JobSummary {
            job_id: outcome.job.id.clone(),
            folder: outcome.job.source_folder.clone(),
            status,
            final_output: Some(outcome.final_output.clone()),
            size_reduction_pct: outcome.size_reduction_percent(),
            failure_kind,
            detail,
        });
    }

    /// Add a folder the scanner could not turn into a job. Counted as failed.
    pub fn record_scan_error(&mut self, folder: PathBuf, reason: &str) {
        self.failed += 1;
        self.jobs.push(JobSummary {
            job_id: String::new(),
            folder,
            status: JobStatus::Failed,
            final_output: None,
            size_reduction_pct: None,
            failure_kind: Some(FailureKind::InputMissing),
            detail: Some(reason.to_string()),
        });
    }

    /// Add a job that was never started because the batch was cancelled.
    pub fn record_not_started(&mut self, job_id: String, folder: PathBuf) {
        self.not_started += 1;
        self.jobs.push(JobSummary {
            job_id,
            folder,
            status: JobStatus::NotStarted,
            final_output: None,
            size_reduction_pct: None,
            failure_kind: None,
            detail: None,
        });
    }

    pub fn total(&self) -> u64 {
        self.succeeded + self.skipped + self.failed + self.not_started
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Mean size reduction over succeeded jobs, in percent.
    pub fn average_reduction_pct(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Succeeded)
            .filter_map(|j| j.size_reduction_pct)
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Keep per-job lines in folder order regardless of completion order.
    pub fn sort_jobs(&mut self) {
        self.jobs.sort_by(|a, b| a.folder.cmp(&b.folder));
    }
}
