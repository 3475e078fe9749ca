//! Progress and outcome delivery.
//!
//! The pipeline pushes events into a [`PipelineObserver`] and never waits on the
//! consumer. Rendering lives entirely on the other side of this trait.

use crate::encode::Stage;
use crate::pipeline::{OutcomeStatus, PipelineOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Step used by [`LogObserver`] between progress log lines.
const LOG_STEP_PERCENT: u8 = 10;

/// Progress of one job, on the job-wide 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: Stage,
    /// Elapsed media time reported by the engine for the current stage.
    pub elapsed_secs: f64,
    pub percent: f64,
}

/// Everything an observer can receive, for channel-based consumers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Outcome(PipelineOutcome),
}

/// Sink for pipeline events. Implementations must not block.
pub trait PipelineObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
    fn on_outcome(&self, outcome: &PipelineOutcome);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_progress(&self, _event: ProgressEvent) {}
    fn on_outcome(&self, _outcome: &PipelineOutcome) {}
}

/// Forwards events into an unbounded channel.
///
/// Sends never block; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(PipelineEvent::Progress(event));
    }

    fn on_outcome(&self, outcome: &PipelineOutcome) {
        let _ = self.tx.send(PipelineEvent::Outcome(outcome.clone()));
    }
}

/// Writes progress and outcomes to the log.
///
/// Progress is logged once per 10% step per job.
#[derive(Debug, Default)]
pub struct LogObserver {
    last_step: Mutex<HashMap<String, u8>>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new step if `percent` crossed into one not logged yet.
    fn advance(&self, job_id: &str, percent: f64) -> Option<u8> {
        let step = ((percent.clamp(0.0, 100.0) as u8) / LOG_STEP_PERCENT) * LOG_STEP_PERCENT;
        let mut last = self.last_step.lock().ok()?;
        match last.get(job_id) {
            Some(prev) if *prev >= step => None,
            _ => {
                last.insert(job_id.to_string(), step);
                Some(step)
            }
        }
    }
}

impl PipelineObserver for LogObserver {
    fn on_progress(&self, event: ProgressEvent) {
        if let Some(step) = self.advance(&event.job_id, event.percent) {
            info!(job = %event.job_id, stage = event.stage.index(), "{}%", step);
        }
    }

    fn on_outcome(&self, outcome: &PipelineOutcome) {
        if let Ok(mut last) = self.last_step.lock() {
            last.remove(&outcome.job.id);
        }

        let job = &outcome.job.id;
        let label = outcome.job.label();
        match &outcome.status {
            OutcomeStatus::Success => info!(
                job = %job,
                output = %outcome.final_output.display(),
                reduction_pct = outcome.size_reduction_percent().unwrap_or(0.0),
                "Completed {}",
                label
            ),
            OutcomeStatus::Skipped => info!(job = %job, "Skipped {} (already done)", label),
            OutcomeStatus::Failed(reason) => warn!(
                job = %job,
                kind = ?reason.kind,
                "Failed {}: {}",
                label,
                reason.detail
            ),
        }
    }
}
