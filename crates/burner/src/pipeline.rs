//! Stage pipeline for a single job.
//!
//! Runs the pre-flight checks, the idempotency guard, stage 1 (subtitle burn-in)
//! and stage 2 (logo overlay), and owns every artifact those stages leave behind.
//! Errors never escape `run_job`: each one becomes a failed [`PipelineOutcome`].

use crate::cancel::CancelToken;
use crate::encode::{
    build_stage_invocation, EngineInvocation, ProcessSupervisor, ProgressWindow, Stage,
    StageInput, StageResult, SupervisorError,
};
use crate::job::{Job, JobArtifacts};
use crate::logo::{select_logo, AssetMissingError};
use crate::marker;
use crate::observer::PipelineObserver;
use crate::probe::{probe_media, ProbeError, VideoMetadata};
use crate::subtitle::{normalize_subtitle, SubtitleError};
use crate::Config;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error kinds a job can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InputMissing,
    SubtitleUnreadable,
    Probe,
    AssetMissing,
    EngineLaunch,
    EngineExecution,
    Io,
    Cancelled,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

/// Terminal status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Failed(FailureReason),
}

/// Result of running one job through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub job: Job,
    pub final_output: PathBuf,
    /// `(source - final) / source`; negative when the output grew.
    pub size_reduction: Option<f64>,
    pub status: OutcomeStatus,
    pub stages: Vec<StageResult>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            OutcomeStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn size_reduction_percent(&self) -> Option<f64> {
        self.size_reduction.map(|r| r * 100.0)
    }
}

/// Error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The job's video is gone.
    #[error("Video not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error(transparent)]
    Subtitle(#[from] SubtitleError),

    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    AssetMissing(#[from] AssetMissingError),

    /// The destination folder cannot be created or written to.
    #[error("Destination {} is not writable: {source}", .path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An engine run did not succeed.
    #[error("{stage} failed: {source}")]
    Engine {
        stage: Stage,
        #[source]
        source: SupervisorError,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::InputMissing(_) => FailureKind::InputMissing,
            PipelineError::Subtitle(_) => FailureKind::SubtitleUnreadable,
            PipelineError::Probe(_) => FailureKind::Probe,
            PipelineError::AssetMissing(_) => FailureKind::AssetMissing,
            PipelineError::DestinationUnwritable { .. } => FailureKind::Io,
            PipelineError::Engine { source, .. } => match source {
                SupervisorError::Launch { .. } => FailureKind::EngineLaunch,
                SupervisorError::Cancelled => FailureKind::Cancelled,
                SupervisorError::Io(_) => FailureKind::Io,
                SupervisorError::Execution { .. }
                | SupervisorError::MissingOutput { .. }
                | SupervisorError::AlreadyStarted => FailureKind::EngineExecution,
            },
            PipelineError::Cancelled => FailureKind::Cancelled,
            PipelineError::Io(_) => FailureKind::Io,
        }
    }

    fn into_reason(self) -> FailureReason {
        FailureReason {
            kind: self.kind(),
            detail: self.to_string(),
        }
    }
}

/// How a job left the pipeline when nothing failed.
enum Completion {
    Encoded { source_size: u64, final_size: u64 },
    AlreadyDone,
}

fn size_reduction(source_size: u64, final_size: u64) -> Option<f64> {
    if source_size == 0 {
        return None;
    }
    Some((source_size as f64 - final_size as f64) / source_size as f64)
}

/// Runs jobs through both stages. Shared read-only between concurrent jobs.
pub struct Pipeline {
    config: Arc<Config>,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, observer: Arc<dyn PipelineObserver>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Artifact paths for a job under the current configuration.
    pub fn artifacts(&self, job: &Job) -> JobArtifacts {
        JobArtifacts::for_job(job, &self.config.pipeline)
    }

    /// Run a job to a terminal outcome and report it to the observer.
    pub async fn run_job(&self, job: &Job, cancel: &CancelToken) -> PipelineOutcome {
        info!(job = %job.id, video = %job.video.display(), "Processing {}", job.label());

        let mut stages = Vec::new();
        let mut final_output = self.artifacts(job).final_output;
        let result = self.execute(job, cancel, &mut stages, &mut final_output).await;

        let (status, reduction) = match result {
            Ok(Completion::Encoded {
                source_size,
                final_size,
            }) => (OutcomeStatus::Success, size_reduction(source_size, final_size)),
            Ok(Completion::AlreadyDone) => {
                (OutcomeStatus::Skipped, recorded_reduction(&final_output))
            }
            Err(e) => (OutcomeStatus::Failed(e.into_reason()), None),
        };

        let outcome = PipelineOutcome {
            job: job.clone(),
            final_output,
            size_reduction: reduction,
            status,
            stages,
        };
        self.observer.on_outcome(&outcome);
        outcome
    }

    /// Outcome for a job the scanner already found complete.
    ///
    /// Reported to the observer like any other outcome.
    pub fn skipped_outcome(&self, job: &Job) -> PipelineOutcome {
        let final_output = self.artifacts(job).final_output;
        let outcome = PipelineOutcome {
            job: job.clone(),
            size_reduction: recorded_reduction(&final_output),
            final_output,
            status: OutcomeStatus::Skipped,
            stages: Vec::new(),
        };
        self.observer.on_outcome(&outcome);
        outcome
    }

    /// Give up on a job: delete its intermediate artifact and marker.
    pub fn abandon(&self, job: &Job) {
        let artifacts = self.artifacts(job);
        let _ = fs::remove_file(&artifacts.intermediate);
        marker::remove_marker(&artifacts.intermediate);
        info!(job = %job.id, "Abandoned {}", job.label());
    }

    async fn execute(
        &self,
        job: &Job,
        cancel: &CancelToken,
        stages: &mut Vec<StageResult>,
        final_output: &mut PathBuf,
    ) -> Result<Completion, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Pre-flight: nothing below launches the engine.
        let source_size = match fs::metadata(&job.video) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(PipelineError::InputMissing(job.video.clone())),
        };
        let meta = probe_media(&self.config.engine.ffprobe_path, &job.video).await?;
        let logo = select_logo(meta.height, &self.config.assets)?;
        ensure_writable(&job.destination, &job.id)?;

        let artifacts = self.artifacts(job).resolved()?;
        *final_output = artifacts.final_output.clone();

        if marker::is_complete(&artifacts.final_output) {
            debug!(job = %job.id, "Final output already complete");
            return Ok(Completion::AlreadyDone);
        }
        if artifacts.final_output.exists() {
            warn!(
                job = %job.id,
                "Overwriting incomplete output {}",
                artifacts.final_output.display()
            );
            marker::remove_marker(&artifacts.final_output);
        }

        let video = fs::canonicalize(&job.video)?;
        let logo = fs::canonicalize(&logo)?;
        let with_subtitle_stage = job.subtitle.is_some();

        let overlay_input = match &job.subtitle {
            None => video.clone(),
            Some(subtitle) => {
                self.subtitle_stage(
                    job,
                    &video,
                    subtitle,
                    &artifacts,
                    &meta,
                    source_size,
                    cancel,
                    stages,
                )
                .await?;
                artifacts.intermediate.clone()
            }
        };

        let invocation = build_stage_invocation(
            &self.config.engine,
            &self.config.encoding,
            StageInput::LogoOverlay {
                input: overlay_input,
                logo,
            },
            &artifacts.final_output,
            &meta,
        );
        let window = ProgressWindow::for_stage(Stage::LogoOverlay, with_subtitle_stage);

        match self.supervise(job, invocation, window, cancel, stages).await {
            Ok(result) => {
                if with_subtitle_stage {
                    let _ = fs::remove_file(&artifacts.intermediate);
                    marker::remove_marker(&artifacts.intermediate);
                }
                marker::write_marker(&artifacts.final_output, source_size)?;
                Ok(Completion::Encoded {
                    source_size,
                    final_size: result.size_bytes,
                })
            }
            Err(e) => {
                if with_subtitle_stage {
                    if self.config.pipeline.keep_intermediate_on_failure {
                        info!(
                            job = %job.id,
                            "Keeping {} for a stage 2 retry",
                            artifacts.intermediate.display()
                        );
                    } else {
                        let _ = fs::remove_file(&artifacts.intermediate);
                        marker::remove_marker(&artifacts.intermediate);
                    }
                }
                Err(e)
            }
        }
    }

    /// Stage 1, or resume from a completed intermediate.
    #[allow(clippy::too_many_arguments)]
    async fn subtitle_stage(
        &self,
        job: &Job,
        video: &Path,
        subtitle: &Path,
        artifacts: &JobArtifacts,
        meta: &VideoMetadata,
        source_size: u64,
        cancel: &CancelToken,
        stages: &mut Vec<StageResult>,
    ) -> Result<(), PipelineError> {
        let intermediate = &artifacts.intermediate;

        let resumable = marker::is_complete(intermediate)
            && marker::read_marker(intermediate)
                .is_some_and(|record| record.source_size_bytes == source_size);
        if resumable {
            info!(job = %job.id, "Resuming at stage 2 from {}", intermediate.display());
            stages.push(StageResult {
                stage: Stage::SubtitleBurn,
                output_path: intermediate.clone(),
                size_bytes: fs::metadata(intermediate).map(|m| m.len()).unwrap_or(0),
                elapsed: Duration::ZERO,
                success: true,
                error: None,
            });
            return Ok(());
        }
        if intermediate.exists() {
            debug!(
                job = %job.id,
                "Discarding stale intermediate {}",
                intermediate.display()
            );
            let _ = fs::remove_file(intermediate);
        }
        marker::remove_marker(intermediate);

        let asset = normalize_subtitle(subtitle)?;
        let normalized = match fs::canonicalize(&asset.normalized) {
            Ok(path) => path,
            Err(e) => {
                asset.cleanup();
                return Err(e.into());
            }
        };

        let invocation = build_stage_invocation(
            &self.config.engine,
            &self.config.encoding,
            StageInput::SubtitleBurn {
                video: video.to_path_buf(),
                subtitle: normalized,
            },
            intermediate,
            meta,
        );
        let window = ProgressWindow::for_stage(Stage::SubtitleBurn, true);
        let result = self.supervise(job, invocation, window, cancel, stages).await;
        asset.cleanup();
        result?;

        if let Err(e) = marker::write_marker(intermediate, source_size) {
            let _ = fs::remove_file(intermediate);
            return Err(e.into());
        }
        Ok(())
    }

    async fn supervise(
        &self,
        job: &Job,
        invocation: EngineInvocation,
        window: ProgressWindow,
        cancel: &CancelToken,
        stages: &mut Vec<StageResult>,
    ) -> Result<StageResult, PipelineError> {
        let stage = invocation.stage;
        let output = invocation.output_path.clone();
        let started = Instant::now();
        let mut supervisor = ProcessSupervisor::new(
            job.id.clone(),
            invocation,
            window,
            Arc::clone(&self.observer),
            self.config.engine.stderr_tail_lines,
        );

        match supervisor.run(cancel).await {
            Ok(result) => {
                stages.push(result.clone());
                Ok(result)
            }
            Err(e) => {
                stages.push(StageResult::failed(
                    stage,
                    output,
                    started.elapsed(),
                    e.to_string(),
                ));
                Err(PipelineError::Engine { stage, source: e })
            }
        }
    }
}

/// Size reduction recorded by the completion marker of a finished output.
fn recorded_reduction(final_output: &Path) -> Option<f64> {
    marker::read_marker(final_output)
        .and_then(|r| size_reduction(r.source_size_bytes, r.output_size_bytes))
}

/// Create the destination folder and prove a file can be written in it.
fn ensure_writable(dir: &Path, job_id: &str) -> Result<(), PipelineError> {
    let unwritable = |source| PipelineError::DestinationUnwritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(unwritable)?;
    let probe = dir.join(format!(".subburn-write-test-{}", job_id));
    fs::write(&probe, b"").map_err(unwritable)?;
    let _ = fs::remove_file(&probe);
    Ok(())
}
