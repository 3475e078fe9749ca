//! Batch runner.
//!
//! Feeds scanned jobs through the pipeline behind a semaphore sized by the
//! concurrency plan. A job failure never stops the batch; cancellation stops
//! admitting new jobs and lets the in-flight ones reach a terminal state.

use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyPlan;
use crate::pipeline::{FailureKind, Pipeline};
use crate::scan::ScanEntry;
use crate::summary::BatchSummary;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Runs a list of scanned entries to completion.
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    plan: ConcurrencyPlan,
    cancel: CancelToken,
    semaphore: Arc<Semaphore>,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, plan: ConcurrencyPlan, cancel: CancelToken) -> Self {
        let permits = plan.max_concurrent_jobs.max(1) as usize;
        Self {
            pipeline,
            plan,
            cancel,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    /// Run every entry and summarize.
    pub async fn run(&self, entries: Vec<ScanEntry>) -> BatchSummary {
        let mut summary = BatchSummary::new();
        let mut tasks = JoinSet::new();
        let mut started = 0usize;

        let pending = entries
            .iter()
            .filter(|e| matches!(e, ScanEntry::Pending(_)))
            .count();
        info!(
            entries = entries.len(),
            pending,
            max_concurrent_jobs = self.plan.max_concurrent_jobs,
            "Starting batch"
        );

        for entry in entries {
            let job = match entry {
                ScanEntry::Error { folder, reason } => {
                    warn!(folder = %folder.display(), "Skipping folder: {}", reason);
                    summary.record_scan_error(folder, &reason);
                    continue;
                }
                ScanEntry::AlreadyDone(job) => {
                    summary.record(&self.pipeline.skipped_outcome(&job));
                    continue;
                }
                ScanEntry::Pending(job) => job,
            };

            let permit = if self.cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
                }
            };
            let Some(permit) = permit else {
                summary.record_not_started(job.id, job.source_folder);
                continue;
            };

            let is_first = started == 0;
            started += 1;
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let outcome = pipeline.run_job(&job, &cancel).await;
                drop(permit);
                if is_first {
                    if let Some(reason) = outcome.failure() {
                        if reason.kind == FailureKind::EngineLaunch {
                            error!(
                                "Could not launch {} for the first job; is it installed and on PATH? ({})",
                                pipeline.config().engine.ffmpeg_path.display(),
                                reason.detail
                            );
                        }
                    }
                }
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!("Job task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.sort_jobs();
        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            not_started = summary.not_started,
            "Batch finished"
        );
        summary
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::scan::scan_jobs;
    use crate::summary::JobStatus;
    use crate::test_support::{engine_calls, fake_engine, fake_ffprobe, write_script, FakeEngine};
    use crate::Config;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn library(dir: &Path, folders: &[&str]) -> Config {
        let bin = dir.join("bin");
        let assets = dir.join("assets");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("720 overlay.png"), b"png").unwrap();
        fs::write(assets.join("1080 overlay.png"), b"png").unwrap();
        for name in folders {
            let folder = dir.join("input").join(name);
            fs::create_dir_all(&folder).unwrap();
            fs::write(folder.join(format!("{}.mkv", name)), vec![0u8; 4096]).unwrap();
            fs::write(folder.join(format!("{}.srt", name)), b"1\nhello\n").unwrap();
        }

        let mut cfg = Config::default();
        cfg.paths.input_root = dir.join("input");
        cfg.paths.output_root = dir.join("output");
        cfg.assets.dir = assets;
        cfg.engine.ffprobe_path = fake_ffprobe(&bin, 1920, 1080, 10.0);
        cfg.engine.ffmpeg_path = fake_engine(&bin, FakeEngine::default());
        cfg
    }

    fn runner(cfg: &Config, jobs: u32, cancel: CancelToken) -> BatchRunner {
        let pipeline = Arc::new(Pipeline::new(Arc::new(cfg.clone()), Arc::new(NoopObserver)));
        BatchRunner::new(pipeline, ConcurrencyPlan::fixed(jobs), cancel)
    }

    #[tokio::test]
    async fn test_batch_runs_all_pending_jobs() {
        let dir = TempDir::new().unwrap();
        let cfg = library(dir.path(), &["a", "b", "c"]);
        fs::create_dir_all(dir.path().join("input/empty")).unwrap();

        let summary = runner(&cfg, 2, CancelToken::new()).run(scan_jobs(&cfg)).await;

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1, "the empty folder is a scan error");
        assert_eq!(summary.total(), 4);
        assert!(!summary.cancelled);
        assert_eq!(engine_calls(&dir.path().join("bin")).len(), 6);
        let folders: Vec<PathBuf> = summary.jobs.iter().map(|j| j.folder.clone()).collect();
        let mut sorted = folders.clone();
        sorted.sort();
        assert_eq!(folders, sorted);
    }

    #[tokio::test]
    async fn test_rerun_skips_completed_jobs() {
        let dir = TempDir::new().unwrap();
        let cfg = library(dir.path(), &["a", "b"]);
        runner(&cfg, 1, CancelToken::new()).run(scan_jobs(&cfg)).await;

        let summary = runner(&cfg, 1, CancelToken::new()).run(scan_jobs(&cfg)).await;

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(engine_calls(&dir.path().join("bin")).len(), 4);
        assert!(summary.jobs.iter().all(|j| j.size_reduction_pct == Some(50.0)));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let mut cfg = library(dir.path(), &["a", "b", "c"]);
        fs::remove_file(&cfg.engine.ffmpeg_path).unwrap();
        cfg.engine.ffmpeg_path = fake_engine(
            &dir.path().join("bin"),
            FakeEngine {
                fail_when_output_contains: Some("/b/b_burned.stage1"),
                ..Default::default()
            },
        );

        let summary = runner(&cfg, 1, CancelToken::new()).run(scan_jobs(&cfg)).await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let failed = summary.jobs.iter().find(|j| j.status == JobStatus::Failed).unwrap();
        assert!(failed.folder.ends_with("b"));
        assert_eq!(failed.failure_kind, Some(FailureKind::EngineExecution));
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let cfg = library(dir.path(), &["a", "b"]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = runner(&cfg, 1, cancel).run(scan_jobs(&cfg)).await;

        assert_eq!(summary.not_started, 2);
        assert!(summary.cancelled);
        assert!(engine_calls(&dir.path().join("bin")).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_admission() {
        let dir = TempDir::new().unwrap();
        let mut cfg = library(dir.path(), &["a", "b", "c"]);
        cfg.engine.ffmpeg_path = write_script(
            &dir.path().join("bin"),
            "slow-ffmpeg",
            "for last; do :; done\nprintf 'x' > \"$last\"\nprintf 'time=00:00:01.00 \\r' >&2\nexec sleep 30\n",
        );
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            trigger.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(20),
            runner(&cfg, 1, cancel).run(scan_jobs(&cfg)),
        )
        .await
        .expect("batch must stop after cancel");

        assert!(summary.cancelled);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_started, 2);
        let first = &summary.jobs[0];
        assert_eq!(first.failure_kind, Some(FailureKind::Cancelled));
        assert!(!dir.path().join("output/a/a_burned.stage1.mp4").exists());
    }
}
