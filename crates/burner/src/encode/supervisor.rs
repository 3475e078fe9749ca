//! Process supervision for a single engine run.
//!
//! A supervisor owns one child process from launch to a terminal state. Both
//! output streams are drained by reader tasks into one channel; the supervisor
//! consumes lines from it and watches the cancel token in the same `select!`, so a
//! cancellation is noticed within one read cycle.

use super::progress::{parse_engine_line, EngineLine, LineSplitter, ProgressWindow};
use super::{EngineInvocation, Stage};
use crate::cancel::CancelToken;
use crate::observer::{PipelineObserver, ProgressEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Capacity of the line channel between reader tasks and the supervisor.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Read buffer per output stream.
const READ_CHUNK: usize = 8192;

/// Error type for supervised engine runs.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The engine could not be started.
    #[error("Failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The engine exited with a non-zero status.
    #[error("Engine exited with {}: {detail}", exit_label(.code))]
    Execution { code: Option<i32>, detail: String },

    /// The engine reported success but the output is missing or empty.
    #[error("Engine exited cleanly but {} is missing or empty: {detail}", .path.display())]
    MissingOutput { path: PathBuf, detail: String },

    /// The run was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// `run` was called on a supervisor that already ran.
    #[error("Supervisor already started")]
    AlreadyStarted,

    /// Waiting on the child failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Lifecycle of a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Succeeded | SupervisorState::Failed | SupervisorState::Cancelled
        )
    }
}

/// Record of one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub output_path: PathBuf,
    /// Size of the output; 0 when the stage did not succeed.
    pub size_bytes: u64,
    /// Wall-clock time spent in the stage.
    pub elapsed: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl StageResult {
    pub fn failed(stage: Stage, output_path: PathBuf, elapsed: Duration, error: String) -> Self {
        Self {
            stage,
            output_path,
            size_bytes: 0,
            elapsed,
            success: false,
            error: Some(error),
        }
    }
}

/// Drives one engine process to a terminal state.
pub struct ProcessSupervisor {
    job_id: String,
    invocation: EngineInvocation,
    window: ProgressWindow,
    observer: Arc<dyn PipelineObserver>,
    tail_lines: usize,
    state: SupervisorState,
    high_water: f64,
}

impl ProcessSupervisor {
    pub fn new(
        job_id: impl Into<String>,
        invocation: EngineInvocation,
        window: ProgressWindow,
        observer: Arc<dyn PipelineObserver>,
        tail_lines: usize,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            invocation,
            window,
            observer,
            tail_lines,
            state: SupervisorState::NotStarted,
            high_water: window.start,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launch the engine and supervise it until it reaches a terminal state.
    ///
    /// On `Failed` and `Cancelled` the declared output is removed before the state
    /// is updated.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<StageResult, SupervisorError> {
        if self.state != SupervisorState::NotStarted {
            return Err(SupervisorError::AlreadyStarted);
        }
        if cancel.is_cancelled() {
            self.state = SupervisorState::Cancelled;
            return Err(SupervisorError::Cancelled);
        }

        let stage = self.invocation.stage;
        let started = Instant::now();
        debug!(
            job = %self.job_id,
            stage = stage.index(),
            args = ?self.invocation.args_lossy(),
            "Launching {}",
            self.invocation.program.display()
        );

        let mut child = match self.invocation.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = SupervisorState::Failed;
                return Err(SupervisorError::Launch {
                    program: self.invocation.program.clone(),
                    source: e,
                });
            }
        };
        self.state = SupervisorState::Running;
        info!(job = %self.job_id, "Started {}", stage);

        let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, tx.clone())));
        }
        drop(tx);

        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.tail_lines);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                line = rx.recv() => Some(line),
            };
            match next {
                None => return self.abort(child, readers).await,
                Some(Some(line)) => self.handle_line(&line, &mut tail),
                Some(None) => break,
            }
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let status = match waited {
            Some(status) => status,
            None => return self.abort(child, readers).await,
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.fail_cleanup();
                return Err(SupervisorError::Io(e));
            }
        };
        let elapsed = started.elapsed();
        let detail = tail.iter().cloned().collect::<Vec<_>>().join("\n");

        if !status.success() {
            self.fail_cleanup();
            warn!(job = %self.job_id, "{} failed with status {}", stage, status);
            return Err(SupervisorError::Execution {
                code: status.code(),
                detail,
            });
        }

        let output = self.invocation.output_path.clone();
        let size_bytes = output_size(&output);
        if size_bytes == 0 {
            self.fail_cleanup();
            warn!(job = %self.job_id, "{} exited 0 without output", stage);
            return Err(SupervisorError::MissingOutput {
                path: output,
                detail,
            });
        }

        self.emit(self.window.end(), self.invocation.expected_duration_secs);
        self.state = SupervisorState::Succeeded;
        info!(
            job = %self.job_id,
            size_bytes,
            elapsed_secs = elapsed.as_secs_f64(),
            "Finished {}",
            stage
        );

        Ok(StageResult {
            stage,
            output_path: output,
            size_bytes,
            elapsed,
            success: true,
            error: None,
        })
    }

    fn handle_line(&mut self, line: &str, tail: &mut VecDeque<String>) {
        match parse_engine_line(line) {
            EngineLine::Progress { elapsed_secs } => {
                let total = self.invocation.expected_duration_secs;
                let ratio = if total > 0.0 { elapsed_secs / total } else { 0.0 };
                self.emit(self.window.percent(ratio), elapsed_secs);
                return;
            }
            EngineLine::Error(msg) => {
                warn!(job = %self.job_id, stage = self.invocation.stage.index(), "{}", msg);
            }
            EngineLine::Unrecognized => {
                trace!(job = %self.job_id, "{}", line);
            }
        }

        if self.tail_lines == 0 {
            return;
        }
        if tail.len() == self.tail_lines {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }

    fn emit(&mut self, percent: f64, elapsed_secs: f64) {
        let percent = percent.max(self.high_water);
        self.high_water = percent;
        self.observer.on_progress(ProgressEvent {
            job_id: self.job_id.clone(),
            stage: self.invocation.stage,
            elapsed_secs,
            percent,
        });
    }

    async fn abort(
        &mut self,
        mut child: Child,
        readers: Vec<JoinHandle<()>>,
    ) -> Result<StageResult, SupervisorError> {
        info!(job = %self.job_id, "Cancelling {}", self.invocation.stage);
        let _ = child.start_kill();
        let _ = child.wait().await;
        for reader in readers {
            reader.abort();
        }
        let _ = fs::remove_file(&self.invocation.output_path);
        self.state = SupervisorState::Cancelled;
        Err(SupervisorError::Cancelled)
    }

    fn fail_cleanup(&mut self) {
        let _ = fs::remove_file(&self.invocation.output_path);
        self.state = SupervisorState::Failed;
    }
}

fn output_size(path: &Path) -> u64 {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .unwrap_or(0)
}

async fn pump_lines<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    if let Some(line) = splitter.finish() {
        let _ = tx.send(line).await;
    }
}
