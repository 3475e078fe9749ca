//! Job descriptors and the per-job artifact paths derived from them.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of every file the engine writes.
const OUTPUT_EXTENSION: &str = "mp4";

/// One leaf folder worth of work: a video, an optional subtitle and a destination.
///
/// Created by the scanner and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// Folder the job was discovered in.
    pub source_folder: PathBuf,
    /// Path to the input video file.
    pub video: PathBuf,
    /// Subtitle to burn in, if the folder had one.
    pub subtitle: Option<PathBuf>,
    /// Folder receiving the final output.
    pub destination: PathBuf,
}

impl Job {
    /// Create a new job with a fresh identifier.
    pub fn new(
        source_folder: PathBuf,
        video: PathBuf,
        subtitle: Option<PathBuf>,
        destination: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_folder,
            video,
            subtitle,
            destination,
        }
    }

    /// File stem of the video, used to name every derived artifact.
    pub fn video_stem(&self) -> String {
        self.video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }

    /// Short label for logs: the source folder name.
    pub fn label(&self) -> String {
        self.source_folder
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_folder.display().to_string())
    }
}

/// Files a job may leave in its destination folder.
///
/// Every path lives inside the job's own destination folder and embeds the video
/// stem, so concurrent jobs never share an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct JobArtifacts {
    /// Stage 1 output, consumed by stage 2.
    pub intermediate: PathBuf,
    /// Stage 2 output.
    pub final_output: PathBuf,
}

impl JobArtifacts {
    /// Derive artifact paths for a job.
    ///
    /// `/out/show/ep01.mkv` with suffix `_burned` yields
    /// `/out/show/ep01_burned.mp4` and `/out/show/ep01_burned.stage1.mp4`.
    pub fn for_job(job: &Job, cfg: &PipelineConfig) -> Self {
        Self::in_destination(&job.destination, &job.video_stem(), &cfg.output_suffix)
    }

    /// The same artifacts with the destination folder resolved to an absolute path.
    ///
    /// The destination folder must exist.
    pub fn resolved(&self) -> io::Result<Self> {
        let dir = match self.final_output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::canonicalize(parent)?,
            _ => std::env::current_dir()?,
        };
        let rebase = |path: &Path| match path.file_name() {
            Some(name) => dir.join(name),
            None => path.to_path_buf(),
        };
        Ok(Self {
            intermediate: rebase(&self.intermediate),
            final_output: rebase(&self.final_output),
        })
    }

    fn in_destination(destination: &Path, stem: &str, suffix: &str) -> Self {
        let base = format!("{}{}", stem, suffix);
        Self {
            intermediate: destination.join(format!("{}.stage1.{}", base, OUTPUT_EXTENSION)),
            final_output: destination.join(format!("{}.{}", base, OUTPUT_EXTENSION)),
        }
    }
}
