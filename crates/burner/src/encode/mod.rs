//! Engine invocation: command building, the output line protocol and process supervision.

pub mod ffmpeg;
pub mod progress;
pub mod supervisor;

use serde::{Deserialize, Serialize};

pub use ffmpeg::{build_stage_invocation, EngineInvocation, StageInput};
pub use progress::{parse_engine_line, EngineLine, LineSplitter, ProgressWindow};
pub use supervisor::{ProcessSupervisor, StageResult, SupervisorError, SupervisorState};

/// The two transcode passes of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Stage 1: burn the subtitle into the video.
    SubtitleBurn,
    /// Stage 2: composite the logo over the video.
    LogoOverlay,
}

impl Stage {
    /// 1-based stage index.
    pub fn index(&self) -> u8 {
        match self {
            Stage::SubtitleBurn => 1,
            Stage::LogoOverlay => 2,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::SubtitleBurn => write!(f, "stage 1 (subtitle burn-in)"),
            Stage::LogoOverlay => write!(f, "stage 2 (logo overlay)"),
        }
    }
}
