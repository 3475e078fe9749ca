//! subburn
//!
//! Batch subtitle burn-in and logo overlay. Each job folder goes through two
//! supervised ffmpeg stages with resumable intermediates and completion markers.

pub mod batch;
pub mod cancel;
pub mod concurrency;
pub mod encode;
pub mod job;
pub mod logging;
pub mod logo;
pub mod marker;
pub mod observer;
pub mod pipeline;
pub mod probe;
pub mod scan;
pub mod startup;
pub mod subtitle;
pub mod summary;

#[cfg(all(test, unix))]
mod test_support;

pub use subburn_config as config;
pub use subburn_config::Config;

pub use batch::BatchRunner;
pub use cancel::CancelToken;
pub use concurrency::ConcurrencyPlan;
pub use encode::{
    build_stage_invocation, EngineInvocation, ProcessSupervisor, Stage, StageInput,
    StageResult, SupervisorError, SupervisorState,
};
pub use job::{Job, JobArtifacts};
pub use logging::init_logging;
pub use logo::{select_logo, AssetMissingError, LogoTier};
pub use observer::{
    ChannelObserver, LogObserver, NoopObserver, PipelineEvent, PipelineObserver, ProgressEvent,
};
pub use pipeline::{
    FailureKind, FailureReason, OutcomeStatus, Pipeline, PipelineError, PipelineOutcome,
};
pub use probe::{probe_media, ProbeError, VideoMetadata};
pub use scan::{scan_jobs, ScanEntry};
pub use startup::{run_startup_checks, StartupError, StartupReport};
pub use subtitle::{
    detect_encoding, normalize_subtitle, SourceEncoding, SubtitleAsset, SubtitleError,
};
pub use summary::{BatchSummary, JobStatus, JobSummary};
