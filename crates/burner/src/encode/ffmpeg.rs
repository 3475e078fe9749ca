//! ffmpeg command construction for both stages.

use super::Stage;
use crate::config::{EncodingConfig, EngineConfig};
use crate::probe::VideoMetadata;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Logo position: flush with the right edge, top of the frame.
const OVERLAY_FILTER: &str = "overlay=W-w:0";

/// Inputs specific to each stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    /// Stage 1: source video plus the UTF-8 subtitle to burn in.
    SubtitleBurn { video: PathBuf, subtitle: PathBuf },
    /// Stage 2: stage 1 output (or the source when there is no subtitle) plus the logo.
    LogoOverlay { input: PathBuf, logo: PathBuf },
}

impl StageInput {
    pub fn stage(&self) -> Stage {
        match self {
            StageInput::SubtitleBurn { .. } => Stage::SubtitleBurn,
            StageInput::LogoOverlay { .. } => Stage::LogoOverlay,
        }
    }
}

/// A fully specified engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub stage: Stage,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// File the engine is expected to produce.
    pub output_path: PathBuf,
    /// Directory the engine runs in, when the filter graph references relative paths.
    pub working_dir: Option<PathBuf>,
    /// Media duration of the input, used to turn elapsed time into a ratio.
    pub expected_duration_secs: f64,
}

impl EngineInvocation {
    /// Build a child process with stdin closed and both output streams piped.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Arguments as display strings, for logs.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Quote a file name for the filter-graph parser.
fn quote_filter_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Encoder flags shared by both stages, audio copied untouched.
fn encoding_args(enc: &EncodingConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-c:v".into(),
        enc.video_codec.clone().into(),
        "-preset".into(),
        enc.preset.clone().into(),
        "-crf".into(),
        enc.crf.to_string().into(),
        "-tune".into(),
        enc.tune.clone().into(),
        "-profile:v".into(),
        enc.profile.clone().into(),
    ];
    if enc.faststart {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }
    args.push("-c:a".into());
    args.push("copy".into());
    args
}

/// Build the engine invocation for one stage.
///
/// Stage 1 runs inside the subtitle's directory and references it by file name,
/// so directory names never reach the filter-graph parser.
pub fn build_stage_invocation(
    engine: &EngineConfig,
    encoding: &EncodingConfig,
    input: StageInput,
    output: &Path,
    meta: &VideoMetadata,
) -> EngineInvocation {
    let stage = input.stage();
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
    let mut working_dir = None;

    match input {
        StageInput::SubtitleBurn { video, subtitle } => {
            let name = subtitle
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| subtitle.to_string_lossy().into_owned());
            working_dir = subtitle
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf);

            args.push("-i".into());
            args.push(video.into_os_string());
            args.push("-vf".into());
            args.push(format!("subtitles={}", quote_filter_value(&name)).into());
        }
        StageInput::LogoOverlay { input, logo } => {
            args.push("-i".into());
            args.push(input.into_os_string());
            args.push("-i".into());
            args.push(logo.into_os_string());
            args.push("-filter_complex".into());
            args.push(OVERLAY_FILTER.into());
        }
    }

    args.extend(encoding_args(encoding));
    args.push(output.as_os_str().to_owned());

    EngineInvocation {
        stage,
        program: engine.ffmpeg_path.clone(),
        args,
        output_path: output.to_path_buf(),
        working_dir,
        expected_duration_secs: meta.duration_secs,
    }
}
