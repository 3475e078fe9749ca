//! Media probing.
//!
//! Queries ffprobe for the primary video stream's dimensions and the container
//! duration. The duration drives progress percentages; the height drives logo
//! selection.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe could not be started.
    #[error("Failed to launch ffprobe: {0}")]
    Launch(#[source] std::io::Error),

    /// ffprobe exited with a non-zero status.
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    /// Output was not the expected JSON document.
    #[error("Failed to parse ffprobe output: {0}")]
    Parse(String),

    /// The file has no video stream (cover art does not count).
    #[error("No video stream found")]
    NoVideoStream,

    /// The video stream reports a zero or missing width/height.
    #[error("Invalid video dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Duration is missing, unparsable, zero or negative.
    #[error("Invalid or missing duration")]
    InvalidDuration,
}

/// Metadata needed to drive one job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    /// Width of the primary video stream in pixels.
    pub width: u32,
    /// Height of the primary video stream in pixels.
    pub height: u32,
    /// Duration in fractional seconds, always > 0.
    pub duration_secs: f64,
}

mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub duration: Option<String>,
        pub disposition: Option<Disposition>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Disposition {
        #[serde(default)]
        pub attached_pic: u8,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Probe a video file.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <video>`.
pub async fn probe_media(ffprobe: &Path, video: &Path) -> Result<VideoMetadata, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(video)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ProbeError::Launch)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::ProbeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let meta = parse_probe_output(&stdout)?;
    debug!(
        video = %video.display(),
        width = meta.width,
        height = meta.height,
        duration = meta.duration_secs,
        "Probed video"
    );
    Ok(meta)
}

fn parse_seconds(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse ffprobe JSON into [`VideoMetadata`].
///
/// The primary stream is the first `video` stream that is not an attached picture.
/// Duration comes from the container, falling back to the stream.
pub fn parse_probe_output(json_str: &str) -> Result<VideoMetadata, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = parsed.streams.unwrap_or_default();
    let primary = streams
        .iter()
        .find(|s| {
            s.codec_type.as_deref() == Some("video")
                && s.disposition.as_ref().map_or(true, |d| d.attached_pic == 0)
        })
        .ok_or(ProbeError::NoVideoStream)?;

    let width = primary.width.unwrap_or(0);
    let height = primary.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(ProbeError::InvalidDimensions { width, height });
    }

    let duration_secs = parse_seconds(parsed.format.as_ref().and_then(|f| f.duration.as_ref()))
        .or_else(|| parse_seconds(primary.duration.as_ref()))
        .ok_or(ProbeError::InvalidDuration)?;

    Ok(VideoMetadata {
        width,
        height,
        duration_secs,
    })
}
