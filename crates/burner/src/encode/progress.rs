//! Line protocol spoken by the transcoding engine on its diagnostic stream.
//!
//! ffmpeg terminates its periodic stats line with `\r` and everything else with
//! `\n`, so raw output is first split into lines on either byte, then each line is
//! classified as progress, error or noise.

use super::Stage;

/// Marker preceding the elapsed media time in a stats line.
const TIME_TOKEN: &str = "time=";

/// Substrings identifying an engine error line.
const ERROR_MARKERS: [&str; 2] = ["Error", "Invalid"];

/// One classified engine output line.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    /// Stats line carrying the elapsed media time.
    Progress { elapsed_secs: f64 },
    /// Line reporting a problem.
    Error(String),
    /// Anything else.
    Unrecognized,
}

/// Classify a single line of engine output.
pub fn parse_engine_line(line: &str) -> EngineLine {
    if let Some(idx) = line.find(TIME_TOKEN) {
        let rest = &line[idx + TIME_TOKEN.len()..];
        let token = rest.split_whitespace().next().unwrap_or("");
        if let Some(elapsed_secs) = parse_timestamp(token) {
            return EngineLine::Progress { elapsed_secs };
        }
    }

    if ERROR_MARKERS.iter().any(|m| line.contains(m)) {
        return EngineLine::Error(line.trim().to_string());
    }

    EngineLine::Unrecognized
}

/// Parse `[-]H+:MM:SS[.F+]` into seconds. Negative times read as zero.
pub fn parse_timestamp(token: &str) -> Option<f64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };

    let mut parts = body.split(':');
    let hours = parts.next()?;
    let minutes = parts.next()?;
    let seconds = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(hours) || minutes.len() != 2 || !all_digits(minutes) {
        return None;
    }

    let (whole, frac) = match seconds.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (seconds, None),
    };
    if whole.len() != 2 || !all_digits(whole) || frac.is_some_and(|f| !all_digits(f)) {
        return None;
    }

    let hours: f64 = hours.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;

    if negative {
        return Some(0.0);
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Longest line kept; anything past it is dropped until the next terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lines on `\n` or `\r`.
///
/// Empty lines are dropped, invalid UTF-8 is replaced and lines are cut at
/// [`MAX_LINE_BYTES`].
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else if self.pending.len() < MAX_LINE_BYTES {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Return the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if !self.pending.is_empty() {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
    }
}

/// Portion of the job-wide 0-100 scale covered by one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub start: f64,
    pub span: f64,
}

impl ProgressWindow {
    /// Window covering the whole job.
    pub const FULL: ProgressWindow = ProgressWindow {
        start: 0.0,
        span: 100.0,
    };

    /// Window for a stage, given whether the job runs the subtitle stage at all.
    pub fn for_stage(stage: Stage, with_subtitle_stage: bool) -> Self {
        match (stage, with_subtitle_stage) {
            (_, false) => Self::FULL,
            (Stage::SubtitleBurn, true) => ProgressWindow {
                start: 0.0,
                span: 50.0,
            },
            (Stage::LogoOverlay, true) => ProgressWindow {
                start: 50.0,
                span: 50.0,
            },
        }
    }

    /// Map a stage-local completion ratio to a job-wide percentage in [0, 100].
    pub fn percent(&self, ratio: f64) -> f64 {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (self.start + ratio * self.span).clamp(0.0, 100.0)
    }

    /// Percentage reached when the stage completes.
    pub fn end(&self) -> f64 {
        self.percent(1.0)
    }
}
