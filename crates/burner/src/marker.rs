//! Completion markers.
//!
//! A successful stage leaves a `<output>.done` JSON sidecar recording the byte size
//! it produced. An output is only considered complete when its marker exists and
//! the recorded size still matches the file on disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix appended to an output path to form its marker path.
pub const MARKER_SUFFIX: &str = ".done";

/// Contents of a completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub output_size_bytes: u64,
    pub source_size_bytes: u64,
    pub completed_at_unix_ms: u64,
}

/// `/out/show/ep01_burned.mp4` -> `/out/show/ep01_burned.mp4.done`
pub fn marker_path(output: &Path) -> PathBuf {
    let mut marker = output.as_os_str().to_owned();
    marker.push(MARKER_SUFFIX);
    PathBuf::from(marker)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Record `output` as complete, using its current size.
pub fn write_marker(output: &Path, source_size_bytes: u64) -> io::Result<CompletionRecord> {
    let record = CompletionRecord {
        output_size_bytes: fs::metadata(output)?.len(),
        source_size_bytes,
        completed_at_unix_ms: now_unix_ms(),
    };
    let json = serde_json::to_vec_pretty(&record).map_err(io::Error::other)?;
    fs::write(marker_path(output), json)?;
    Ok(record)
}

/// Read the marker for `output`. Missing or unparsable markers read as `None`.
pub fn read_marker(output: &Path) -> Option<CompletionRecord> {
    let content = fs::read(marker_path(output)).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Whether `output` exists, is non-empty and matches its recorded size.
pub fn is_complete(output: &Path) -> bool {
    let Some(record) = read_marker(output) else {
        return false;
    };
    match fs::metadata(output) {
        Ok(meta) => meta.is_file() && meta.len() > 0 && meta.len() == record.output_size_bytes,
        Err(_) => false,
    }
}

/// Remove the marker for `output`, if any.
pub fn remove_marker(output: &Path) {
    let _ = fs::remove_file(marker_path(output));
}
