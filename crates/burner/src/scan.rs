//! Job discovery.
//!
//! Every leaf folder below the input root is one job: exactly one recognized video
//! and at most one recognized subtitle. Folders are classified up front so the
//! batch runner knows what is pending, what is already done and what is broken.

use crate::job::{Job, JobArtifacts};
use crate::marker;
use crate::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Classification of one job folder.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEntry {
    /// Ready to run.
    Pending(Job),
    /// The final output exists and matches its completion marker.
    AlreadyDone(Job),
    /// The folder cannot become a job.
    Error { folder: PathBuf, reason: String },
}

impl ScanEntry {
    pub fn folder(&self) -> &Path {
        match self {
            ScanEntry::Pending(job) | ScanEntry::AlreadyDone(job) => &job.source_folder,
            ScanEntry::Error { folder, .. } => folder,
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Checks if a file has one of `extensions` (no dot, case-insensitive).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// A directory is a leaf when it has no visible subdirectories.
fn is_leaf_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(entries) => !entries
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false) && !is_hidden(&e.path())),
        Err(_) => false,
    }
}

/// Classify a single folder as a job.
pub fn classify_folder(folder: &Path, destination: PathBuf, cfg: &Config) -> ScanEntry {
    let error = |reason: String| ScanEntry::Error {
        folder: folder.to_path_buf(),
        reason,
    };

    let mut files: Vec<PathBuf> = match fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| !is_hidden(p))
            .collect(),
        Err(e) => return error(format!("cannot read folder: {}", e)),
    };
    files.sort();

    let videos: Vec<&PathBuf> = files
        .iter()
        .filter(|p| has_extension(p, &cfg.scan.video_extensions))
        .collect();
    let subtitles: Vec<&PathBuf> = files
        .iter()
        .filter(|p| has_extension(p, &cfg.scan.subtitle_extensions))
        .collect();

    let video = match videos.as_slice() {
        [] => return error("no video file".to_string()),
        [video] => (*video).clone(),
        many => return error(format!("{} video files, expected one", many.len())),
    };
    let subtitle = match subtitles.as_slice() {
        [] => None,
        [subtitle] => Some((*subtitle).clone()),
        many => return error(format!("{} subtitle files, expected at most one", many.len())),
    };

    let job = Job::new(folder.to_path_buf(), video, subtitle, destination);
    let artifacts = JobArtifacts::for_job(&job, &cfg.pipeline);
    if marker::is_complete(&artifacts.final_output) {
        ScanEntry::AlreadyDone(job)
    } else {
        ScanEntry::Pending(job)
    }
}

/// Scan `paths.input_root` for job folders.
///
/// Hidden directories are skipped. Entries are ordered by folder path.
pub fn scan_jobs(cfg: &Config) -> Vec<ScanEntry> {
    let root = &cfg.paths.input_root;
    if !root.is_dir() {
        warn!("Input root {} does not exist", root.display());
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && is_hidden(entry.path())));

    let mut entries = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() || !is_leaf_dir(entry.path()) {
            continue;
        }
        let folder = entry.path();
        let relative = folder.strip_prefix(root).unwrap_or(folder);
        let destination = cfg.paths.output_root.join(relative);
        let classified = classify_folder(folder, destination, cfg);
        debug!(folder = %folder.display(), entry = ?classified, "Classified folder");
        entries.push(classified);
    }
    entries
}
