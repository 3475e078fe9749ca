//! Startup checks.
//!
//! Verifies once, before the batch, that the engine and prober can be launched and
//! that the overlay assets are in place. Problems are reported, never fatal: every
//! job re-checks what it needs and fails on its own.

use crate::config::{AssetsConfig, Config};
use crate::logo::{logo_path, LogoTier};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{} not available: {detail}", .program.display())]
    ToolUnavailable { program: PathBuf, detail: String },

    #[error("Logo asset for tier {tier} missing: {}", .path.display())]
    AssetMissing { tier: LogoTier, path: PathBuf },
}

/// What the startup checks found.
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Major version of the engine, when its banner could be parsed.
    pub engine_major_version: Option<u32>,
    pub problems: Vec<StartupError>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn engine_unavailable(&self) -> bool {
        self.problems
            .iter()
            .any(|p| matches!(p, StartupError::ToolUnavailable { .. }))
    }
}

/// Extract the major version from a `<tool> version ...` banner.
///
/// Handles `ffmpeg version 6.1.1-3ubuntu5`, `ffmpeg version n7.0-...` and
/// git builds like `ffmpeg version N-113542-g...` (which have no major version).
pub fn parse_version_banner(output: &str, tool: &str) -> Option<u32> {
    let needle = format!("{} version", tool.to_lowercase());
    let line = output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(&needle))?;

    let version = line
        .split(needle.as_str())
        .nth(1)?
        .split_whitespace()
        .next()?
        .trim_start_matches('n')
        .to_string();

    version.split(['.', '-']).next()?.parse().ok()
}

/// Major version from `ffmpeg -version` output.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    parse_version_banner(version_output, "ffmpeg")
}

/// Run `<program> -version` and return its stdout.
async fn run_version(program: &Path) -> Result<String, StartupError> {
    let output = Command::new(program)
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| StartupError::ToolUnavailable {
            program: program.to_path_buf(),
            detail: format!("failed to run -version; is it installed and on PATH? ({})", e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            program: program.to_path_buf(),
            detail: format!("-version exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check the engine can be launched; returns its major version if known.
pub async fn check_engine_available(ffmpeg: &Path) -> Result<Option<u32>, StartupError> {
    let output = run_version(ffmpeg).await?;
    Ok(parse_ffmpeg_version(&output))
}

/// Check the prober can be launched.
pub async fn check_probe_available(ffprobe: &Path) -> Result<(), StartupError> {
    run_version(ffprobe).await.map(|_| ())
}

/// Both overlay assets, reporting the ones missing.
pub fn check_assets(assets: &AssetsConfig) -> Vec<StartupError> {
    [LogoTier::Hd720, LogoTier::Hd1080]
        .into_iter()
        .filter_map(|tier| {
            let path = logo_path(tier, assets);
            (!path.is_file()).then_some(StartupError::AssetMissing { tier, path })
        })
        .collect()
}

/// Run every startup check and log the results.
pub async fn run_startup_checks(cfg: &Config) -> StartupReport {
    let mut report = StartupReport::default();

    match check_engine_available(&cfg.engine.ffmpeg_path).await {
        Ok(Some(major)) => {
            info!("Using {} (major version {})", cfg.engine.ffmpeg_path.display(), major);
            report.engine_major_version = Some(major);
        }
        Ok(None) => info!(
            "Using {} (unrecognized version banner)",
            cfg.engine.ffmpeg_path.display()
        ),
        Err(e) => {
            error!("{}", e);
            report.problems.push(e);
        }
    }

    if let Err(e) = check_probe_available(&cfg.engine.ffprobe_path).await {
        error!("{}", e);
        report.problems.push(e);
    }

    for problem in check_assets(&cfg.assets) {
        warn!("{}", problem);
        report.problems.push(problem);
    }

    report
}
