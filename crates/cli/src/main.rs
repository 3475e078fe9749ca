//! CLI entry point for subburn
//!
//! Loads configuration, scans the input tree and runs every job folder through the
//! burn-in pipeline. Ctrl-C stops admitting new jobs and lets running ones finish
//! their cleanup.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use subburn::{
    init_logging, run_startup_checks, scan_jobs, BatchRunner, BatchSummary, CancelToken,
    ConcurrencyPlan, Config, JobStatus, LogObserver, Pipeline,
};
use tracing::{info, warn};

/// Exit code used when the batch was interrupted.
const EXIT_CANCELLED: u8 = 130;

/// subburn - burn subtitles and a logo overlay into a folder tree of videos
#[derive(Parser, Debug)]
#[command(name = "subburn")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; missing file means defaults
    #[arg(short, long, default_value = "subburn.toml")]
    config: PathBuf,

    /// Input root (overrides paths.input_root)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output root (overrides paths.output_root)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Logo asset directory (overrides assets.dir)
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Jobs to run at once; 0 derives a limit from the core count
    #[arg(short, long)]
    jobs: Option<u32>,

    /// Skip the ffmpeg/ffprobe/asset checks before the batch
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Print the batch summary as JSON on stdout
    #[arg(long, default_value = "false")]
    json_summary: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(input) = &self.input {
            cfg.paths.input_root = input.clone();
        }
        if let Some(output) = &self.output {
            cfg.paths.output_root = output.clone();
        }
        if let Some(assets) = &self.assets {
            cfg.assets.dir = assets.clone();
        }
        if let Some(jobs) = self.jobs {
            cfg.pipeline.max_concurrent_jobs = jobs;
        }
        match self.verbose {
            0 => {}
            1 => cfg.logging.level = "debug".to_string(),
            _ => cfg.logging.level = "trace".to_string(),
        }
    }
}

/// Describe a size reduction percentage; negative means the file grew.
fn size_change(reduction_pct: f64) -> String {
    if reduction_pct < 0.0 {
        format!("{:.1}% larger", -reduction_pct)
    } else {
        format!("{:.1}% smaller", reduction_pct)
    }
}

fn print_summary(summary: &BatchSummary) {
    for job in &summary.jobs {
        let status = match job.status {
            JobStatus::Succeeded => "ok",
            JobStatus::Skipped => "skipped",
            JobStatus::Failed => "FAILED",
            JobStatus::NotStarted => "not started",
        };
        let mut line = format!("{:<12} {}", status, job.folder.display());
        if let Some(pct) = job.size_reduction_pct {
            line.push_str(&format!("  ({})", size_change(pct)));
        }
        if let Some(detail) = &job.detail {
            line.push_str(&format!("  {}", detail));
        }
        println!("{}", line);
    }

    println!(
        "\n{} succeeded, {} skipped, {} failed, {} not started",
        summary.succeeded, summary.skipped, summary.failed, summary.not_started
    );
    if let Some(avg) = summary.average_reduction_pct() {
        println!("Average size change: {}", size_change(avg));
    }
    if summary.cancelled {
        println!("Batch was cancelled.");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut cfg = match Config::load_or_default(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut cfg);
    init_logging(&cfg.logging);

    info!(
        config = %args.config.display(),
        input = %cfg.paths.input_root.display(),
        output = %cfg.paths.output_root.display(),
        "subburn starting"
    );

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else {
        let report = run_startup_checks(&cfg).await;
        if !report.is_clean() {
            warn!(
                problems = report.problems.len(),
                "Startup checks reported problems; affected jobs will fail"
            );
        }
    }

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing running jobs, no new jobs will start");
            on_interrupt.cancel();
        }
    });

    let entries = scan_jobs(&cfg);
    let plan = ConcurrencyPlan::derive(&cfg);
    let pipeline = Arc::new(Pipeline::new(Arc::new(cfg), Arc::new(LogObserver::new())));
    let summary = BatchRunner::new(pipeline, plan, cancel).run(entries).await;

    if args.json_summary {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize summary: {}", e),
        }
    } else {
        print_summary(&summary);
    }

    if summary.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_change_wording() {
        assert_eq!(size_change(25.0), "25.0% smaller");
        assert_eq!(size_change(0.0), "0.0% smaller");
        assert_eq!(size_change(-12.0), "12.0% larger");
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from(["subburn", "--input", "/in", "--jobs", "3", "-vv"]);
        let mut cfg = Config::default();

        args.apply(&mut cfg);

        assert_eq!(cfg.paths.input_root, PathBuf::from("/in"));
        assert_eq!(cfg.pipeline.max_concurrent_jobs, 3);
        assert_eq!(cfg.logging.level, "trace");
    }
}
