//! Job-level concurrency planning.
//!
//! Transcoding is memory-bound, so the default is one job at a time. Operators can
//! raise the limit explicitly, or set it to 0 to derive one from the core count.

use crate::config::Config;

/// Cores assumed to be saturated by a single transcode.
const CORES_PER_JOB: u32 = 8;

/// How many jobs the batch runner may run at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Logical CPU cores detected
    pub total_cores: u32,
    /// Maximum number of jobs in flight, always >= 1
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a plan from configuration and the detected core count.
    pub fn derive(cfg: &Config) -> Self {
        Self::for_cores(cfg, num_cpus::get() as u32)
    }

    /// Derive a plan for a known core count.
    ///
    /// An explicit `max_concurrent_jobs > 0` is used as-is; `0` derives
    /// `max(1, cores / 8)`.
    pub fn for_cores(cfg: &Config, total_cores: u32) -> Self {
        let max_concurrent_jobs = if cfg.pipeline.max_concurrent_jobs > 0 {
            cfg.pipeline.max_concurrent_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
        }
    }

    /// A plan running exactly `jobs` jobs at once (at least one).
    pub fn fixed(jobs: u32) -> Self {
        Self {
            total_cores: num_cpus::get() as u32,
            max_concurrent_jobs: jobs.max(1),
        }
    }
}

fn derive_max_jobs(cores: u32) -> u32 {
    (cores / CORES_PER_JOB).max(1)
}
