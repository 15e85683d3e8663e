use std::path::PathBuf;

use clap::Parser;
use tap_config::Config;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "tapjobs",
    version,
    about = "Run queries as asynchronous jobs against a TAP service"
)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", env = "TAPJOBS_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Base URL of the TAP service (the job list lives at `<URL>/async`)
    #[arg(long, value_name = "URL")]
    pub service: Option<String>,

    /// Query language identifier
    #[arg(long, default_value = "ADQL")]
    pub lang: String,

    /// Requested result format
    #[arg(long)]
    pub format: Option<String>,

    /// Maximum number of records to return
    #[arg(long)]
    pub maxrec: Option<u64>,

    /// Maximum number of jobs running at once
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Per-job timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write each result to `<DIR>/<job-id>.out` instead of stdout
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Log the status of every job while waiting
    #[arg(long)]
    pub monitor: bool,

    /// Queries to run, one job each
    #[arg(required = true, value_name = "QUERY")]
    pub queries: Vec<String>,
}

impl CliArgs {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_to(&self, cfg: &mut Config) {
        if let Some(service) = &self.service {
            cfg.service.base_url = Some(service.clone());
        }
        if let Some(format) = &self.format {
            cfg.jobs.format = Some(format.clone());
        }
        if let Some(max_parallel) = self.max_parallel {
            cfg.jobs.max_parallel = max_parallel;
        }
        if let Some(timeout) = self.timeout {
            cfg.jobs.timeout_secs = timeout;
        }
    }
}
