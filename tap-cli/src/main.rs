//! tapjobs
//!
//! Submits each query given on the command line as an asynchronous job,
//! runs them through the job manager and writes the results out.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tap_config::{load_config, validate_config};
use tap_job_queue::{http_client, CancellationToken, Job, JobStatus, QueryLanguage, TextQuery};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{
    async_params_from_config, base_url_from_config, job_from_config, manager_from_config,
};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = load_config(args.config_path.as_ref())
        .with_context(|| format!("failed to load config from {:?}", args.config_path))?;
    args.apply_to(&mut config);
    validate_config(&config)?;

    install_tracing_from_config(&config.logging);

    let base_url = base_url_from_config(&config)?;
    let client = http_client(&config.service.user_agent)?;
    let manager = manager_from_config(&config);
    let params = async_params_from_config(&config, args.maxrec);
    let language = QueryLanguage::from(args.lang.as_str());

    let mut ids = Vec::with_capacity(args.queries.len());
    for text in &args.queries {
        let query = TextQuery::new(language.clone(), text.clone());
        let job = job_from_config(&config, &base_url, &query, &params, client.clone())?;
        let job = manager.add_process(job).await;
        ids.push(job.id().to_owned());
    }
    info!(
        jobs = ids.len(),
        base_url = %base_url,
        max_parallel = manager.max_parallel(),
        "jobs registered"
    );

    let shutdown = CancellationToken::new();
    let monitor = args.monitor.then(|| {
        let manager = manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { manager.monitor_processes(shutdown).await })
    });

    // start_process blocks while every slot is taken, so jobs are fed to the
    // manager from their own task while this one waits on them in order.
    let starter = {
        let manager = manager.clone();
        let ids = ids.clone();
        tokio::spawn(async move {
            for id in &ids {
                manager.start_process(id).await;
            }
        })
    };

    let interrupt = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling jobs");
                for job in manager.get_all_processes().await {
                    job.cancel();
                }
            }
        })
    };

    let mut failures = 0usize;
    for id in &ids {
        match manager.wait_for_completion(id).await {
            Ok(()) => {
                if let Some(job) = manager.get_process(id).await {
                    write_result(&job, args.output_dir.as_deref()).await?;
                }
            }
            Err(err) => {
                failures += 1;
                let reason = match err.job() {
                    Some(job) => job.error_message().await,
                    None => None,
                };
                error!(job_id = %id, error = %err, reason = ?reason, "job failed");
            }
        }
    }

    starter.await?;
    interrupt.abort();
    shutdown.cancel();
    if let Some(monitor) = monitor {
        monitor.await?;
    }

    for job in manager.get_all_processes().await {
        let snapshot = job.snapshot().await;
        info!(summary = %serde_json::to_string(&snapshot)?, "job summary");
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} jobs failed", ids.len());
    }
    Ok(())
}

/// Write a finished job's result to `<dir>/<id>.out`, or to stdout.
async fn write_result(job: &Arc<Job>, output_dir: Option<&Path>) -> anyhow::Result<()> {
    let Some(result) = job.result().await else {
        if job.status().await == JobStatus::Canceled {
            warn!(job_id = %job.id(), "job canceled, no result");
        }
        return Ok(());
    };

    match output_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("cannot create {}", dir.display()))?;
            let path = dir.join(format!("{}.out", job.id()));
            tokio::fs::write(&path, &result)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!(job_id = %job.id(), path = %path.display(), bytes = result.len(), "result written");
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&result).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
