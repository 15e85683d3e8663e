use std::time::Duration;

use anyhow::Context;
use tap_config::Config;
use tap_job_queue::{
    async_job_request, AsyncJobParams, HttpClient, Job, JobManager, ManagerOptions, Query,
};
use url::Url;

/// Resolve the service base URL, which has no default.
pub fn base_url_from_config(cfg: &Config) -> anyhow::Result<Url> {
    let raw = cfg
        .service
        .base_url
        .as_deref()
        .context("no service URL configured (use --service or TAPJOBS_SERVICE_URL)")?;
    Url::parse(raw).with_context(|| format!("invalid service URL: {raw}"))
}

pub fn manager_from_config(cfg: &Config) -> JobManager {
    JobManager::with_options(ManagerOptions {
        max_parallel: cfg.jobs.max_parallel,
        ..ManagerOptions::default()
    })
}

pub fn async_params_from_config(cfg: &Config, max_records: Option<u64>) -> AsyncJobParams {
    AsyncJobParams {
        format: cfg.jobs.format.clone(),
        max_records,
    }
}

/// Build a job submitting `query` with the configured timing.
pub fn job_from_config(
    cfg: &Config,
    base_url: &Url,
    query: &dyn Query,
    params: &AsyncJobParams,
    client: HttpClient,
) -> anyhow::Result<Job> {
    let request = async_job_request(base_url, query, params)
        .with_context(|| format!("cannot build job submission for {base_url}"))?;
    Ok(Job::new(request, client)
        .with_timeout(Duration::from_secs(cfg.jobs.timeout_secs))
        .with_poll_interval(Duration::from_millis(cfg.jobs.poll_interval_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tap_job_queue::{http_client, TextQuery};

    fn config_with_url(url: Option<&str>) -> Config {
        let mut cfg = Config::default();
        cfg.service.base_url = url.map(str::to_owned);
        cfg
    }

    #[test]
    fn base_url_is_required() {
        assert!(base_url_from_config(&config_with_url(None)).is_err());
        let url = base_url_from_config(&config_with_url(Some("https://tap.example.org/tap")))
            .unwrap();
        assert_eq!(url.host_str(), Some("tap.example.org"));
    }

    #[test]
    fn manager_uses_configured_cap() {
        let mut cfg = Config::default();
        cfg.jobs.max_parallel = 3;
        assert_eq!(manager_from_config(&cfg).max_parallel(), 3);
    }

    #[test]
    fn job_uses_configured_timing() {
        let mut cfg = config_with_url(Some("https://tap.example.org/tap"));
        cfg.jobs.timeout_secs = 42;
        cfg.jobs.poll_interval_ms = 250;
        cfg.jobs.format = Some("csv".into());
        let base = base_url_from_config(&cfg).unwrap();
        let params = async_params_from_config(&cfg, Some(10));

        let job = job_from_config(
            &cfg,
            &base,
            &TextQuery::adql("SELECT 1"),
            &params,
            http_client("tests").unwrap(),
        )
        .unwrap();

        assert_eq!(job.timeout(), Duration::from_secs(42));
        assert_eq!(job.poll_interval(), Duration::from_millis(250));
        assert_eq!(job.request().url.as_str(), "https://tap.example.org/tap/async");
        let body = job.request().body.as_ref().unwrap();
        assert!(std::str::from_utf8(body).unwrap().ends_with("FORMAT=csv&MAXREC=10"));
    }
}
