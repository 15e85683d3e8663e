//! Client-side controller for asynchronous (UWS) query jobs.
//!
//! A [`Job`] submits one request to a TAP-style service, discovers the job
//! URL the service assigned to it, starts it, polls its phase and fetches the
//! result. A [`JobManager`] owns the jobs, caps how many run at once and lets
//! callers cancel or wait on them.
//!
//! # Architecture
//!
//! - [`Job`] - One remote job and its run loop
//! - [`JobManager`] - Registry, admission gate and wait/cancel operations
//! - [`Query`] / [`async_job_request`] - Build the submission request
//! - [`JobError`] - Failures surfaced by a run loop or by waiting
//!
//! # Example
//!
//! ```rust,no_run
//! use tap_job_queue::{async_job_request, http_client, AsyncJobParams, Job, JobManager, TextQuery};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = Url::parse("https://example.org/tap")?;
//!     let query = TextQuery::adql("SELECT TOP 10 * FROM ivoa.obscore");
//!     let request = async_job_request(&base, &query, &AsyncJobParams::default())?;
//!
//!     let manager = JobManager::new();
//!     let job = manager
//!         .add_process(Job::new(request, http_client("example/0.1")?))
//!         .await;
//!     manager.start_process(job.id()).await;
//!     manager.wait_for_completion(job.id()).await?;
//!
//!     if let Some(result) = job.result().await {
//!         println!("{} bytes", result.len());
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod job;
mod manager;
mod query;
mod types;

pub use error::JobError;
pub use job::{http_client, Job, DEFAULT_JOB_TIMEOUT, DEFAULT_POLL_INTERVAL};
pub use manager::{JobManager, ManagerOptions, DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_PARALLEL};
pub use query::{async_job_request, AsyncJobParams, Query, QueryLanguage, TextQuery};
pub use types::{JobSnapshot, JobStatus, RequestDescriptor, FORM_CONTENT_TYPE};

// Re-exported so callers can build jobs and stop the monitor loop without
// depending on these crates directly.
pub use reqwest::Client as HttpClient;
pub use tokio_util::sync::CancellationToken;
