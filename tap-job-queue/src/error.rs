//! Error types for the job lifecycle.

use std::sync::Arc;

use thiserror::Error;

use crate::job::Job;

/// Failures raised by a job's run loop or by waiting on a job.
///
/// Cancellation is not an error and has no variant here.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} submission failed (http status {status:?}): {reason}")]
    Submission {
        job_id: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("job {} reported a service error", .job.id())]
    ServiceError { job: Arc<Job> },

    #[error("job {} timed out after {:?}", .job.id(), .job.timeout())]
    TimedOut { job: Arc<Job> },

    #[error("transport error for job {job_id}: {source}")]
    Transport {
        job_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid job url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

impl JobError {
    /// The job this failure refers to, when it carries one.
    pub fn job(&self) -> Option<&Arc<Job>> {
        match self {
            Self::ServiceError { job } | Self::TimedOut { job } => Some(job),
            _ => None,
        }
    }
}
