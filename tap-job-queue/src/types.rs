//! Core types shared by jobs and the job manager.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Form content type used for UWS parameter submission.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Lifecycle status of a job.
///
/// `Pending`, `Queued` and `Executing` are in-flight states. `Completed`,
/// `Error`, `Canceled` and `Timeout` are terminal. `Unknown` is what an
/// unrecognized remote phase maps to; jobs record it as `Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Canceled,
    Timeout,
    Unknown,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Canceled | Self::Timeout
        )
    }

    /// Map a phase token reported by the service to a status.
    ///
    /// The token is trimmed and compared case-insensitively. Anything not
    /// recognized yields [`JobStatus::Unknown`].
    pub fn from_phase(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "QUEUED" => Self::Queued,
            "EXECUTING" => Self::Executing,
            "COMPLETED" => Self::Completed,
            "ERROR" => Self::Error,
            "ABORTED" | "CANCELED" | "CANCELLED" => Self::Canceled,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        })
    }
}

/// Fully-formed submission request for a job.
///
/// Built once by the caller and never modified afterwards; the job sends it
/// exactly once.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    #[inline]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            content_type: None,
            body: None,
        }
    }

    /// Attach a form-encoded body.
    pub fn with_form_body(mut self, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(FORM_CONTENT_TYPE.to_owned());
        self.body = Some(body.into());
        self
    }
}

/// Point-in-time view of a job, safe to log or serialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub remote_job_id: Option<String>,
    pub job_url: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_size: Option<usize>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
}
