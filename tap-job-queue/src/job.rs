//! Single-job lifecycle: submission, job URL discovery, phase polling and
//! result retrieval.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::JobError;
use crate::types::{JobSnapshot, JobStatus, RequestDescriptor, FORM_CONTENT_TYPE};

/// Client-side budget for a job to reach a terminal phase.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
/// Delay between two phase polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const JOB_ID_OPEN: &str = "<jobId>";
const JOB_ID_CLOSE: &str = "</jobId>";

/// Build an HTTP client suitable for driving jobs.
///
/// Redirects are not followed: the 303 returned by job creation carries the
/// job location and must be seen by the job itself.
pub fn http_client(user_agent: &str) -> Result<Client, JobError> {
    Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(JobError::Client)
}

/// Mutable part of a job, only ever written by its run loop (and by the
/// manager's supervisor when the loop dies).
#[derive(Debug)]
struct JobState {
    status: JobStatus,
    remote_job_id: Option<String>,
    job_url: Option<Url>,
    result: Option<Bytes>,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}

impl JobState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            remote_job_id: None,
            job_url: None,
            result: None,
            error_message: None,
            updated_at: now,
        }
    }

    /// Move to `status` unless a terminal status was already reached.
    fn transition(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    fn complete(&mut self, result: Bytes) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.result = Some(result);
        true
    }

    fn fail(&mut self, status: JobStatus, message: String) -> bool {
        if !self.transition(status) {
            return false;
        }
        self.error_message = Some(message);
        true
    }
}

/// One asynchronous query execution on a remote UWS service.
pub struct Job {
    id: String,
    request: RequestDescriptor,
    client: Client,
    timeout: Duration,
    poll_interval: Duration,
    created_at: DateTime<Utc>,
    created: Instant,
    cancel: CancellationToken,
    launched: AtomicBool,
    state: RwLock<JobState>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("url", &self.request.url.as_str())
            .field("timeout", &self.timeout)
            .field("cancel_requested", &self.cancel.is_cancelled())
            .field("state", &"<RwLock<JobState>>")
            .finish()
    }
}

impl Job {
    /// Create a pending job with a generated id and default timing.
    pub fn new(request: RequestDescriptor, client: Client) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            client,
            timeout: DEFAULT_JOB_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            created_at: now,
            created: Instant::now(),
            cancel: CancellationToken::new(),
            launched: AtomicBool::new(false),
            state: RwLock::new(JobState::new(now)),
        }
    }

    /// Use a caller-supplied id instead of the generated one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn status(&self) -> JobStatus {
        self.state.read().await.status
    }

    pub async fn remote_job_id(&self) -> Option<String> {
        self.state.read().await.remote_job_id.clone()
    }

    pub async fn job_url(&self) -> Option<Url> {
        self.state.read().await.job_url.clone()
    }

    /// Result payload; present only once the job is `Completed`.
    pub async fn result(&self) -> Option<Bytes> {
        self.state.read().await.result.clone()
    }

    pub async fn error_message(&self) -> Option<String> {
        self.state.read().await.error_message.clone()
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().await.updated_at
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        let state = self.state.read().await;
        JobSnapshot {
            id: self.id.clone(),
            remote_job_id: state.remote_job_id.clone(),
            job_url: state.job_url.as_ref().map(|u| u.to_string()),
            status: state.status,
            created_at: self.created_at,
            updated_at: state.updated_at,
            result_size: state.result.as_ref().map(Bytes::len),
            error_message: state.error_message.clone(),
            cancel_requested: self.cancel.is_cancelled(),
        }
    }

    /// Request cooperative cancellation. Takes effect at the next poll
    /// boundary; an in-flight HTTP call is not interrupted.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(job_id = %self.id, "cancellation requested");
        }
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether a run loop was ever launched for this job.
    #[inline]
    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::Acquire)
    }

    /// Claim the job for launching. Only the first caller gets `true`.
    pub(crate) fn mark_launched(&self) -> bool {
        !self.launched.swap(true, Ordering::AcqRel)
    }

    /// Force the job into `Error` unless it already finished.
    pub(crate) async fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        if self.state.write().await.fail(JobStatus::Error, message.clone()) {
            warn!(job_id = %self.id, error = %message, "job failed");
        }
    }

    /// Drive the job through its whole lifecycle.
    ///
    /// Every exit path leaves the job in a terminal status. Remote `ERROR`
    /// and unrecognized phases return [`JobError::ServiceError`], an
    /// exhausted budget returns [`JobError::TimedOut`]. Cancellation returns
    /// `Ok(())`.
    pub async fn run(self: Arc<Self>) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            self.finish_canceled().await;
            return Ok(());
        }

        let job_url = match self.submit().await {
            Ok(url) => url,
            Err(err) => return Err(self.record_failure(err).await),
        };

        if let Err(err) = self.start_remote(&job_url).await {
            return Err(self.record_failure(err).await);
        }
        self.set_status(JobStatus::Executing).await;

        self.poll(&job_url).await
    }

    async fn poll(self: &Arc<Self>, job_url: &Url) -> Result<(), JobError> {
        loop {
            if self.cancel.is_cancelled() {
                self.finish_canceled().await;
                return Ok(());
            }

            if self.created.elapsed() > self.timeout {
                let message = format!("no terminal phase within {:?}", self.timeout);
                self.state
                    .write()
                    .await
                    .fail(JobStatus::Timeout, message);
                warn!(job_id = %self.id, timeout = ?self.timeout, "job timed out");
                return Err(JobError::TimedOut {
                    job: Arc::clone(self),
                });
            }

            let token = match self.fetch_phase(job_url).await {
                Ok(token) => token,
                Err(err) => return Err(self.record_failure(err).await),
            };
            let phase = JobStatus::from_phase(&token);
            debug!(job_id = %self.id, phase = %token, "polled job phase");

            match phase {
                JobStatus::Completed => {
                    let result = match self.fetch_result(job_url).await {
                        Ok(result) => result,
                        Err(err) => return Err(self.record_failure(err).await),
                    };
                    let size = result.len();
                    if self.state.write().await.complete(result) {
                        info!(job_id = %self.id, result_size = size, "job completed");
                    }
                    return Ok(());
                }
                JobStatus::Error | JobStatus::Unknown => {
                    let message = if phase == JobStatus::Error {
                        "service reported phase ERROR".to_owned()
                    } else {
                        format!("service reported unrecognized phase {token:?}")
                    };
                    self.fail(message).await;
                    return Err(JobError::ServiceError {
                        job: Arc::clone(self),
                    });
                }
                JobStatus::Pending | JobStatus::Queued | JobStatus::Executing => {
                    self.set_status(phase).await;
                }
                JobStatus::Canceled | JobStatus::Timeout => {
                    self.set_status(phase).await;
                    info!(job_id = %self.id, status = %phase, "service ended the job");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Send the submission request and work out where the job lives.
    async fn submit(&self) -> Result<Url, JobError> {
        let request = &self.request;
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(content_type) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(job_id = %self.id, url = %request.url, method = %request.method, "submitting job");
        let response = builder.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();

        let (job_url, remote_id) = if status == StatusCode::SEE_OTHER {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| self.submission_failure(status, "redirect without a Location header"))?;
            let job_url = request.url.join(location)?;
            let remote_id = remote_id_from_url(&job_url)
                .ok_or_else(|| self.submission_failure(status, "job location carries no job id"))?;
            (job_url, remote_id)
        } else if status.is_success() {
            let body = response.text().await.map_err(|e| self.transport(e))?;
            let remote_id = extract_job_id(&body)
                .map(str::to_owned)
                .ok_or_else(|| self.submission_failure(status, "no job location in response"))?;
            (child_url(&request.url, &remote_id)?, remote_id)
        } else {
            return Err(self.submission_failure(status, "unexpected response status"));
        };

        {
            let mut state = self.state.write().await;
            state.remote_job_id = Some(remote_id);
            state.job_url = Some(job_url.clone());
            state.updated_at = Utc::now();
        }
        info!(job_id = %self.id, job_url = %job_url, "remote job created");
        Ok(job_url)
    }

    async fn start_remote(&self, job_url: &Url) -> Result<(), JobError> {
        let url = child_url(job_url, "phase")?;
        self.client
            .post(url)
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body("PHASE=RUN")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.transport(e))?;
        Ok(())
    }

    async fn fetch_phase(&self, job_url: &Url) -> Result<String, JobError> {
        let url = child_url(job_url, "phase")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.transport(e))?;
        let text = response.text().await.map_err(|e| self.transport(e))?;
        Ok(text.trim().to_owned())
    }

    async fn fetch_result(&self, job_url: &Url) -> Result<Bytes, JobError> {
        let url = child_url(job_url, "results/result")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.transport(e))?;
        response.bytes().await.map_err(|e| self.transport(e))
    }

    async fn set_status(&self, status: JobStatus) {
        let mut state = self.state.write().await;
        let previous = state.status;
        if previous != status && state.transition(status) {
            debug!(job_id = %self.id, from = %previous, to = %status, "job status changed");
        }
    }

    async fn finish_canceled(&self) {
        if self.state.write().await.transition(JobStatus::Canceled) {
            info!(job_id = %self.id, "job canceled");
        }
    }

    /// Record a failure as `Error` and hand it back to the caller.
    async fn record_failure(&self, err: JobError) -> JobError {
        self.fail(err.to_string()).await;
        err
    }

    fn transport(&self, source: reqwest::Error) -> JobError {
        JobError::Transport {
            job_id: self.id.clone(),
            source,
        }
    }

    fn submission_failure(&self, status: StatusCode, reason: &str) -> JobError {
        JobError::Submission {
            job_id: self.id.clone(),
            status: Some(status.as_u16()),
            reason: reason.to_owned(),
        }
    }
}

/// Extract the content of the first `<jobId>...</jobId>` element.
fn extract_job_id(body: &str) -> Option<&str> {
    let start = body.find(JOB_ID_OPEN)? + JOB_ID_OPEN.len();
    let len = body[start..].find(JOB_ID_CLOSE)?;
    let id = body[start..start + len].trim();
    (!id.is_empty()).then_some(id)
}

/// Append `path` below `base`, tolerating a trailing slash on the base and
/// keeping its query string.
fn child_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

fn remote_id_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn request() -> RequestDescriptor {
        RequestDescriptor::new(
            Method::POST,
            Url::parse("http://svc/tap/async").unwrap(),
        )
    }

    #[test]
    fn extracts_first_job_id() {
        let body = r#"<?xml version="1.0"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0">
  <jobId>abc123</jobId>
  <jobId>other</jobId>
</uws:job>"#;
        assert_eq!(extract_job_id(body), Some("abc123"));
    }

    #[test]
    fn job_id_requires_both_tags() {
        assert_eq!(extract_job_id("<jobId>abc"), None);
        assert_eq!(extract_job_id("no id here"), None);
        assert_eq!(extract_job_id("<jobId>  </jobId>"), None);
    }

    #[test]
    fn child_url_appends_segments() {
        let base = Url::parse("http://svc/jobs/42").unwrap();
        assert_eq!(child_url(&base, "phase").unwrap().as_str(), "http://svc/jobs/42/phase");

        let slashed = Url::parse("http://svc/jobs/42/").unwrap();
        assert_eq!(
            child_url(&slashed, "results/result").unwrap().as_str(),
            "http://svc/jobs/42/results/result"
        );
    }

    #[test]
    fn child_url_keeps_the_query_string() {
        let base = Url::parse("http://svc/jobs/42?token=x").unwrap();
        assert_eq!(
            child_url(&base, "phase").unwrap().as_str(),
            "http://svc/jobs/42/phase?token=x"
        );
        assert!(child_url(&Url::parse("mailto:someone@svc").unwrap(), "phase").is_err());
    }

    #[test]
    fn remote_id_is_last_path_segment() {
        let url = Url::parse("http://svc/jobs/42").unwrap();
        assert_eq!(remote_id_from_url(&url).as_deref(), Some("42"));
        let slashed = Url::parse("http://svc/jobs/42/").unwrap();
        assert_eq!(remote_id_from_url(&slashed).as_deref(), Some("42"));
        assert_eq!(remote_id_from_url(&Url::parse("http://svc/").unwrap()), None);
    }

    #[tokio::test]
    async fn new_job_is_pending() {
        let job = Job::new(request(), Client::new()).with_id("job-1");
        assert_eq!(job.id(), "job-1");
        assert_eq!(job.timeout(), DEFAULT_JOB_TIMEOUT);
        assert_eq!(job.status().await, JobStatus::Pending);
        assert!(job.result().await.is_none());
        assert!(job.remote_job_id().await.is_none());
        assert!(!job.is_launched());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Job::new(request(), Client::new());
        let b = Job::new(request(), Client::new());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let job = Job::new(request(), Client::new());
        job.cancel();
        job.cancel();
        assert!(job.is_cancel_requested());
        assert!(job.snapshot().await.cancel_requested);
    }

    #[tokio::test]
    async fn cancel_before_run_never_submits() {
        // The request points at an unroutable host; reaching the network
        // would surface as an Error status instead of Canceled.
        let job = Arc::new(Job::new(request(), Client::new()));
        job.cancel();
        Arc::clone(&job).run().await.unwrap();
        assert_eq!(job.status().await, JobStatus::Canceled);
    }

    #[test]
    fn launch_is_claimed_once() {
        let job = Job::new(request(), Client::new());
        assert!(job.mark_launched());
        assert!(!job.mark_launched());
        assert!(job.is_launched());
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut state = JobState::new(Utc::now());
        assert!(state.complete(Bytes::from_static(b"data")));
        assert!(!state.transition(JobStatus::Executing));
        assert!(!state.fail(JobStatus::Error, "late".into()));
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.result.as_deref(), Some(&b"data"[..]));
        assert!(state.error_message.is_none());
    }
}
