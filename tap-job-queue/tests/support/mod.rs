//! Mock UWS service helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Method;
use tap_job_queue::{http_client, Job, RequestDescriptor};
use url::Url;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const POLL: Duration = Duration::from_millis(20);
pub const SUBMIT_PATH: &str = "/tap/async";

/// Replies with the given phases in order, repeating the last one forever.
pub struct PhaseSequence {
    phases: Vec<String>,
    calls: AtomicUsize,
}

impl PhaseSequence {
    pub fn new(phases: &[&str]) -> Self {
        Self {
            phases: phases.iter().map(|p| p.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Respond for PhaseSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let phase = self
            .phases
            .get(i)
            .or_else(|| self.phases.last())
            .cloned()
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_string(format!("{phase}\n"))
    }
}

/// Mount the run, phase and result endpoints of a job living at `job_path`.
pub async fn mount_job(server: &MockServer, job_path: &str, phases: &[&str], result: &[u8]) {
    Mock::given(method("POST"))
        .and(path(format!("{job_path}/phase")))
        .and(body_string("PHASE=RUN"))
        .respond_with(
            ResponseTemplate::new(303).insert_header("Location", format!("{}{job_path}", server.uri())),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{job_path}/phase")))
        .respond_with(PhaseSequence::new(phases))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{job_path}/results/result")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(result.to_vec()))
        .mount(server)
        .await;
}

/// Job creation answering with a protocol-compliant 303 redirect.
pub async fn mount_redirect_submission(server: &MockServer, submit_path: &str, job_path: &str) {
    Mock::given(method("POST"))
        .and(path(submit_path))
        .respond_with(
            ResponseTemplate::new(303).insert_header("Location", format!("{}{job_path}", server.uri())),
        )
        .mount(server)
        .await;
}

/// Job creation answering 200 with the job id inside the XML body.
pub async fn mount_xml_submission(server: &MockServer, submit_path: &str, job_id: &str) {
    let body = format!(
        "<?xml version=\"1.0\"?>\n<job xmlns=\"http://www.ivoa.net/xml/UWS/v1.0\">\n  <jobId>{job_id}</jobId>\n  <phase>PENDING</phase>\n</job>"
    );
    Mock::given(method("POST"))
        .and(path(submit_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

pub fn submission(server: &MockServer, submit_path: &str) -> RequestDescriptor {
    let url = Url::parse(&format!("{}{submit_path}", server.uri())).unwrap();
    RequestDescriptor::new(Method::POST, url)
        .with_form_body("REQUEST=doQuery&LANG=ADQL&QUERY=SELECT+1")
}

/// A job polling every [`POLL`].
pub fn fast_job(request: RequestDescriptor) -> Job {
    Job::new(request, http_client("tap-job-queue-tests").unwrap()).with_poll_interval(POLL)
}

/// Number of requests the server received for `method` on `path`.
pub async fn request_count(server: &MockServer, http_method: &str, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
        .count()
}
