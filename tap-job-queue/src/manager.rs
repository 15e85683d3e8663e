//! Registry of jobs with a cap on concurrently running jobs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::job::Job;
use crate::types::JobStatus;

/// Default number of jobs allowed to run at the same time.
pub const DEFAULT_MAX_PARALLEL: usize = 5;
/// Granularity of the admission gate and of completion waiting.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning knobs of a [`JobManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    pub max_parallel: usize,
    /// Delay between two admission checks in [`JobManager::start_process`].
    pub admission_interval: Duration,
    /// Delay between two status checks in [`JobManager::wait_for_completion`].
    pub wait_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            admission_interval: DEFAULT_CHECK_INTERVAL,
            wait_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

/// Owns every registered job and gates how many of them run at once.
///
/// A launched job occupies a slot until its run loop has ended, which is
/// right after it reaches a terminal status. Replacing or removing the job
/// in the registry does not free the slot.
/// Callers waiting for a slot re-check every `admission_interval`; no
/// ordering among them is promised.
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, Arc<Job>>>>,
    max_parallel: Arc<AtomicUsize>,
    /// Slots held by launched run loops, released when the loop ends.
    running: Arc<AtomicUsize>,
    admission: Arc<Mutex<()>>,
    admission_interval: Duration,
    wait_interval: Duration,
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &"<RwLock<HashMap<String, Arc<Job>>>>")
            .field("max_parallel", &self.max_parallel())
            .field("running", &self.running_count())
            .field("admission_interval", &self.admission_interval)
            .field("wait_interval", &self.wait_interval)
            .finish()
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    pub fn new() -> Self {
        Self::with_options(ManagerOptions::default())
    }

    pub fn with_options(options: ManagerOptions) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_parallel: Arc::new(AtomicUsize::new(options.max_parallel.max(1))),
            running: Arc::new(AtomicUsize::new(0)),
            admission: Arc::new(Mutex::new(())),
            admission_interval: options.admission_interval,
            wait_interval: options.wait_interval,
        }
    }

    #[inline]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel.load(Ordering::Acquire)
    }

    /// Change the cap. Takes effect at the next admission check; already
    /// running jobs are never stopped.
    pub fn set_max_parallel(&self, max_parallel: usize) {
        self.max_parallel
            .store(max_parallel.max(1), Ordering::Release);
    }

    /// Register a job, replacing any job with the same id.
    pub async fn add_process(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        let mut jobs = self.jobs.write().await;
        if jobs.insert(job.id().to_owned(), Arc::clone(&job)).is_some() {
            debug!(job_id = %job.id(), "replaced job with the same id");
        }
        job
    }

    pub async fn get_process(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn get_all_processes(&self) -> Vec<Arc<Job>> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Jobs whose status is `Pending` right now.
    pub async fn get_pending_processes(&self) -> Vec<Arc<Job>> {
        let mut pending = Vec::new();
        for job in self.get_all_processes().await {
            if job.status().await == JobStatus::Pending {
                pending.push(job);
            }
        }
        pending
    }

    /// Drop a job from the registry. A running job keeps running, and keeps
    /// its slot, until its loop ends but is no longer reachable through the
    /// manager.
    pub async fn remove_process(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.write().await.remove(id)
    }

    /// Number of launched run loops that have not ended yet, including
    /// those of jobs since replaced or removed from the registry.
    #[inline]
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Wait for a free slot, then launch the job's run loop in the
    /// background.
    ///
    /// Returns once the loop is spawned. Failures of the loop only show up
    /// in the job's status. Unknown ids and jobs that were already started
    /// are ignored.
    pub async fn start_process(&self, id: &str) {
        let Some(job) = self.get_process(id).await else {
            warn!(job_id = %id, "start requested for unknown job");
            return;
        };
        if job.is_launched() {
            warn!(job_id = %id, "job already started");
            return;
        }

        let _admission = self.admission.lock().await;
        loop {
            // A concurrent start of the same id may have launched it while
            // this caller waited for the lock or for a slot.
            if job.is_launched() {
                debug!(job_id = %id, "job launched by another caller");
                return;
            }
            let running = self.running_count();
            if running < self.max_parallel() {
                break;
            }
            debug!(job_id = %id, running, max_parallel = self.max_parallel(), "waiting for a free slot");
            tokio::time::sleep(self.admission_interval).await;
        }

        if !job.mark_launched() {
            return;
        }
        self.running.fetch_add(1, Ordering::AcqRel);
        info!(job_id = %id, "launching job");
        spawn_supervised(job, Arc::clone(&self.running));
    }

    /// Request cancellation of a job. Unknown ids are ignored.
    pub async fn cancel_process(&self, id: &str) {
        match self.get_process(id).await {
            Some(job) => job.cancel(),
            None => debug!(job_id = %id, "cancel requested for unknown job"),
        }
    }

    /// Block until the job reaches a terminal status.
    ///
    /// `Completed` and `Canceled` return `Ok(())`; the result is read from
    /// the job itself. `Error` and `Timeout` are returned as errors. An
    /// unknown id returns immediately.
    pub async fn wait_for_completion(&self, id: &str) -> Result<(), JobError> {
        let Some(job) = self.get_process(id).await else {
            warn!(job_id = %id, "wait requested for unknown job");
            return Ok(());
        };

        loop {
            match job.status().await {
                JobStatus::Completed | JobStatus::Canceled => return Ok(()),
                JobStatus::Error | JobStatus::Unknown => {
                    return Err(JobError::ServiceError { job });
                }
                JobStatus::Timeout => return Err(JobError::TimedOut { job }),
                JobStatus::Pending | JobStatus::Queued | JobStatus::Executing => {
                    tokio::time::sleep(self.wait_interval).await;
                }
            }
        }
    }

    /// Log the status of every job each `wait_interval` until `shutdown`
    /// fires. Read-only.
    pub async fn monitor_processes(&self, shutdown: CancellationToken) {
        loop {
            for job in self.get_all_processes().await {
                let snapshot = job.snapshot().await;
                info!(
                    job_id = %snapshot.id,
                    status = %snapshot.status,
                    remote_job_id = ?snapshot.remote_job_id,
                    "job status"
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.wait_interval) => {}
            }
        }
    }
}

/// Run the job loop on its own task and make sure whatever happens to it
/// ends up in the job's status. The slot taken for it in `running` is
/// released once the loop is over.
fn spawn_supervised(job: Arc<Job>, running: Arc<AtomicUsize>) {
    tokio::spawn(async move {
        let runner = tokio::spawn(Arc::clone(&job).run());
        match runner.await {
            Ok(Ok(())) => debug!(job_id = %job.id(), "job loop finished"),
            Ok(Err(err)) => warn!(job_id = %job.id(), error = %err, "job loop ended with a failure"),
            Err(join_err) => {
                error!(job_id = %job.id(), error = %join_err, "job loop aborted");
                job.fail(format!("run loop aborted: {join_err}")).await;
            }
        }
        running.fetch_sub(1, Ordering::AcqRel);
    });
}
