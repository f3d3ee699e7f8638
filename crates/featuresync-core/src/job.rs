//! Asynchronous job completion: submit → poll → fetch
//!
//! Analytical queries run for seconds to minutes. The [`JobPoller`] submits a
//! query to a [`QueryService`] and polls it until the job reaches a terminal
//! state, an overall deadline passes, or the caller cancels.
//!
//! ## State machine
//!
//! ```text
//! SUBMITTED ──► RUNNING ──► SUCCEEDED
//!     │            │
//!     └────────────┴──────► FAILED | CANCELLED
//! ```
//!
//! State only moves forward. A poll response reporting an earlier state is
//! ignored, and no poll is issued once a terminal state is reached.
//!
//! ## Transient errors
//!
//! A poll that fails with a transient error ([`Error::is_transient`]) counts
//! as "still running". More than `max_consecutive_errors` in a row fails the
//! job with [`FailureKind::PollingExhausted`].
//!
//! The poller keeps no state across jobs: each `await_completion` call owns
//! its own [`Job`], so many jobs can be awaited concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::query::QueryRequest;
use crate::{Error, Result};

/// Identifier assigned by the query service on submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Position in the lifecycle; terminal states share the last rank
    fn rank(self) -> u8 {
        match self {
            JobState::Submitted => 0,
            JobState::Running => 1,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => write!(f, "SUBMITTED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for JobState {
    type Err = Error;

    /// Accepts the service's own spellings (`QUEUED` is a submitted job)
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" | "QUEUED" => Ok(JobState::Submitted),
            "RUNNING" => Ok(JobState::Running),
            "SUCCEEDED" => Ok(JobState::Succeeded),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" | "CANCELED" => Ok(JobState::Cancelled),
            other => Err(Error::invalid_input(format!("unknown job state '{}'", other))),
        }
    }
}

/// Why a job ended in FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The service reported the failure
    Service,
    /// The poller gave up after too many consecutive transient errors
    PollingExhausted,
}

/// One status response from the query service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub result_location: Option<String>,
    pub failure_reason: Option<String>,
}

impl JobStatus {
    pub fn submitted() -> Self {
        Self::with_state(JobState::Submitted)
    }

    pub fn running() -> Self {
        Self::with_state(JobState::Running)
    }

    pub fn succeeded(result_location: impl Into<String>) -> Self {
        Self {
            result_location: Some(result_location.into()),
            ..Self::with_state(JobState::Succeeded)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::with_state(JobState::Failed)
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::with_state(JobState::Cancelled)
        }
    }

    fn with_state(state: JobState) -> Self {
        Self {
            state,
            result_location: None,
            failure_reason: None,
        }
    }
}

/// Client-side view of one submitted job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub result_location: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Poll calls issued so far, including failed ones
    pub polls: u32,
    consecutive_errors: u32,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Submitted,
            result_location: None,
            failure_reason: None,
            failure_kind: None,
            polls: 0,
            consecutive_errors: 0,
        }
    }

    /// Apply a poll response; returns whether the state changed
    ///
    /// Responses that would move the state backwards, or arrive after a
    /// terminal state, are ignored.
    pub fn apply(&mut self, status: JobStatus) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if status.state.rank() < self.state.rank() {
            warn!(
                job_id = %self.id,
                current = %self.state,
                reported = %status.state,
                "Ignoring backwards job state transition"
            );
            return false;
        }

        let changed = status.state != self.state;
        if changed {
            info!(job_id = %self.id, from = %self.state, to = %status.state, "Job state changed");
        }

        self.state = status.state;
        if status.result_location.is_some() {
            self.result_location = status.result_location;
        }
        if status.failure_reason.is_some() {
            self.failure_reason = status.failure_reason;
        }
        if matches!(self.state, JobState::Failed | JobState::Cancelled) {
            self.failure_kind = Some(FailureKind::Service);
        }
        changed
    }

    fn mark_polling_exhausted(&mut self, last_error: &str) {
        warn!(
            job_id = %self.id,
            consecutive_errors = self.consecutive_errors,
            "Job polling exhausted"
        );
        self.state = JobState::Failed;
        self.failure_kind = Some(FailureKind::PollingExhausted);
        self.failure_reason = Some(last_error.to_string());
    }

    /// Turn a terminal job into the caller-facing result
    fn into_result(self) -> Result<String> {
        match self.state {
            JobState::Succeeded => self.result_location.ok_or_else(|| {
                Error::internal(format!("job '{}' succeeded without a result location", self.id))
            }),
            JobState::Failed | JobState::Cancelled => Err(Error::JobFailed {
                job_id: self.id.to_string(),
                state: self.state.to_string(),
                reason: self.failure_reason.unwrap_or_default(),
            }),
            JobState::Submitted | JobState::Running => Err(Error::internal(format!(
                "job '{}' is not terminal ({})",
                self.id, self.state
            ))),
        }
    }
}

/// Analytical query service (external collaborator)
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submit a query; rejections surface as [`Error::Submission`]
    async fn submit(&self, request: &QueryRequest) -> Result<JobId>;

    /// Current status of a job
    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus>;

    /// Name of this service type (for logging)
    fn service_type(&self) -> &'static str;
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between polls
    pub poll_interval: Duration,
    /// Upper bound for the delay when backing off
    pub max_interval: Duration,
    /// Interval multiplier after each poll (1.0 = fixed interval)
    pub backoff_multiplier: f64,
    /// Overall deadline for reaching a terminal state
    pub timeout: Duration,
    /// Consecutive transient poll errors tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            timeout: Duration::from_secs(3600),
            max_consecutive_errors: 5,
        }
    }
}

impl PollConfig {
    fn next_interval(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64().max(current.as_secs_f64())))
    }
}

/// Submits jobs and drives them to a terminal state
#[derive(Clone)]
pub struct JobPoller {
    service: Arc<dyn QueryService>,
    config: PollConfig,
}

impl JobPoller {
    pub fn new(service: Arc<dyn QueryService>, config: PollConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Submit a query, without retry
    pub async fn submit(&self, request: &QueryRequest) -> Result<JobId> {
        match self.service.submit(request).await {
            Ok(job_id) => {
                info!(
                    job_id = %job_id,
                    service = self.service.service_type(),
                    output_location = %request.output_location,
                    "Query submitted"
                );
                Ok(job_id)
            }
            Err(Error::Submission(msg)) => Err(Error::Submission(msg)),
            Err(e) => Err(Error::Submission(e.to_string())),
        }
    }

    /// Poll a job once and fold the response into `job`
    ///
    /// Transient errors leave the state untouched and return it unchanged.
    /// Once the transient-error budget is spent the job is marked FAILED and
    /// [`Error::PollingExhausted`] is returned. Other errors are returned
    /// as is.
    pub async fn poll(&self, job: &mut Job) -> Result<JobState> {
        if job.state.is_terminal() {
            return Ok(job.state);
        }

        job.polls += 1;
        match self.service.get_status(&job.id).await {
            Ok(status) => {
                job.consecutive_errors = 0;
                job.apply(status);
                Ok(job.state)
            }
            Err(e) if e.is_transient() => {
                job.consecutive_errors += 1;
                let message = e.to_string();
                if job.consecutive_errors > self.config.max_consecutive_errors {
                    job.mark_polling_exhausted(&message);
                    return Err(Error::PollingExhausted {
                        job_id: job.id.to_string(),
                        consecutive_errors: job.consecutive_errors,
                        last_error: message,
                    });
                }
                debug!(
                    job_id = %job.id,
                    consecutive_errors = job.consecutive_errors,
                    error = %message,
                    "Transient poll error, treating job as still running"
                );
                Ok(job.state)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait until the job is terminal and return its result location
    pub async fn await_completion(&self, job_id: &JobId) -> Result<String> {
        self.await_completion_until_cancelled(job_id, &CancellationToken::new())
            .await
    }

    /// Like [`JobPoller::await_completion`], but stops when `cancel` fires
    ///
    /// Cancellation drops the polling loop; nothing keeps running after this
    /// returns.
    pub async fn await_completion_until_cancelled(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let timeout = self.config.timeout;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(job_id = %job_id, "Waiting for job cancelled by caller");
                Err(Error::Cancelled(format!("waiting for job '{}'", job_id)))
            }
            outcome = tokio::time::timeout(timeout, self.poll_until_terminal(job_id)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(job_id = %job_id, timeout = ?timeout, "Job deadline exceeded");
                        Err(Error::JobTimeout {
                            job_id: job_id.to_string(),
                            timeout,
                        })
                    }
                }
            }
        }
    }

    async fn poll_until_terminal(&self, job_id: &JobId) -> Result<String> {
        let mut job = Job::new(job_id.clone());
        let mut interval = self.config.poll_interval;

        loop {
            let state = self.poll(&mut job).await?;
            if state.is_terminal() {
                info!(job_id = %job.id, state = %state, polls = job.polls, "Job finished");
                return job.into_result();
            }

            tokio::time::sleep(interval).await;
            interval = self.config.next_interval(interval);
        }
    }
}
