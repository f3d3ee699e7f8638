//! E2E tests for the job completion state machine
//!
//! Drives `JobPoller` against a scripted query service:
//! - Happy path (RUNNING, RUNNING, SUCCEEDED)
//! - Service-reported failure and cancellation
//! - Transient error budget (PollingExhausted)
//! - Overall deadline and caller cancellation
//! - Independent concurrent jobs
//!
//! Time is paused, so poll intervals elapse instantly.

use async_trait::async_trait;
use featuresync_core::{
    Error, Job, JobId, JobPoller, JobState, JobStatus, PollConfig, QueryRequest, QueryService,
    Result,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum Step {
    Status(JobStatus),
    Transient,
    Fatal,
}

/// Query service that replays a script of poll responses per job
#[derive(Default)]
struct ScriptedQueryService {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    polls: AtomicUsize,
    reject_submissions: bool,
}

impl ScriptedQueryService {
    fn with_script(job_id: &str, steps: Vec<Step>) -> Self {
        let service = Self::default();
        service.add_script(job_id, steps);
        service
    }

    fn add_script(&self, job_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into());
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryService for ScriptedQueryService {
    async fn submit(&self, request: &QueryRequest) -> Result<JobId> {
        if self.reject_submissions {
            return Err(Error::submission(format!(
                "rejected query: {}",
                request.query_text
            )));
        }
        Ok(JobId::new("q-submitted"))
    }

    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(job_id.as_str())
            .and_then(|steps| steps.pop_front());

        match step {
            Some(Step::Status(status)) => Ok(status),
            Some(Step::Transient) => Err(Error::unavailable("ThrottlingException: rate exceeded")),
            Some(Step::Fatal) => Err(Error::invalid_input("AccessDenied")),
            None => Ok(JobStatus::running()),
        }
    }

    fn service_type(&self) -> &'static str {
        "scripted"
    }
}

fn poller(service: Arc<ScriptedQueryService>, config: PollConfig) -> JobPoller {
    JobPoller::new(service, config)
}

fn fast_config() -> PollConfig {
    PollConfig {
        poll_interval: Duration::from_secs(5),
        max_interval: Duration::from_secs(5),
        backoff_multiplier: 1.0,
        timeout: Duration::from_secs(600),
        max_consecutive_errors: 3,
    }
}

fn request() -> QueryRequest {
    QueryRequest {
        query_text: "SELECT 1".to_string(),
        output_location: "/tmp/results".to_string(),
    }
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_e2e_running_running_succeeded_returns_location_after_three_polls() {
    // Given: A job that succeeds on the third poll
    let service = Arc::new(ScriptedQueryService::with_script(
        "q-1",
        vec![
            Step::Status(JobStatus::running()),
            Step::Status(JobStatus::running()),
            Step::Status(JobStatus::succeeded("/tmp/results/q-1.csv")),
        ],
    ));
    let poller = poller(Arc::clone(&service), fast_config());

    // When: Awaiting completion
    let location = poller.await_completion(&JobId::new("q-1")).await.unwrap();

    // Then: The result location comes back after exactly three polls
    assert_eq!(location, "/tmp/results/q-1.csv");
    assert_eq!(service.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_submit_returns_job_id() {
    let service = Arc::new(ScriptedQueryService::default());
    let poller = poller(service, fast_config());

    let job_id = poller.submit(&request()).await.unwrap();
    assert_eq!(job_id.as_str(), "q-submitted");
}

#[tokio::test(start_paused = true)]
async fn test_e2e_submission_rejection_is_not_retried() {
    let service = Arc::new(ScriptedQueryService {
        reject_submissions: true,
        ..Default::default()
    });
    let poller = poller(Arc::clone(&service), fast_config());

    let err = poller.submit(&request()).await.unwrap_err();
    assert!(matches!(err, Error::Submission(_)));
    assert_eq!(service.polls(), 0);
}

// ============================================================================
// Service-reported terminal failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_e2e_failed_job_surfaces_reason_verbatim() {
    let service = Arc::new(ScriptedQueryService::with_script(
        "q-2",
        vec![
            Step::Status(JobStatus::running()),
            Step::Status(JobStatus::failed("SYNTAX_ERROR: line 3:7: mismatched input")),
        ],
    ));
    let poller = poller(Arc::clone(&service), fast_config());

    let err = poller.await_completion(&JobId::new("q-2")).await.unwrap_err();
    match err {
        Error::JobFailed { job_id, state, reason } => {
            assert_eq!(job_id, "q-2");
            assert_eq!(state, "FAILED");
            assert_eq!(reason, "SYNTAX_ERROR: line 3:7: mismatched input");
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert_eq!(service.polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_cancelled_job_is_a_failure() {
    let service = Arc::new(ScriptedQueryService::with_script(
        "q-3",
        vec![Step::Status(JobStatus::cancelled("Query cancelled by user"))],
    ));
    let poller = poller(service, fast_config());

    let err = poller.await_completion(&JobId::new("q-3")).await.unwrap_err();
    assert!(matches!(err, Error::JobFailed { ref state, .. } if state == "CANCELLED"));
}

// ============================================================================
// Transient errors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_e2e_transient_errors_count_as_running() {
    // Given: Transient errors below the budget, then success
    let service = Arc::new(ScriptedQueryService::with_script(
        "q-4",
        vec![
            Step::Transient,
            Step::Status(JobStatus::running()),
            Step::Transient,
            Step::Transient,
            Step::Status(JobStatus::succeeded("/tmp/results/q-4.csv")),
        ],
    ));
    let poller = poller(Arc::clone(&service), fast_config());

    // Then: The job completes normally
    let location = poller.await_completion(&JobId::new("q-4")).await.unwrap();
    assert_eq!(location, "/tmp/results/q-4.csv");
    assert_eq!(service.polls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_transient_budget_exceeded_reports_polling_exhausted() {
    // Given: budget + 1 consecutive transient errors
    let config = fast_config();
    let budget = config.max_consecutive_errors as usize;
    let steps = (0..budget + 1).map(|_| Step::Transient).collect();
    let service = Arc::new(ScriptedQueryService::with_script("q-5", steps));
    let poller = poller(Arc::clone(&service), config.clone());

    // When: Awaiting completion
    let started = tokio::time::Instant::now();
    let err = poller.await_completion(&JobId::new("q-5")).await.unwrap_err();

    // Then: PollingExhausted, well before the deadline
    match err {
        Error::PollingExhausted {
            job_id,
            consecutive_errors,
            last_error,
        } => {
            assert_eq!(job_id, "q-5");
            assert_eq!(consecutive_errors as usize, budget + 1);
            assert!(last_error.contains("ThrottlingException"));
        }
        other => panic!("expected PollingExhausted, got {other:?}"),
    }
    assert_eq!(service.polls(), budget + 1);
    assert!(started.elapsed() < config.timeout);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_non_transient_poll_error_is_returned() {
    let service = Arc::new(ScriptedQueryService::with_script("q-6", vec![Step::Fatal]));
    let poller = poller(service, fast_config());

    let err = poller.await_completion(&JobId::new("q-6")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test(start_paused = true)]
async fn test_e2e_poll_marks_job_failed_when_exhausted() {
    let service = Arc::new(ScriptedQueryService::with_script(
        "q-7",
        vec![Step::Transient, Step::Transient],
    ));
    let poller = poller(
        service,
        PollConfig {
            max_consecutive_errors: 1,
            ..fast_config()
        },
    );
    let mut job = Job::new(JobId::new("q-7"));

    assert_eq!(poller.poll(&mut job).await.unwrap(), JobState::Submitted);
    assert!(matches!(
        poller.poll(&mut job).await,
        Err(Error::PollingExhausted { .. })
    ));
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure_kind, Some(featuresync_core::FailureKind::PollingExhausted));

    // Terminal jobs are not polled again
    let polls_before = job.polls;
    assert_eq!(poller.poll(&mut job).await.unwrap(), JobState::Failed);
    assert_eq!(job.polls, polls_before);
}

// ============================================================================
// Deadline and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_e2e_stuck_job_hits_deadline() {
    // Given: A job that never leaves RUNNING
    let service = Arc::new(ScriptedQueryService::default());
    let config = PollConfig {
        timeout: Duration::from_secs(60),
        ..fast_config()
    };
    let poller = poller(Arc::clone(&service), config);

    // When: Awaiting completion
    let started = tokio::time::Instant::now();
    let err = poller.await_completion(&JobId::new("stuck")).await.unwrap_err();

    // Then: The deadline fires, not an unbounded wait
    assert!(matches!(err, Error::JobTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(70));
    assert!(service.polls() >= 12);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_caller_cancellation_stops_polling() {
    let service = Arc::new(ScriptedQueryService::default());
    let poller = poller(Arc::clone(&service), fast_config());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        canceller.cancel();
    });

    let err = poller
        .await_completion_until_cancelled(&JobId::new("long"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));

    // No polling continues after cancellation
    let polls_at_cancel = service.polls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(service.polls(), polls_at_cancel);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_concurrent_jobs_are_independent() {
    // Given: One job that fails and one that succeeds on the same service
    let service = Arc::new(ScriptedQueryService::default());
    service.add_script("bad", vec![Step::Status(JobStatus::failed("out of memory"))]);
    service.add_script(
        "good",
        vec![
            Step::Status(JobStatus::running()),
            Step::Status(JobStatus::succeeded("/tmp/results/good.csv")),
        ],
    );
    let poller = poller(service, fast_config());

    // When: Both are awaited concurrently
    let bad = JobId::new("bad");
    let good = JobId::new("good");
    let (bad_result, good_result) =
        tokio::join!(poller.await_completion(&bad), poller.await_completion(&good));

    // Then: The failure does not affect the sibling
    assert!(matches!(bad_result, Err(Error::JobFailed { .. })));
    assert_eq!(good_result.unwrap(), "/tmp/results/good.csv");
}
