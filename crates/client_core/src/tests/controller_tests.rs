use super::*;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{AnalysisId, JobState, ProductId},
    protocol::{AnalysisJobResponse, JobStatus, ProductSummary, Report, SentimentDistribution},
};
use tokio::{sync::oneshot, time::Instant};

use crate::{AnalysisService, RequestError};

const INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Submit(String),
    Status(AnalysisId),
    Report(String),
}

enum StatusStep {
    State(JobState, u32),
    FailedWith(Option<String>),
    Error,
    Hold(oneshot::Receiver<JobState>),
}

struct ScriptedService {
    submit_error: Option<RequestError>,
    next_job_id: Mutex<i64>,
    statuses: Mutex<VecDeque<StatusStep>>,
    report: Mutex<Option<Result<Report, RequestError>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedService {
    fn new(statuses: Vec<StatusStep>) -> Self {
        Self {
            submit_error: None,
            next_job_id: Mutex::new(100),
            statuses: Mutex::new(statuses.into()),
            report: Mutex::new(None),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn states(states: &[JobState]) -> Self {
        Self::new(
            states
                .iter()
                .enumerate()
                .map(|(idx, state)| StatusStep::State(*state, idx as u32 * 5))
                .collect(),
        )
    }

    fn failing_submit(err: RequestError) -> Self {
        let mut service = Self::new(Vec::new());
        service.submit_error = Some(err);
        service
    }

    fn with_report(self, report: Result<Report, RequestError>) -> Self {
        *self.report.lock().expect("report lock") = Some(report);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn status_calls(&self) -> usize {
        self.count(|call| matches!(call, Call::Status(_)))
    }

    fn report_calls(&self) -> usize {
        self.count(|call| matches!(call, Call::Report(_)))
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

fn status(job_id: AnalysisId, state: JobState, processed: u32) -> JobStatus {
    JobStatus {
        id: job_id,
        product_id: ProductId(1),
        status: state,
        total_comments: processed,
        avg_sentiment_score: None,
        positive_count: 0,
        negative_count: 0,
        neutral_count: 0,
        churn_risk_score: None,
        error_message: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

fn sample_report(subject: &str, distribution: SentimentDistribution) -> Report {
    Report {
        product: ProductSummary {
            id: ProductId(1),
            name: subject.to_string(),
            created_at: Utc::now(),
        },
        latest_analysis: None,
        recent_comments: Vec::new(),
        topics: Vec::new(),
        sentiment_distribution: distribution,
        risk_level: None,
    }
}

fn balanced() -> SentimentDistribution {
    SentimentDistribution {
        positive: 60.0,
        negative: 25.0,
        neutral: 15.0,
    }
}

#[async_trait]
impl AnalysisService for ScriptedService {
    async fn submit_analysis(&self, subject: &str) -> Result<AnalysisJobResponse, RequestError> {
        self.record(Call::Submit(subject.to_string()));
        if let Some(err) = &self.submit_error {
            return Err(err.clone());
        }
        let mut next = self.next_job_id.lock().expect("id lock");
        *next += 1;
        Ok(AnalysisJobResponse {
            message: format!("Analysis started for '{subject}'"),
            analysis_id: AnalysisId(*next),
            status: JobState::Pending,
            estimated_time_seconds: 5,
        })
    }

    async fn get_status(&self, job_id: AnalysisId) -> Result<JobStatus, RequestError> {
        self.record(Call::Status(job_id));
        let step = self
            .statuses
            .lock()
            .expect("status lock")
            .pop_front()
            .unwrap_or(StatusStep::State(JobState::InProgress, 0));
        match step {
            StatusStep::State(state, processed) => Ok(status(job_id, state, processed)),
            StatusStep::FailedWith(message) => {
                let mut failed = status(job_id, JobState::Failed, 0);
                failed.error_message = message;
                Ok(failed)
            }
            StatusStep::Error => Err(RequestError::transport("connection reset")),
            StatusStep::Hold(release) => {
                let state = release.await.unwrap_or(JobState::Failed);
                Ok(status(job_id, state, 0))
            }
        }
    }

    async fn get_report(&self, subject: &str) -> Result<Report, RequestError> {
        self.record(Call::Report(subject.to_string()));
        self.report
            .lock()
            .expect("report lock")
            .clone()
            .unwrap_or_else(|| Ok(sample_report(subject, balanced())))
    }
}

fn build_controller(service: &Arc<ScriptedService>, max_attempts: u32) -> JobController {
    let service: Arc<dyn AnalysisService> = service.clone();
    JobController::new(
        service,
        ControllerConfig {
            poll_interval: INTERVAL,
            max_attempts,
        },
    )
}

async fn wait_terminal(controller: &JobController) -> ControllerState {
    let mut rx = controller.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(3_600), rx.wait_for(|s| s.is_terminal()))
        .await
        .expect("session never reached a terminal state")
        .expect("controller dropped")
        .clone();
    state
}

#[tokio::test(start_paused = true)]
async fn completes_after_pending_ticks_and_fetches_report_once() {
    let service = Arc::new(ScriptedService::states(&[
        JobState::Pending,
        JobState::Pending,
        JobState::Completed,
    ]));
    let controller = build_controller(&service, 30);

    let started = Instant::now();
    controller.submit("  iPhone 17  ");
    let state = wait_terminal(&controller).await;

    let report = state.report().expect("succeeded");
    assert_eq!(report.product.name, "iPhone 17");
    assert_eq!(started.elapsed(), INTERVAL * 3);
    assert_eq!(
        service.calls(),
        vec![
            Call::Submit("iPhone 17".into()),
            Call::Status(AnalysisId(101)),
            Call::Status(AnalysisId(101)),
            Call::Status(AnalysisId(101)),
            Call::Report("iPhone 17".into()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn blank_subject_fails_synchronously_without_remote_calls() {
    let service = Arc::new(ScriptedService::states(&[JobState::Completed]));
    let controller = build_controller(&service, 30);

    controller.submit(" \t\n ");

    assert_eq!(
        controller.state(),
        ControllerState::Failed(JobError::Validation(ValidationError::EmptySubject))
    );
    assert_eq!(controller.state().error().map(ToString::to_string).as_deref(), Some("empty input"));
    tokio::time::sleep(INTERVAL * 5).await;
    assert!(service.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn times_out_after_max_attempts_and_stops_polling() {
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let controller = build_controller(&service, 3);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(state, ControllerState::Failed(JobError::Timeout));
    assert_eq!(state.error().map(ToString::to_string).as_deref(), Some("timed out"));
    assert_eq!(service.status_calls(), 3);

    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(service.status_calls(), 3);
    assert_eq!(service.report_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_status_on_last_allowed_tick_wins_over_timeout() {
    let service = Arc::new(ScriptedService::states(&[
        JobState::Pending,
        JobState::InProgress,
        JobState::Completed,
    ]));
    let controller = build_controller(&service, 3);

    controller.submit("Netflix");
    let state = wait_terminal(&controller).await;

    assert!(state.report().is_some(), "unexpected state: {state:?}");
    assert_eq!(service.report_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_error_does_not_abort_session() {
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::State(JobState::Pending, 0),
        StatusStep::Error,
        StatusStep::State(JobState::InProgress, 10),
        StatusStep::State(JobState::InProgress, 20),
        StatusStep::State(JobState::Completed, 30),
    ]));
    let controller = build_controller(&service, 30);

    controller.submit("Spotify");
    let state = wait_terminal(&controller).await;

    assert!(state.report().is_some(), "unexpected state: {state:?}");
    assert_eq!(service.status_calls(), 5);
    assert_eq!(service.report_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_polls_count_toward_timeout() {
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::Error,
        StatusStep::Error,
        StatusStep::Error,
    ]));
    let controller = build_controller(&service, 3);

    controller.submit("Amazon Prime");
    let state = wait_terminal(&controller).await;

    assert_eq!(state, ControllerState::Failed(JobError::Timeout));
    assert_eq!(service.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn polling_state_exposes_attempt_and_processed_count() {
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::State(JobState::InProgress, 12),
        StatusStep::Error,
    ]));
    let controller = build_controller(&service, 30);
    let mut rx = controller.subscribe();

    controller.submit("Tesla");
    let first = rx
        .wait_for(|s| matches!(s, ControllerState::Polling { attempt: 1, .. }))
        .await
        .expect("first tick")
        .clone();
    let second = rx
        .wait_for(|s| matches!(s, ControllerState::Polling { attempt: 2, .. }))
        .await
        .expect("second tick")
        .clone();

    let expected_progress = Some(PollProgress {
        state: JobState::InProgress,
        processed_count: 12,
    });
    assert_eq!(
        first,
        ControllerState::Polling {
            handle: JobHandle {
                job_id: AnalysisId(101),
                estimated_seconds: 5,
            },
            attempt: 1,
            progress: expected_progress,
        }
    );
    match second {
        ControllerState::Polling { progress, .. } => assert_eq!(progress, expected_progress),
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn remote_failure_passes_message_through() {
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::State(JobState::Pending, 0),
        StatusStep::FailedWith(Some("scraper blocked by upstream".into())),
    ]));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(
        state,
        ControllerState::Failed(JobError::RemoteFailure {
            message: "scraper blocked by upstream".into()
        })
    );
    assert_eq!(service.report_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn remote_failure_without_message_uses_fallback() {
    let service = Arc::new(ScriptedService::new(vec![StatusStep::FailedWith(None)]));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(
        state.error().map(ToString::to_string).as_deref(),
        Some("analysis failed")
    );
}

#[tokio::test(start_paused = true)]
async fn submission_error_prefers_server_detail() {
    let service = Arc::new(ScriptedService::failing_submit(RequestError::http_status(
        500,
        Some("database is locked".into()),
    )));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(
        state,
        ControllerState::Failed(JobError::Request {
            detail: "database is locked".into()
        })
    );
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(service.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn submission_transport_error_uses_fallback() {
    let service = Arc::new(ScriptedService::failing_submit(RequestError::transport(
        "connection refused",
    )));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(
        state.error().map(ToString::to_string).as_deref(),
        Some("failed to start analysis")
    );
}

#[tokio::test(start_paused = true)]
async fn report_fetch_error_is_terminal() {
    let service = Arc::new(
        ScriptedService::states(&[JobState::Completed])
            .with_report(Err(RequestError::http_status(404, Some("Product not found".into())))),
    );
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert_eq!(
        state,
        ControllerState::Failed(JobError::Request {
            detail: "Product not found".into()
        })
    );

    let service = Arc::new(
        ScriptedService::states(&[JobState::Completed])
            .with_report(Err(RequestError::decode("expected value at line 1"))),
    );
    let controller = build_controller(&service, 30);
    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;
    assert_eq!(
        state.error().map(ToString::to_string).as_deref(),
        Some("failed to fetch report")
    );
}

#[tokio::test(start_paused = true)]
async fn report_with_inconsistent_distribution_is_rejected() {
    let skewed = SentimentDistribution {
        positive: 70.0,
        negative: 20.0,
        neutral: 20.0,
    };
    let service = Arc::new(
        ScriptedService::states(&[JobState::Completed]).with_report(Ok(sample_report("Tesla", skewed))),
    );
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    assert!(
        matches!(state, ControllerState::Failed(JobError::InvalidReport(_))),
        "unexpected state: {state:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn fetched_report_distribution_is_a_partition() {
    let service = Arc::new(ScriptedService::states(&[JobState::Completed]));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    let state = wait_terminal(&controller).await;

    let distribution = state.report().expect("succeeded").sentiment_distribution;
    for value in [distribution.positive, distribution.negative, distribution.neutral] {
        assert!((0.0..=100.0).contains(&value));
    }
    assert!((distribution.total() - 100.0).abs() <= 0.5);
}

#[tokio::test(start_paused = true)]
async fn resubmit_discards_late_response_from_previous_session() {
    let (release_first, held) = oneshot::channel();
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::Hold(held),
        StatusStep::State(JobState::Pending, 3),
        StatusStep::State(JobState::Completed, 6),
    ]));
    let controller = build_controller(&service, 30);
    let first_session = controller.session();

    controller.submit("Tesla");
    let mut rx = controller.subscribe();
    rx.wait_for(|s| matches!(s, ControllerState::Polling { .. }))
        .await
        .expect("first session polling");
    tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
    assert_eq!(service.status_calls(), 1, "first poll should be in flight");

    controller.submit("Netflix");
    assert!(controller.session() > first_session);
    assert_eq!(
        controller.state(),
        ControllerState::Submitting {
            subject: "Netflix".into()
        }
    );

    // The held poll would have reported completion for the old job.
    let _ = release_first.send(JobState::Completed);
    let state = wait_terminal(&controller).await;

    assert_eq!(state.report().expect("succeeded").product.name, "Netflix");
    let calls = service.calls();
    assert!(!calls.contains(&Call::Report("Tesla".into())), "stale session fetched: {calls:?}");
    assert!(!calls[2..].contains(&Call::Status(AnalysisId(101))));
    assert_eq!(service.report_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_token_cannot_mutate_state() {
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let controller = build_controller(&service, 30);
    let stale = controller.session();

    controller.submit("Tesla");
    let applied = controller
        .shared
        .apply(stale, ControllerState::Failed(JobError::Timeout));

    assert!(!applied);
    assert_eq!(
        controller.state(),
        ControllerState::Submitting {
            subject: "Tesla".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn new_submit_clears_previous_outcome() {
    let service = Arc::new(ScriptedService::new(vec![
        StatusStep::State(JobState::Completed, 4),
        StatusStep::State(JobState::Pending, 0),
    ]));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    assert!(wait_terminal(&controller).await.report().is_some());

    controller.submit("   ");
    assert!(matches!(
        controller.state(),
        ControllerState::Failed(JobError::Validation(_))
    ));

    controller.submit("Netflix");
    assert_eq!(
        controller.state(),
        ControllerState::Submitting {
            subject: "Netflix".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_returns_to_idle_and_stops_polling() {
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let controller = build_controller(&service, 30);

    controller.submit("Tesla");
    tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(10)).await;
    let polled = service.status_calls();
    assert_eq!(polled, 2);

    controller.cancel();
    assert_eq!(controller.state(), ControllerState::Idle);
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(service.status_calls(), polled);
}

#[test]
fn default_config_matches_dashboard_polling() {
    let config = ControllerConfig::default();
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.max_attempts, 30);
    assert_eq!(config.polling_budget(), Duration::from_secs(60));
}
