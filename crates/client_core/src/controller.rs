//! Analysis job lifecycle: submit, poll on a fixed interval, fetch the report.
//!
//! All outcomes surface through [`ControllerState`]; callers observe it with
//! [`JobController::subscribe`]. Each submission owns one [`ScheduledSession`]
//! and every state write is fenced by that session's [`SessionToken`], so a
//! superseded session cannot overwrite the state of a newer one.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::{
    domain::{AnalysisId, JobState},
    error::{ReportError, ValidationError},
    protocol::{AnalysisRequest, Report},
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    schedule::{PollTimer, ScheduledSession, SessionCounter, SessionToken},
    AnalysisService, RequestError,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

const SUBMIT_FALLBACK: &str = "failed to start analysis";
const FETCH_FALLBACK: &str = "failed to fetch report";
const REMOTE_FAILURE_FALLBACK: &str = "analysis failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    /// Ticks allowed without a terminal status. Every tick counts, including
    /// ticks whose status request failed.
    pub max_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ControllerConfig {
    /// Upper bound on how long a session polls before timing out.
    pub fn polling_budget(&self) -> Duration {
        self.poll_interval * self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{detail}")]
    Request { detail: String },
    /// A single failed poll. Logged and retried by the next tick, never stored in state.
    #[error("status poll failed: {0}")]
    TransientPoll(String),
    #[error("timed out")]
    Timeout,
    #[error("{message}")]
    RemoteFailure { message: String },
    #[error("invalid report: {0}")]
    InvalidReport(#[from] ReportError),
}

impl JobError {
    fn request(err: &RequestError, fallback: &str) -> Self {
        Self::Request {
            detail: err.detail().unwrap_or(fallback).to_string(),
        }
    }

    fn remote_failure(message: Option<String>) -> Self {
        let message = message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| REMOTE_FAILURE_FALLBACK.to_string());
        Self::RemoteFailure { message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: AnalysisId,
    pub estimated_seconds: u32,
}

/// Latest non-terminal status seen while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub state: JobState,
    pub processed_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ControllerState {
    #[default]
    Idle,
    Submitting {
        subject: String,
    },
    Polling {
        handle: JobHandle,
        attempt: u32,
        progress: Option<PollProgress>,
    },
    Succeeded(Arc<Report>),
    Failed(JobError),
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitting { .. } | Self::Polling { .. })
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&Report> {
        match self {
            Self::Succeeded(report) => Some(report),
            _ => None,
        }
    }
}

struct Sessions {
    counter: SessionCounter,
    active: SessionToken,
    task: Option<ScheduledSession>,
}

struct Shared {
    state: watch::Sender<ControllerState>,
    sessions: Mutex<Sessions>,
}

impl Shared {
    fn lock_sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes `next` only while `token` is still the active session.
    fn apply(&self, token: SessionToken, next: ControllerState) -> bool {
        let sessions = self.lock_sessions();
        if sessions.active != token {
            debug!(
                session = token.value(),
                active = sessions.active.value(),
                "analysis: dropping transition from superseded session"
            );
            return false;
        }
        self.state.send_replace(next);
        true
    }
}

pub struct JobController {
    service: Arc<dyn AnalysisService>,
    config: ControllerConfig,
    shared: Arc<Shared>,
}

impl JobController {
    pub fn new(service: Arc<dyn AnalysisService>, config: ControllerConfig) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        let mut counter = SessionCounter::default();
        let active = counter.next();
        Self {
            service,
            config,
            shared: Arc::new(Shared {
                state,
                sessions: Mutex::new(Sessions {
                    counter,
                    active,
                    task: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.shared.state.subscribe()
    }

    pub fn session(&self) -> SessionToken {
        self.shared.lock_sessions().active
    }

    /// Starts a new analysis for `subject`, superseding any session in flight.
    ///
    /// Blank input fails synchronously without contacting the service. Must be
    /// called from within a tokio runtime.
    pub fn submit(&self, subject: &str) {
        let mut sessions = self.shared.lock_sessions();
        let token = sessions.counter.next();
        sessions.active = token;
        if let Some(previous) = sessions.task.take() {
            if !previous.is_finished() {
                info!(
                    session = previous.token().value(),
                    "analysis: superseding running session"
                );
            }
            previous.cancel();
        }

        let request = match AnalysisRequest::new(subject) {
            Ok(request) => request,
            Err(err) => {
                info!(session = token.value(), "analysis: rejected blank subject");
                self.shared.state.send_replace(ControllerState::Failed(err.into()));
                return;
            }
        };

        info!(
            session = token.value(),
            subject = %request.product_name,
            "analysis: submitting"
        );
        self.shared.state.send_replace(ControllerState::Submitting {
            subject: request.product_name.clone(),
        });
        let session = run_session(
            Arc::clone(&self.shared),
            Arc::clone(&self.service),
            self.config,
            token,
            request.product_name,
        );
        sessions.task = Some(ScheduledSession::spawn(token, session));
    }

    /// Aborts the active session, if any, and returns to `Idle`.
    pub fn cancel(&self) {
        let mut sessions = self.shared.lock_sessions();
        let token = sessions.counter.next();
        sessions.active = token;
        if let Some(previous) = sessions.task.take() {
            debug!(session = previous.token().value(), "analysis: cancelling session");
            previous.cancel();
        }
        self.shared.state.send_replace(ControllerState::Idle);
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if let Some(task) = self.shared.lock_sessions().task.take() {
            task.cancel();
        }
    }
}

enum PollOutcome {
    Completed,
    RemoteFailure(Option<String>),
    TimedOut,
    Superseded,
}

async fn run_session(
    shared: Arc<Shared>,
    service: Arc<dyn AnalysisService>,
    config: ControllerConfig,
    token: SessionToken,
    subject: String,
) {
    let job = match service.submit_analysis(&subject).await {
        Ok(job) => job,
        Err(err) => {
            warn!(session = token.value(), error = %err, "analysis: submission failed");
            shared.apply(
                token,
                ControllerState::Failed(JobError::request(&err, SUBMIT_FALLBACK)),
            );
            return;
        }
    };

    let handle = JobHandle {
        job_id: job.analysis_id,
        estimated_seconds: job.estimated_time_seconds,
    };
    info!(
        session = token.value(),
        analysis_id = handle.job_id.0,
        estimated_seconds = handle.estimated_seconds,
        "analysis: job accepted"
    );
    if !shared.apply(
        token,
        ControllerState::Polling {
            handle,
            attempt: 0,
            progress: None,
        },
    ) {
        return;
    }

    let next = match poll_until_terminal(&shared, service.as_ref(), config, token, handle).await {
        PollOutcome::Superseded => return,
        PollOutcome::TimedOut => {
            warn!(
                session = token.value(),
                analysis_id = handle.job_id.0,
                max_attempts = config.max_attempts,
                "analysis: polling timed out"
            );
            ControllerState::Failed(JobError::Timeout)
        }
        PollOutcome::RemoteFailure(message) => {
            let err = JobError::remote_failure(message);
            warn!(
                session = token.value(),
                analysis_id = handle.job_id.0,
                error = %err,
                "analysis: service reported failure"
            );
            ControllerState::Failed(err)
        }
        PollOutcome::Completed => fetch_report(service.as_ref(), token, &subject).await,
    };
    shared.apply(token, next);
}

async fn poll_until_terminal(
    shared: &Shared,
    service: &dyn AnalysisService,
    config: ControllerConfig,
    token: SessionToken,
    handle: JobHandle,
) -> PollOutcome {
    let mut timer = PollTimer::start(config.poll_interval);
    let mut attempt = 0u32;
    let mut progress = None;

    loop {
        timer.tick().await;
        attempt += 1;

        match service.get_status(handle.job_id).await {
            Ok(status) => {
                debug!(
                    session = token.value(),
                    analysis_id = handle.job_id.0,
                    attempt,
                    state = status.status.label(),
                    processed = status.total_comments,
                    "analysis: polled status"
                );
                match status.status {
                    JobState::Completed => {
                        timer.stop();
                        return PollOutcome::Completed;
                    }
                    JobState::Failed => {
                        timer.stop();
                        return PollOutcome::RemoteFailure(status.error_message);
                    }
                    JobState::Pending | JobState::InProgress => {
                        progress = Some(PollProgress {
                            state: status.status,
                            processed_count: status.total_comments,
                        });
                    }
                }
            }
            Err(err) => {
                let err = JobError::TransientPoll(err.to_string());
                warn!(
                    session = token.value(),
                    analysis_id = handle.job_id.0,
                    attempt,
                    error = %err,
                    "analysis: status poll failed; retrying on next tick"
                );
            }
        }

        if attempt >= config.max_attempts {
            timer.stop();
            return PollOutcome::TimedOut;
        }

        if !shared.apply(
            token,
            ControllerState::Polling {
                handle,
                attempt,
                progress,
            },
        ) {
            return PollOutcome::Superseded;
        }
    }
}

async fn fetch_report(
    service: &dyn AnalysisService,
    token: SessionToken,
    subject: &str,
) -> ControllerState {
    let report = match service.get_report(subject).await {
        Ok(report) => report,
        Err(err) => {
            warn!(session = token.value(), error = %err, "analysis: report fetch failed");
            return ControllerState::Failed(JobError::request(&err, FETCH_FALLBACK));
        }
    };

    match report.validate() {
        Ok(report) => {
            info!(
                session = token.value(),
                product = %report.product.name,
                comments = report.recent_comments.len(),
                topics = report.topics.len(),
                "analysis: report ready"
            );
            ControllerState::Succeeded(Arc::new(report))
        }
        Err(err) => {
            warn!(session = token.value(), error = %err, "analysis: rejected malformed report");
            ControllerState::Failed(err.into())
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
