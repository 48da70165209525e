//! Read-only projection of [`ControllerState`] for the presentation layer.

use shared::protocol::Report;

use crate::controller::{ControllerState, JobError};

#[derive(Debug, Clone, PartialEq)]
pub enum View<'a> {
    /// Nothing submitted yet.
    EmptyPrompt,
    /// Form ready for another attempt, showing why the last one failed.
    InputForm { error: &'a JobError },
    Progress {
        label: String,
        processed_count: Option<u32>,
        attempt: u32,
    },
    Report(&'a Report),
    /// The job finished but the service has no completed analysis to show.
    NoData { product: &'a str },
}

impl<'a> View<'a> {
    pub fn from_state(state: &'a ControllerState) -> Self {
        match state {
            ControllerState::Idle => Self::EmptyPrompt,
            ControllerState::Failed(error) => Self::InputForm { error },
            ControllerState::Submitting { .. } => Self::Progress {
                label: "Starting analysis...".to_string(),
                processed_count: None,
                attempt: 0,
            },
            ControllerState::Polling {
                handle,
                attempt,
                progress,
            } => match progress {
                Some(progress) => Self::Progress {
                    label: format!(
                        "Status: {} - {} comments processed",
                        progress.state.label(),
                        progress.processed_count
                    ),
                    processed_count: Some(progress.processed_count),
                    attempt: *attempt,
                },
                None => Self::Progress {
                    label: format!("Analysis started! ID: {}", handle.job_id),
                    processed_count: None,
                    attempt: *attempt,
                },
            },
            ControllerState::Succeeded(report) if report.latest_analysis.is_none() => Self::NoData {
                product: &report.product.name,
            },
            ControllerState::Succeeded(report) => Self::Report(report),
        }
    }

    /// Whether the input form should accept a new submission.
    pub fn accepts_input(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
