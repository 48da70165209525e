use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::AnalysisId,
    error::ErrorDetail,
    protocol::{AnalysisJobResponse, AnalysisRequest, JobStatus, Report},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub mod controller;
pub mod schedule;
pub mod view;

pub use controller::{
    ControllerConfig, ControllerState, JobController, JobError, JobHandle, PollProgress,
};
pub use view::View;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single call to the analysis service.
///
/// `detail` holds the message the service put in its error body, when there
/// was one; `status` is absent for network and decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub status: Option<u16>,
    pub detail: Option<String>,
    message: String,
}

impl RequestError {
    pub fn transport(err: impl fmt::Display) -> Self {
        Self {
            status: None,
            detail: None,
            message: format!("request failed: {err}"),
        }
    }

    pub fn http_status(status: u16, detail: Option<String>) -> Self {
        let message = match &detail {
            Some(detail) => format!("service returned {status}: {detail}"),
            None => format!("service returned {status}"),
        };
        Self {
            status: Some(status),
            detail,
            message,
        }
    }

    pub fn decode(err: impl fmt::Display) -> Self {
        Self {
            status: None,
            detail: None,
            message: format!("malformed response: {err}"),
        }
    }

    pub fn invalid_base_url(raw: &str, err: impl fmt::Display) -> Self {
        Self {
            status: None,
            detail: None,
            message: format!("invalid service url '{raw}': {err}"),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

/// The three operations the dashboard needs from the remote analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn submit_analysis(&self, subject: &str) -> Result<AnalysisJobResponse, RequestError>;
    async fn get_status(&self, job_id: AnalysisId) -> Result<JobStatus, RequestError>;
    async fn get_report(&self, subject: &str) -> Result<Report, RequestError>;
}

pub struct HttpAnalysisService {
    http: Client,
    base_url: Url,
}

impl HttpAnalysisService {
    pub fn new(base_url: &str) -> Result<Self, RequestError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RequestError> {
        let parsed =
            Url::parse(base_url.trim()).map_err(|err| RequestError::invalid_base_url(base_url, err))?;
        if parsed.cannot_be_a_base() {
            return Err(RequestError::invalid_base_url(base_url, "not a base url"));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RequestError::transport)?;
        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RequestError::invalid_base_url(self.base_url.as_str(), "not a base url"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorDetail>(&body)
            .ok()
            .and_then(|body| body.message());
        return Err(RequestError::http_status(status.as_u16(), detail));
    }
    response.json::<T>().await.map_err(RequestError::decode)
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn submit_analysis(&self, subject: &str) -> Result<AnalysisJobResponse, RequestError> {
        let url = self.endpoint(&["api", "analysis", "analyze"])?;
        let request = AnalysisRequest {
            product_name: subject.to_string(),
        };
        debug!(%url, subject, "analysis: submitting job");
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(RequestError::transport)?;
        decode_response(response).await
    }

    async fn get_status(&self, job_id: AnalysisId) -> Result<JobStatus, RequestError> {
        let id = job_id.to_string();
        let url = self.endpoint(&["api", "analysis", "status", id.as_str()])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(RequestError::transport)?;
        decode_response(response).await
    }

    async fn get_report(&self, subject: &str) -> Result<Report, RequestError> {
        let url = self.endpoint(&["api", "analysis", "dashboard", subject])?;
        debug!(%url, subject, "analysis: fetching report");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(RequestError::transport)?;
        decode_response(response).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
