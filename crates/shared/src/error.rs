use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty input")]
    EmptySubject,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("{bucket} share {value} is outside 0..=100")]
    PercentageOutOfRange { bucket: &'static str, value: f64 },
    #[error("sentiment shares sum to {sum}, expected 100")]
    DistributionSum { sum: f64 },
}

/// Error body returned by the analysis service on non-2xx responses.
///
/// `detail` is a plain string for handled errors and a list of
/// `{loc, msg, type}` objects for request validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: Value,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Value::String(detail.into()),
        }
    }

    pub fn message(&self) -> Option<String> {
        match &self.detail {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        }
    }
}
