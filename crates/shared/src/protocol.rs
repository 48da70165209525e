use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnalysisId, CommentId, JobState, ProductId, RiskLevel, Sentiment, TopicId},
    error::{ReportError, ValidationError},
};

/// Page size the service applies to `recent_comments`.
pub const RECENT_COMMENT_LIMIT: usize = 20;
const DISTRIBUTION_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub product_name: String,
}

impl AnalysisRequest {
    pub fn new(subject: &str) -> Result<Self, ValidationError> {
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySubject);
        }
        Ok(Self {
            product_name: trimmed.to_string(),
        })
    }
}

fn default_estimated_seconds() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJobResponse {
    #[serde(default)]
    pub message: String,
    pub analysis_id: AnalysisId,
    pub status: JobState,
    #[serde(default = "default_estimated_seconds")]
    pub estimated_time_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: AnalysisId,
    pub product_id: ProductId,
    pub status: JobState,
    #[serde(default)]
    pub total_comments: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_sentiment_score: Option<f64>,
    #[serde(default)]
    pub positive_count: u32,
    #[serde(default)]
    pub negative_count: u32,
    #[serde(default)]
    pub neutral_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub churn_risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(with = "timestamp")]
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    pub mention_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_sentiment: Option<f64>,
}

/// Percentages of classified comments per sentiment bucket.
///
/// Every field defaults to zero: the service sends `{}` when the product has
/// no completed analysis yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentDistribution {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl SentimentDistribution {
    pub fn total(&self) -> f64 {
        self.positive + self.negative + self.neutral
    }

    pub fn is_empty(&self) -> bool {
        self.positive == 0.0 && self.negative == 0.0 && self.neutral == 0.0
    }

    pub fn validate(&self) -> Result<(), ReportError> {
        for (bucket, value) in [
            ("positive", self.positive),
            ("negative", self.negative),
            ("neutral", self.neutral),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ReportError::PercentageOutOfRange { bucket, value });
            }
        }

        if self.is_empty() {
            return Ok(());
        }

        let sum = self.total();
        if (sum - 100.0).abs() > DISTRIBUTION_TOLERANCE {
            return Err(ReportError::DistributionSum { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub product: ProductSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_analysis: Option<JobStatus>,
    #[serde(default)]
    pub recent_comments: Vec<Comment>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub sentiment_distribution: SentimentDistribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
}

impl Report {
    pub fn validate(mut self) -> Result<Self, ReportError> {
        self.sentiment_distribution.validate()?;
        self.recent_comments.truncate(RECENT_COMMENT_LIMIT);
        Ok(self)
    }

    /// Churn risk as reported, falling back to the score thresholds.
    pub fn effective_risk_level(&self) -> Option<RiskLevel> {
        self.risk_level.or_else(|| {
            self.latest_analysis
                .as_ref()
                .and_then(|analysis| analysis.churn_risk_score)
                .map(RiskLevel::from_churn_score)
        })
    }
}

/// The service emits naive UTC timestamps; accept RFC 3339 as well.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'"))),
                None => Ok(None),
            }
        }
    }
}
