//! Prediction client — asks the external assignment service which user
//! should own an issue.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PredictorConfig;
use crate::error::PredictError;
use crate::notification::IssueNotification;

/// The predictor's answer for one issue. Produced once per notification and
/// never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "recommended_assignee")]
    pub assignee: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

/// Prediction-service boundary.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(
        &self,
        notification: &IssueNotification,
    ) -> Result<Recommendation, PredictError>;

    /// Liveness probe for health reporting.
    async fn probe(&self) -> Result<(), PredictError>;
}

// ── Wire payloads ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    issue: IssueContext<'a>,
}

#[derive(Debug, Serialize)]
struct IssueContext<'a> {
    title: &'a str,
    description: &'a str,
    labels: Vec<&'a str>,
    current_assignee: Option<&'a str>,
    project: &'a str,
}

// ── HTTP implementation ─────────────────────────────────────────────

/// reqwest-backed predictor client. Non-2xx responses and malformed bodies
/// are typed failures; the pipeline records them and retries later.
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpPredictor {
    pub fn new(config: &PredictorConfig) -> Result<Self, PredictError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PredictError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(
        &self,
        notification: &IssueNotification,
    ) -> Result<Recommendation, PredictError> {
        let payload = PredictRequest {
            issue: IssueContext {
                title: &notification.title,
                description: &notification.description,
                labels: notification.labels.iter().map(String::as_str).collect(),
                current_assignee: notification.current_assignee.as_deref(),
                project: &notification.issue.project,
            },
        };

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/predict-assignee", self.base_url)),
            )
            .json(&payload)
            .send()
            .await
            .map_err(|e| PredictError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictError::Status {
                status: status.as_u16(),
            });
        }

        let recommendation: Recommendation = response
            .json()
            .await
            .map_err(|e| PredictError::InvalidResponse(e.to_string()))?;
        validate(&recommendation)?;

        debug!(
            assignee = %recommendation.assignee,
            confidence = recommendation.confidence,
            "Prediction received"
        );
        Ok(recommendation)
    }

    async fn probe(&self) -> Result<(), PredictError> {
        let response = self
            .authorize(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await
            .map_err(|e| PredictError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PredictError::Status {
                status: response.status().as_u16(),
            })
        }
    }
}

fn validate(recommendation: &Recommendation) -> Result<(), PredictError> {
    if recommendation.assignee.trim().is_empty() {
        return Err(PredictError::InvalidResponse(
            "empty recommended_assignee".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&recommendation.confidence) {
        return Err(PredictError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            recommendation.confidence
        )));
    }
    Ok(())
}
