//! Remote analyzer: the higher-latency, higher-accuracy escalation target.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::RemoteAnalyzerError;
use crate::models::Prediction;

/// Escalation target contract. Invoked only when the local result is
/// rejected or absent; there is no tier behind it.
#[async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<Vec<Prediction>, RemoteAnalyzerError>;
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    predictions: Vec<AnalyzePrediction>,
}

#[derive(Debug, Deserialize)]
struct AnalyzePrediction {
    label: String,
    confidence: f32,
}

/// HTTP implementation posting the photo to an analyzer endpoint.
pub struct HttpRemoteAnalyzer {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteAnalyzerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteAnalyzerError::Http(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RemoteAnalyzer for HttpRemoteAnalyzer {
    async fn analyze(&self, image: &[u8]) -> Result<Vec<Prediction>, RemoteAnalyzerError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RemoteAnalyzerError::Timeout
                } else {
                    RemoteAnalyzerError::Http(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteAnalyzerError::Http(format!(
                "analyzer returned status {status}"
            )));
        }

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|err| RemoteAnalyzerError::Http(format!("malformed response: {err}")))?;

        if body.predictions.is_empty() {
            return Err(RemoteAnalyzerError::NoResult);
        }

        Ok(body
            .predictions
            .into_iter()
            .map(|p| Prediction::new(p.label, p.confidence))
            .collect())
    }
}
