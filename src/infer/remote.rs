//! Remote classifier backend: POSTs the frame to an external microservice.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::domain::label::DetectedObject;
use crate::error::ServiceError;
use crate::infer::InferenceBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Response shape of the classifier's `/classify` endpoint.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    raw: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    class: String,
    confidence: f32,
}

/// HTTP client for the classifier worker. Connection failures and non-2xx
/// responses both surface as `InferenceUnavailable`: transient, never cached,
/// safe to retry on the next trigger.
pub struct RemoteClassifier {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteClassifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl InferenceBackend for RemoteClassifier {
    async fn classify(&self, frame_path: &Path) -> Result<Vec<DetectedObject>, ServiceError> {
        let jpeg = tokio::fs::read(frame_path).await?;
        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ServiceError::Internal(format!("multipart: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/classify", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::InferenceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::InferenceUnavailable(format!(
                "classifier returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::InferenceUnavailable(e.to_string()))?;
        parse_classify_body(&body)
    }
}

fn parse_classify_body(body: &str) -> Result<Vec<DetectedObject>, ServiceError> {
    let parsed: ClassifyResponse = serde_json::from_str(body)
        .map_err(|_| ServiceError::InferenceUnavailable("classifier sent invalid JSON".into()))?;
    debug!(detections = parsed.raw.len(), "classifier response");
    Ok(parsed
        .raw
        .into_iter()
        .map(|d| DetectedObject {
            class: d.class,
            confidence: d.confidence,
            bounding_box: None,
        })
        .collect())
}
