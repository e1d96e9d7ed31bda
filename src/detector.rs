use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config;
use crate::types::{DetectionBox, DetectionResult};

/// Failure talking to the detection service. This aborts the run for the
/// affected image; any retry policy belongs to the caller, not this client.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("detector returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Seam over the detection stage so the pipeline can run against mocks.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect over raw image bytes. `confidence_threshold` falls back to the
    /// configured default when omitted.
    async fn detect(
        &self,
        image: &[u8],
        confidence_threshold: Option<f32>,
    ) -> Result<DetectionResult, DetectorError>;
}

pub struct DetectorClient {
    endpoint: String,
    target_class: String,
    default_threshold: f32,
    http: Client,
}

impl DetectorClient {
    pub fn new(cfg: &config::Detector) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            target_class: cfg.target_class.clone(),
            default_threshold: cfg.confidence_threshold,
            http,
        })
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image_base64: &'a str,
    confidence_threshold: f32,
}

#[derive(Deserialize)]
struct DetectResponse {
    detections: Vec<DetectionBox>,
}

#[async_trait]
impl Detector for DetectorClient {
    async fn detect(
        &self,
        image: &[u8],
        confidence_threshold: Option<f32>,
    ) -> Result<DetectionResult, DetectorError> {
        let threshold = confidence_threshold.unwrap_or(self.default_threshold);
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image);
        let url = format!("{}/detect", self.endpoint);

        let resp = self
            .http
            .post(&url)
            .json(&DetectRequest {
                image_base64: &image_base64,
                confidence_threshold: threshold,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            return Err(DetectorError::UnexpectedStatus { status, body });
        }

        let parsed: DetectResponse = resp.json().await?;
        let result = reduce(parsed.detections, &self.target_class, threshold);
        debug!(
            cover_missing = result.cover_missing,
            target_boxes = result.boxes.len(),
            total_objects = result.total_objects,
            "detector call finished"
        );
        Ok(result)
    }
}

/// Reduce raw detections to the gating result: only target-class boxes at or
/// above threshold count, while `total_objects` keeps every returned box.
fn reduce(detections: Vec<DetectionBox>, target_class: &str, threshold: f32) -> DetectionResult {
    let total_objects = detections.len();
    let boxes: Vec<DetectionBox> = detections
        .into_iter()
        .filter(|b| b.class_name == target_class && b.confidence >= threshold)
        .collect();
    DetectionResult {
        cover_missing: !boxes.is_empty(),
        boxes,
        total_objects,
    }
}
