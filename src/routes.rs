use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::batch::{self, BatchImage};
use crate::detector::DetectorError;
use crate::server::AppState;
use crate::types::{BatchItem, BatchSummary, Verdict};

/// Facade-boundary error carrying a JSON `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<DetectorError> for ApiError {
    fn from(err: DetectorError) -> Self {
        Self::upstream(format!("detector unavailable: {err}"))
    }
}

#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    pub image_base64: String,
    pub image_name: Option<String>,
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub images: Vec<InferenceRequest>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
    pub batch_summary: BatchSummary,
}

/// GET /health - liveness probe
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /single-inference - two-stage decision for one image
pub async fn single_inference(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<Verdict>, ApiError> {
    let Json(req) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_threshold(req.confidence_threshold, "confidence_threshold")?;
    let image = decode_image(&req.image_base64, "image_base64")?;
    let image_name = req.image_name.unwrap_or_else(|| "unknown".to_string());

    let verdict = state
        .pipeline
        .run(&image, &image_name, req.confidence_threshold)
        .await?;
    Ok(Json(verdict))
}

/// POST /batch-inference - bounded concurrent fan-out over up to
/// `max_batch_size` images
pub async fn batch_inference(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(req) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    if req.images.is_empty() {
        return Err(ApiError::bad_request("images must not be empty"));
    }
    if req.images.len() > state.max_batch_size {
        return Err(ApiError::bad_request(format!(
            "batch of {} images exceeds the maximum of {}",
            req.images.len(),
            state.max_batch_size
        )));
    }

    // Decode everything up front so malformed payloads reject the request
    // before any remote call is dispatched.
    let mut entries = Vec::with_capacity(req.images.len());
    for (i, item) in req.images.into_iter().enumerate() {
        validate_threshold(
            item.confidence_threshold,
            &format!("images[{i}].confidence_threshold"),
        )?;
        let image = decode_image(&item.image_base64, &format!("images[{i}].image_base64"))?;
        let image_name = item.image_name.unwrap_or_else(|| format!("image_{i}"));
        entries.push(BatchImage {
            image,
            image_name,
            confidence_threshold: item.confidence_threshold,
        });
    }

    let (results, batch_summary) =
        batch::run_batch(state.pipeline.clone(), entries, state.max_workers).await;
    Ok(Json(BatchResponse {
        results,
        batch_summary,
    }))
}

/// Decode one request image, tolerating a data-URL prefix, and reject
/// payloads that are not a recognizable raster image.
fn decode_image(image_base64: &str, field: &str) -> Result<Vec<u8>, ApiError> {
    let trimmed = image_base64.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    let encoded = if trimmed.starts_with("data:") {
        trimmed
            .split_once("base64,")
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed)
    } else {
        trimmed
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ApiError::bad_request(format!("{field} is not valid base64: {e}")))?;
    if image::guess_format(&bytes).is_err() {
        return Err(ApiError::bad_request(format!(
            "{field} does not decode to a supported image format"
        )));
    }
    Ok(bytes)
}

fn validate_threshold(threshold: Option<f32>, field: &str) -> Result<(), ApiError> {
    if let Some(value) = threshold {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ApiError::bad_request(format!(
                "{field} must be a number between 0 and 1"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_prefix_is_stripped() {
        let png = {
            let img = image::RgbImage::new(1, 1);
            let mut cursor = std::io::Cursor::new(Vec::new());
            img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
            cursor.into_inner()
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let plain = decode_image(&encoded, "image_base64").unwrap();
        let prefixed =
            decode_image(&format!("data:image/png;base64,{encoded}"), "image_base64").unwrap();
        assert_eq!(plain, png);
        assert_eq!(prefixed, png);
    }

    #[test]
    fn non_image_bytes_are_rejected() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"plain text payload");
        let err = decode_image(&encoded, "image_base64").unwrap_err();
        assert!(err.message.contains("image format"));
    }

    #[test]
    fn threshold_range_is_enforced() {
        assert!(validate_threshold(None, "confidence_threshold").is_ok());
        assert!(validate_threshold(Some(0.0), "confidence_threshold").is_ok());
        assert!(validate_threshold(Some(1.0), "confidence_threshold").is_ok());
        assert!(validate_threshold(Some(1.5), "confidence_threshold").is_err());
        assert!(validate_threshold(Some(-0.1), "confidence_threshold").is_err());
        assert!(validate_threshold(Some(f32::NAN), "confidence_threshold").is_err());
    }
}
