use std::sync::Arc;

use tracing::{info, warn};

use crate::detector::{Detector, DetectorError};
use crate::types::{
    DetectionBox, DetectionResult, DetectionSummary, FinalDecision, Verdict, VlmAnalysis,
};
use crate::vlm::VisionAnalyst;

/// Answer substring that upgrades a gated image to the alarm decision. The
/// match is case-sensitive and exact; the configured prompt instructs the
/// model to use this wording.
const ALARM_MARKER: &str = "cover missing";

/// Two-stage decision runner: the detector gates whether the language model
/// is consulted, then its answer is matched into the final decision.
pub struct Pipeline {
    detector: Arc<dyn Detector>,
    analyst: Arc<dyn VisionAnalyst>,
    prompt: String,
}

impl Pipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        analyst: Arc<dyn VisionAnalyst>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            analyst,
            prompt: prompt.into(),
        }
    }

    /// Decide one image. A detector failure aborts the run. An analysis
    /// failure after a positive gate falls back to the benign label while
    /// keeping the detector's boxes visible for review, so a successful run
    /// does not imply a successful analysis.
    pub async fn run(
        &self,
        image: &[u8],
        image_name: &str,
        confidence_threshold: Option<f32>,
    ) -> Result<Verdict, DetectorError> {
        let detection = self.detector.detect(image, confidence_threshold).await?;
        let mut steps = vec!["detection complete".to_string()];

        if !detection.cover_missing {
            steps.push("no missing cover suspected; VLM analysis skipped".to_string());
            info!(image = image_name, decision = %FinalDecision::CoverPresent, "gate closed");
            return Ok(build_verdict(
                image_name,
                detection,
                None,
                FinalDecision::CoverPresent,
                steps,
                Vec::new(),
            ));
        }

        steps.push("missing cover suspected; starting VLM analysis".to_string());
        info!(
            image = image_name,
            suspect_boxes = detection.boxes.len(),
            "gate open, consulting language model"
        );
        let analysis = self.analyst.analyze(image, &self.prompt).await;

        let (decision, surfaced) = if !analysis.success {
            warn!(
                image = image_name,
                error = analysis.error.as_deref().unwrap_or("unknown"),
                "analysis failed, keeping detector boxes under the benign label"
            );
            steps.push("VLM analysis failed; defaulting to cover present".to_string());
            (FinalDecision::CoverPresent, detection.boxes.clone())
        } else if analysis.answer.contains(ALARM_MARKER) {
            steps.push("VLM analysis complete".to_string());
            steps.push("VLM confirmed missing cover".to_string());
            (FinalDecision::CoverMissing, detection.boxes.clone())
        } else {
            steps.push("VLM analysis complete".to_string());
            steps.push("VLM judged cover present".to_string());
            (FinalDecision::CoverPresent, Vec::new())
        };

        info!(image = image_name, decision = %decision, "run decided");
        Ok(build_verdict(
            image_name,
            detection,
            Some(analysis),
            decision,
            steps,
            surfaced,
        ))
    }
}

fn build_verdict(
    image_name: &str,
    detection: DetectionResult,
    vlm_analysis: Option<VlmAnalysis>,
    final_decision: FinalDecision,
    processing_steps: Vec<String>,
    detection_boxes: Vec<DetectionBox>,
) -> Verdict {
    let detection_summary = DetectionSummary {
        cover_missing_count: detection.boxes.len(),
        total_objects: detection.total_objects,
        used_vlm: vlm_analysis.is_some(),
        boxes_returned: detection_boxes.len(),
    };
    Verdict {
        image_name: image_name.to_string(),
        detection,
        vlm_analysis,
        final_decision,
        processing_steps,
        detection_boxes,
        detection_summary,
        success: true,
    }
}
