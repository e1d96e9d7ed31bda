use serde::{Deserialize, Serialize};

/// One region returned by the detection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub class_name: String,
    #[serde(rename = "conf")]
    pub confidence: f32,
    /// Pixel coordinates as `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
}

/// Reduced outcome of one detector call: the gating flag, the target-class
/// boxes that raised it, and how many objects of any class were seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub cover_missing: bool,
    pub boxes: Vec<DetectionBox>,
    pub total_objects: usize,
}

/// Outcome of one language-model call. Failure is carried in the struct
/// rather than an error type so the pipeline can fold it into its decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlmAnalysis {
    pub success: bool,
    pub reasoning: String,
    pub answer: String,
    pub raw: String,
    /// Wall-clock time from the first attempt, retries included.
    pub elapsed_ms: u64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Closed set of per-image decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    CoverMissing,
    CoverPresent,
}

impl FinalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalDecision::CoverMissing => "cover_missing",
            FinalDecision::CoverPresent => "cover_present",
        }
    }
}

impl std::fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FinalDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cover_missing" => Ok(FinalDecision::CoverMissing),
            "cover_present" => Ok(FinalDecision::CoverPresent),
            other => Err(format!(
                "unknown decision {other:?}, expected cover_missing or cover_present"
            )),
        }
    }
}

/// Per-image counters echoed alongside the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub cover_missing_count: usize,
    pub total_objects: usize,
    pub used_vlm: bool,
    pub boxes_returned: usize,
}

/// Final structured decision for one image. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub image_name: String,
    pub detection: DetectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlm_analysis: Option<VlmAnalysis>,
    pub final_decision: FinalDecision,
    /// States traversed while deciding, in order.
    pub processing_steps: Vec<String>,
    /// Boxes surfaced to the caller. Populated on a confirmed alarm, and kept
    /// from the detector when the gate fired but the analysis failed.
    pub detection_boxes: Vec<DetectionBox>,
    pub detection_summary: DetectionSummary,
    pub success: bool,
}

/// One batch slot that never produced a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub image_name: String,
    pub error: String,
    pub success: bool,
    pub detection_boxes: Vec<DetectionBox>,
}

impl BatchFailure {
    pub fn new(image_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            error: error.into(),
            success: false,
            detection_boxes: Vec::new(),
        }
    }
}

/// Batch responses and reports mix verdicts with failure records in one
/// array, so the two shapes share an untagged enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    Completed(Box<Verdict>),
    Failed(BatchFailure),
}

impl BatchItem {
    pub fn image_name(&self) -> &str {
        match self {
            BatchItem::Completed(verdict) => &verdict.image_name,
            BatchItem::Failed(failure) => &failure.image_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Completed(_))
    }
}

/// Aggregate counters over one batch. Never mutated after the fan-out
/// finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_count: usize,
    pub success_count: usize,
    pub alarm_count: usize,
    pub vlm_used_count: usize,
    /// Images that surfaced at least one box, not a box total.
    pub boxes_returned_count: usize,
    pub elapsed_ms: u64,
}
