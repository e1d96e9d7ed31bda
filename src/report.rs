use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::{BatchItem, BatchSummary, FinalDecision};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("encoding report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("writing report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading report {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing report {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Persisted outcome of one offline sweep. `all_results` keeps verdicts and
/// failure records in input order; the scorer reads this document back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub generated_at: DateTime<Utc>,
    pub total_images: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub overall_summary: BatchSummary,
    pub batch_summaries: Vec<BatchSummary>,
    pub all_results: Vec<BatchItem>,
}

impl SweepReport {
    /// Write the whole document in one shot under a timestamped name and
    /// return the path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let filename = format!(
            "inference_{}.json",
            self.generated_at.format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(filename);
        let encoded = serde_json::to_vec_pretty(self)?;
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, encoded).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        info!(report = %path.display(), results = self.all_results.len(), "report written");
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ReportError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Confusion counts and derived metrics over scored reports, with
/// `cover_missing` as the positive class. Failed slots are counted but stay
/// out of the confusion matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCard {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
    pub failed: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ScoreCard {
    /// Score reports whose images all share one expected label.
    pub fn from_reports<'a>(
        reports: impl IntoIterator<Item = (&'a SweepReport, FinalDecision)>,
    ) -> Self {
        let mut tp = 0;
        let mut fp = 0;
        let mut tn = 0;
        let mut fn_count = 0;
        let mut failed = 0;
        for (report, expected) in reports {
            for item in &report.all_results {
                match item {
                    BatchItem::Completed(verdict) => {
                        match (expected, verdict.final_decision) {
                            (FinalDecision::CoverMissing, FinalDecision::CoverMissing) => tp += 1,
                            (FinalDecision::CoverPresent, FinalDecision::CoverMissing) => fp += 1,
                            (FinalDecision::CoverPresent, FinalDecision::CoverPresent) => tn += 1,
                            (FinalDecision::CoverMissing, FinalDecision::CoverPresent) => {
                                fn_count += 1
                            }
                        }
                    }
                    BatchItem::Failed(_) => failed += 1,
                }
            }
        }
        Self::from_counts(tp, fp, tn, fn_count, failed)
    }

    pub fn from_counts(
        true_positive: usize,
        false_positive: usize,
        true_negative: usize,
        false_negative: usize,
        failed: usize,
    ) -> Self {
        let scored = true_positive + false_positive + true_negative + false_negative;
        let accuracy = ratio(true_positive + true_negative, scored);
        let precision = ratio(true_positive, true_positive + false_positive);
        let recall = ratio(true_positive, true_positive + false_negative);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            true_positive,
            false_positive,
            true_negative,
            false_negative,
            failed,
            accuracy,
            precision,
            recall,
            f1,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchFailure, DetectionResult, DetectionSummary, Verdict};

    fn verdict(name: &str, decision: FinalDecision) -> BatchItem {
        BatchItem::Completed(Box::new(Verdict {
            image_name: name.into(),
            detection: DetectionResult {
                cover_missing: decision == FinalDecision::CoverMissing,
                boxes: Vec::new(),
                total_objects: 1,
            },
            vlm_analysis: None,
            final_decision: decision,
            processing_steps: vec!["detection complete".into()],
            detection_boxes: Vec::new(),
            detection_summary: DetectionSummary {
                cover_missing_count: 0,
                total_objects: 1,
                used_vlm: false,
                boxes_returned: 0,
            },
            success: true,
        }))
    }

    fn report(items: Vec<BatchItem>) -> SweepReport {
        let overall_summary = crate::batch::summarize(&items, 5);
        SweepReport {
            generated_at: Utc::now(),
            total_images: items.len(),
            total_batches: 1,
            batch_size: items.len(),
            overall_summary: overall_summary.clone(),
            batch_summaries: vec![overall_summary],
            all_results: items,
        }
    }

    #[test]
    fn metrics_from_known_counts() {
        let card = ScoreCard::from_counts(8, 2, 9, 1, 0);
        assert_eq!(card.accuracy, 17.0 / 20.0);
        assert_eq!(card.precision, 0.8);
        assert_eq!(card.recall, 8.0 / 9.0);
        let expected_f1 = 2.0 * 0.8 * (8.0 / 9.0) / (0.8 + 8.0 / 9.0);
        assert!((card.f1 - expected_f1).abs() < 1e-12);
    }

    #[test]
    fn empty_counts_avoid_division_by_zero() {
        let card = ScoreCard::from_counts(0, 0, 0, 0, 3);
        assert_eq!(card.accuracy, 0.0);
        assert_eq!(card.precision, 0.0);
        assert_eq!(card.recall, 0.0);
        assert_eq!(card.f1, 0.0);
        assert_eq!(card.failed, 3);
    }

    #[test]
    fn reports_are_scored_against_their_expected_label() {
        let alarm_report = report(vec![
            verdict("a1.jpg", FinalDecision::CoverMissing),
            verdict("a2.jpg", FinalDecision::CoverPresent),
            BatchItem::Failed(BatchFailure::new("a3.jpg", "detector request failed")),
        ]);
        let benign_report = report(vec![
            verdict("b1.jpg", FinalDecision::CoverPresent),
            verdict("b2.jpg", FinalDecision::CoverMissing),
        ]);
        let card = ScoreCard::from_reports([
            (&alarm_report, FinalDecision::CoverMissing),
            (&benign_report, FinalDecision::CoverPresent),
        ]);
        assert_eq!(card.true_positive, 1);
        assert_eq!(card.false_negative, 1);
        assert_eq!(card.true_negative, 1);
        assert_eq!(card.false_positive, 1);
        assert_eq!(card.failed, 1);
        assert_eq!(card.accuracy, 0.5);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = std::env::temp_dir().join(format!("coverwatch-report-{}", std::process::id()));
        let report = report(vec![verdict("cab_01.jpg", FinalDecision::CoverMissing)]);
        let path = report.write(&dir).expect("write report");
        assert!(
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("inference_") && n.ends_with(".json"))
        );
        let loaded = SweepReport::read(&path).expect("read report");
        assert_eq!(loaded.total_images, 1);
        assert_eq!(loaded.all_results, report.all_results);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
