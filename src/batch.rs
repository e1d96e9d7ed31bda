use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::pipeline::Pipeline;
use crate::types::{BatchFailure, BatchItem, BatchSummary, FinalDecision};

/// One image queued for batch processing.
pub struct BatchImage {
    pub image: Vec<u8>,
    pub image_name: String,
    pub confidence_threshold: Option<f32>,
}

/// Fan a batch out over the pipeline with bounded parallelism, then
/// reassemble results in input order. A failed or panicked task fills its own
/// slot with a failure record; siblings keep running.
pub async fn run_batch(
    pipeline: Arc<Pipeline>,
    images: Vec<BatchImage>,
    max_workers: usize,
) -> (Vec<BatchItem>, BatchSummary) {
    let started = Instant::now();
    let total = images.len();
    let workers = total.min(max_workers).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    info!(total, workers, "dispatching batch");

    let mut names = Vec::with_capacity(total);
    let mut handles = Vec::with_capacity(total);
    for entry in images {
        names.push(entry.image_name.clone());
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return BatchItem::Failed(BatchFailure::new(
                        entry.image_name,
                        "worker pool closed before the task ran",
                    ));
                }
            };
            match pipeline
                .run(&entry.image, &entry.image_name, entry.confidence_threshold)
                .await
            {
                Ok(verdict) => BatchItem::Completed(Box::new(verdict)),
                Err(err) => {
                    warn!(image = entry.image_name.as_str(), error = %err, "batch slot failed");
                    BatchItem::Failed(BatchFailure::new(entry.image_name, err.to_string()))
                }
            }
        }));
    }

    // Join in spawn order; execution order underneath is free to differ.
    let mut results = Vec::with_capacity(total);
    for (joined, name) in join_all(handles).await.into_iter().zip(names) {
        let item = match joined {
            Ok(item) => item,
            Err(join_err) => {
                warn!(image = name.as_str(), error = %join_err, "batch task aborted");
                BatchItem::Failed(BatchFailure::new(name, format!("task aborted: {join_err}")))
            }
        };
        results.push(item);
    }

    let summary = summarize(&results, started.elapsed().as_millis() as u64);
    info!(
        total = summary.total_count,
        success = summary.success_count,
        alarms = summary.alarm_count,
        elapsed_ms = summary.elapsed_ms,
        "batch complete"
    );
    (results, summary)
}

/// Aggregate counters over a slice of batch results.
pub fn summarize(items: &[BatchItem], elapsed_ms: u64) -> BatchSummary {
    let mut summary = BatchSummary {
        total_count: items.len(),
        success_count: 0,
        alarm_count: 0,
        vlm_used_count: 0,
        boxes_returned_count: 0,
        elapsed_ms,
    };
    for item in items {
        if let BatchItem::Completed(verdict) = item {
            summary.success_count += 1;
            if verdict.final_decision == FinalDecision::CoverMissing {
                summary.alarm_count += 1;
            }
            if verdict.detection_summary.used_vlm {
                summary.vlm_used_count += 1;
            }
            if !verdict.detection_boxes.is_empty() {
                summary.boxes_returned_count += 1;
            }
        }
    }
    summary
}
