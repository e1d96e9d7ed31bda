use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail, ensure};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use coverwatch::batch::{self, BatchImage};
use coverwatch::config::Config;
use coverwatch::detector::DetectorClient;
use coverwatch::logging;
use coverwatch::pipeline::Pipeline;
use coverwatch::report::{ScoreCard, SweepReport};
use coverwatch::types::FinalDecision;
use coverwatch::vlm::VlmClient;

#[derive(Parser)]
#[command(
    name = "coverwatch-sweep",
    version,
    about = "Offline batch runner and report scorer"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log level override (error|warn|info|debug|trace)
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline over every image under the given inputs and write a
    /// timestamped report
    Run {
        /// Image files or directories of images to process
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Images per dispatched batch
        #[arg(long, default_value_t = 16)]
        batch_size: usize,
        /// Detector confidence threshold override
        #[arg(long)]
        confidence_threshold: Option<f32>,
        /// Directory the report is written into
        #[arg(long, default_value = "inference_result")]
        out_dir: PathBuf,
    },
    /// Score previously written reports against their expected label
    Score {
        /// Reports whose images should all be missing covers
        #[arg(long = "alarm", value_name = "REPORT")]
        alarm: Vec<PathBuf>,
        /// Reports whose images should all have covers in place
        #[arg(long = "benign", value_name = "REPORT")]
        benign: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    logging::init(&config.logging, cli.log_level.as_deref());

    match cli.command {
        Command::Run {
            inputs,
            batch_size,
            confidence_threshold,
            out_dir,
        } => run_sweep(&config, &inputs, batch_size, confidence_threshold, &out_dir).await,
        Command::Score { alarm, benign } => score_reports(&alarm, &benign),
    }
}

async fn run_sweep(
    config: &Config,
    inputs: &[PathBuf],
    batch_size: usize,
    confidence_threshold: Option<f32>,
    out_dir: &Path,
) -> Result<()> {
    let images = collect_images(inputs)?;
    ensure!(!images.is_empty(), "no images found under the given inputs");
    info!(images = images.len(), batch_size, "starting sweep");

    let detector = DetectorClient::new(&config.detector)?;
    let analyst = VlmClient::new(&config.vlm)?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(detector),
        Arc::new(analyst),
        config.prompt.clone(),
    ));

    let started = Instant::now();
    let mut all_results = Vec::with_capacity(images.len());
    let mut batch_summaries = Vec::new();
    for chunk in images.chunks(batch_size.max(1)) {
        let mut entries = Vec::with_capacity(chunk.len());
        for path in chunk {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading image {}", path.display()))?;
            let image_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            entries.push(BatchImage {
                image: bytes,
                image_name,
                confidence_threshold,
            });
        }
        let (results, summary) =
            batch::run_batch(pipeline.clone(), entries, config.server.max_workers).await;
        batch_summaries.push(summary);
        all_results.extend(results);
    }

    let overall_summary = batch::summarize(&all_results, started.elapsed().as_millis() as u64);
    let report = SweepReport {
        generated_at: Utc::now(),
        total_images: all_results.len(),
        total_batches: batch_summaries.len(),
        batch_size,
        overall_summary,
        batch_summaries,
        all_results,
    };
    let path = report.write(out_dir)?;
    info!(
        report = %path.display(),
        total = report.total_images,
        alarms = report.overall_summary.alarm_count,
        failures = report.total_images - report.overall_summary.success_count,
        "sweep complete"
    );
    Ok(())
}

fn score_reports(alarm: &[PathBuf], benign: &[PathBuf]) -> Result<()> {
    ensure!(
        !(alarm.is_empty() && benign.is_empty()),
        "provide at least one report via --alarm or --benign"
    );

    let mut labeled = Vec::new();
    for path in alarm {
        labeled.push((SweepReport::read(path)?, FinalDecision::CoverMissing));
    }
    for path in benign {
        labeled.push((SweepReport::read(path)?, FinalDecision::CoverPresent));
    }

    let card = ScoreCard::from_reports(labeled.iter().map(|(report, expected)| (report, *expected)));
    println!("{}", serde_json::to_string_pretty(&card)?);
    Ok(())
}

/// Gather image files from the given paths, one directory level deep, sorted
/// for reproducible report ordering.
fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let listing = std::fs::read_dir(input)
                .with_context(|| format!("listing {}", input.display()))?;
            for entry in listing {
                let path = entry
                    .with_context(|| format!("listing {}", input.display()))?
                    .path();
                if path.is_file() && has_image_extension(&path) {
                    found.push(path);
                }
            }
        } else if input.is_file() {
            found.push(input.clone());
        } else {
            bail!("input {} does not exist", input.display());
        }
    }
    found.sort();
    Ok(found)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(image::ImageFormat::from_extension)
        .is_some()
}
