use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use coverwatch::config::Config;
use coverwatch::detector::DetectorClient;
use coverwatch::logging;
use coverwatch::pipeline::Pipeline;
use coverwatch::server::{self, AppState};
use coverwatch::vlm::VlmClient;

#[derive(Debug, Parser)]
#[command(name = "coverwatch", version, about = "Missing-cover inspection service")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen address override, e.g. 0.0.0.0:5000
    #[arg(long)]
    listen: Option<String>,
    /// Log level override (error|warn|info|debug|trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref())?;
    logging::init(&config.logging, args.log_level.as_deref());

    let detector = DetectorClient::new(&config.detector)?;
    let analyst = VlmClient::new(&config.vlm)?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(detector),
        Arc::new(analyst),
        config.prompt.clone(),
    ));
    info!(
        detector = config.detector.endpoint.as_str(),
        vlm = config.vlm.api_base.as_str(),
        model = config.vlm.model.as_str(),
        "clients ready"
    );

    let state = Arc::new(AppState {
        pipeline,
        max_batch_size: config.server.max_batch_size,
        max_workers: config.server.max_workers,
    });
    let router = server::build_router(state, config.server.max_body_bytes);

    let addr = args
        .listen
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    server::serve(&addr, router).await?;
    Ok(())
}
