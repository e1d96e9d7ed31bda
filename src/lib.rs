//! Two-stage missing-cover inspection: a remote object detector gates whether
//! a vision-language model is consulted, and its answer is matched into a
//! final per-image verdict served over HTTP or swept offline into reports.

pub mod batch;
pub mod config;
pub mod detector;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod routes;
pub mod server;
pub mod types;
pub mod vlm;
