use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Path tried when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "coverwatch.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub detector: Detector,
    #[serde(default)]
    pub vlm: Vlm,
    #[serde(default)]
    pub logging: Logging,
    /// Fixed analysis prompt sent with every gated image. The wording must
    /// keep the model answering with the phrase the pipeline matches on.
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok(cfg)
    }

    /// Explicit path wins; otherwise the default path is used when it exists,
    /// else the built-in defaults. Reloading is calling this again.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load(explicit),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Default::default(),
            detector: Default::default(),
            vlm: Default::default(),
            logging: Default::default(),
            prompt: default_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Hard cap on images per batch request; larger batches are rejected.
    pub max_batch_size: usize,
    /// Upper bound on concurrently processed images within a batch.
    pub max_workers: usize,
    /// Request-body ceiling; batches of base64 images get large.
    pub max_body_bytes: usize,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            max_batch_size: 16,
            max_workers: 16,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Detector {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Used when a request does not carry its own threshold.
    pub confidence_threshold: f32,
    /// Class name whose boxes open the analysis gate.
    pub target_class: String,
}
impl Default for Detector {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8600".into(),
            timeout_secs: 10,
            confidence_threshold: 0.25,
            target_class: "missing_cover".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Vlm {
    /// OpenAI-compatible base URL, e.g. `http://host:port/v1`.
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}
impl Default for Vlm {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000/v1".into(),
            model: "qwen2.5-vl-7b-instruct".into(),
            timeout_secs: 60,
            max_retries: 3,
            max_tokens: 2048,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

fn default_prompt() -> String {
    "You are inspecting a photo of an electrical equipment cabinet for a missing \
     protective cover plate. Reason about what the image shows inside <think> tags, \
     then state your conclusion inside <answer> tags. If any cover plate is absent, \
     the answer must contain the phrase \"cover missing\". If every cover is in \
     place, answer \"cover present\"."
        .into()
}
