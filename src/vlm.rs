use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::config;
use crate::types::VlmAnalysis;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

/// One failed attempt against the language-model service, classified by how
/// the retry schedule treats it.
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallFailure {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallFailure::Timeout(err.to_string())
        } else if err.is_connect() {
            CallFailure::Connect(err.to_string())
        } else if err.is_decode() {
            CallFailure::Malformed(err.to_string())
        } else {
            // Remaining send errors (resets, broken pipes) are transport-level.
            CallFailure::Connect(err.to_string())
        }
    }
}

/// Retry schedule for language-model calls. Injected into the client so tests
/// can run it without sleeping.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause after a non-success HTTP status.
    pub status_backoff: Duration,
    /// Pause after a timeout or connection failure.
    pub transport_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            status_backoff: Duration::from_secs(1),
            transport_backoff: Duration::from_secs(2),
        }
    }

    /// Same attempt budget, zero delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            status_backoff: Duration::ZERO,
            transport_backoff: Duration::ZERO,
        }
    }

    /// Delay before the next attempt, or `None` when the failure class must
    /// not be retried.
    pub fn backoff_for(&self, failure: &CallFailure) -> Option<Duration> {
        match failure {
            CallFailure::Status { .. } => Some(self.status_backoff),
            CallFailure::Timeout(_) | CallFailure::Connect(_) => Some(self.transport_backoff),
            CallFailure::Malformed(_) => None,
        }
    }
}

/// Run `attempt` until it succeeds, the failure class is non-retryable, or
/// the attempt budget is spent. Returns the last failure on exhaustion.
async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, CallFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CallFailure>>,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(failure) => match policy.backoff_for(&failure) {
                Some(delay) if n < policy.max_attempts => {
                    warn!(
                        attempt = n,
                        max_attempts = policy.max_attempts,
                        error = %failure,
                        "language-model call failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                _ => return Err(failure),
            },
        }
    }
}

/// Seam over the analysis stage so the pipeline can run against mocks.
/// Failure is reported inside the result, never as an error.
#[async_trait]
pub trait VisionAnalyst: Send + Sync {
    async fn analyze(&self, image: &[u8], prompt: &str) -> VlmAnalysis;
}

pub struct VlmClient {
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
    http: Client,
}

impl VlmClient {
    pub fn new(cfg: &config::Vlm) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            retry: RetryPolicy::new(cfg.max_retries),
            http,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn chat_body(&self, image_base64: &str, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{image_base64}") },
                    },
                ],
            }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

async fn send_chat(http: Client, url: String, body: serde_json::Value) -> Result<String, CallFailure> {
    let resp = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(CallFailure::from_transport)?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(CallFailure::Status {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: ChatResponse = resp
        .json()
        .await
        .map_err(|e| CallFailure::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| CallFailure::Malformed("response carried no choices".into()))
}

#[async_trait]
impl VisionAnalyst for VlmClient {
    async fn analyze(&self, image: &[u8], prompt: &str) -> VlmAnalysis {
        let started = Instant::now();
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image);
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.chat_body(&image_base64, prompt);

        let outcome = with_retries(&self.retry, |_| {
            let http = self.http.clone();
            let url = url.clone();
            let body = body.clone();
            async move { send_chat(http, url, body).await }
        })
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(raw) => {
                let (reasoning, answer) = extract_tagged(&raw);
                VlmAnalysis {
                    success: true,
                    reasoning,
                    answer,
                    raw,
                    elapsed_ms,
                    model: self.model.clone(),
                    error: None,
                }
            }
            Err(failure) => {
                error!(error = %failure, elapsed_ms, "language-model analysis failed");
                VlmAnalysis {
                    success: false,
                    reasoning: String::new(),
                    answer: String::new(),
                    raw: String::new(),
                    elapsed_ms,
                    model: self.model.clone(),
                    error: Some(failure.to_string()),
                }
            }
        }
    }
}

/// Pull the reasoning and answer sections out of a raw model response. A
/// missing or unclosed pair yields an empty string; that is a normal outcome,
/// not a parse error.
pub fn extract_tagged(raw: &str) -> (String, String) {
    (
        section(raw, THINK_OPEN, THINK_CLOSE),
        section(raw, ANSWER_OPEN, ANSWER_CLOSE),
    )
}

fn section(raw: &str, open: &str, close: &str) -> String {
    let Some(start) = raw.find(open) else {
        return String::new();
    };
    let rest = &raw[start + open.len()..];
    let Some(end) = rest.find(close) else {
        return String::new();
    };
    rest[..end].trim().to_string()
}
