//! HTTP summarizer and embedder for OpenAI-compatible APIs.
//!
//! Summaries go through `/chat/completions`, vectors through `/embeddings`.
//! Transient failures (timeouts, connection errors, 5xx) are retried with
//! exponential backoff before the error is handed to the engine.

use crate::config::LlmConfig;
use crate::memory::{Embedder, Summarizer};
use crate::{MemoryError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 200;
const MAX_SUMMARY_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible endpoint
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    summarization_model: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("longmem/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let api_key = config.api_key();
        if api_key.is_none() {
            warn!("{} is not set, requests will be sent without authorization", config.api_key_env);
        }

        info!(
            "LLM client: base_url={}, summarizer={}, embedder={}",
            config.base_url, config.summarization_model, config.embedding_model
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            summarization_model: config.summarization_model.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }

    /// Exponential backoff with a little deterministic jitter
    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
        let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }

    fn is_retryable_error(msg: &str) -> bool {
        msg.contains("timeout")
            || msg.contains("network")
            || msg.contains("retryable")
            || msg.contains("error sending request")
            || msg.contains("connection")
    }

    fn map_reqwest_error(e: reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::Http(format!("timeout: {e}"))
        } else if e.is_connect() {
            MemoryError::Http(format!("network: {e}"))
        } else {
            MemoryError::Http(e.to_string())
        }
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(500).collect();
        if status.is_server_error() {
            return Err(MemoryError::Http(format!("retryable API error {status}: {detail}")));
        }
        Err(MemoryError::Http(format!("API error {status}: {detail}")))
    }

    /// Run `op` up to `MAX_RETRY_ATTEMPTS` times while it fails transiently
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRY_ATTEMPTS || !Self::is_retryable_error(&e.to_string()) {
                        return Err(e);
                    }
                    let delay = Self::retry_backoff(attempt);
                    warn!(
                        "{} request failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, MAX_RETRY_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_chat(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.summarization_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: MAX_SUMMARY_TOKENS,
            temperature: 0.0,
            stream: false,
        };

        let response = self
            .post("chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let response = Self::check_response_status(response).await?;
        let chat: ChatResponse = response.json().await.map_err(Self::map_reqwest_error)?;

        Ok(chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn send_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .post("embeddings")
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let response = Self::check_response_status(response).await?;
        let data: EmbeddingResponse = response.json().await.map_err(Self::map_reqwest_error)?;

        data.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Http("no embedding returned".into()))
    }
}

/// Remove `<think>...</think>` blocks some models prepend to their answer
pub fn strip_think_tags(content: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let re = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think-tag pattern"));
    re.replace_all(content, "").trim().to_string()
}

/// Chunk text followed by the instruction, as sent to the summarizer
pub fn build_summary_prompt(text: &str, instruction: &str) -> String {
    format!("{}\n\n{}\n\nOutput:", text, instruction)
}

/// Embedding input with line breaks flattened to spaces
pub fn normalize_embedding_input(text: &str) -> String {
    text.replace('\n', " ")
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, text: &str, prompt: &str) -> Result<String> {
        let full_prompt = build_summary_prompt(text, prompt);
        debug!("Summarizing {} bytes", full_prompt.len());

        let content = self
            .with_retry("Summarization", || self.send_chat(&full_prompt))
            .await
            .map_err(|e| MemoryError::SummarizationFailed(e.to_string()))?;

        let summary = strip_think_tags(&content);
        if summary.is_empty() {
            return Err(MemoryError::SummarizationFailed("empty summary".into()));
        }
        Ok(summary)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = normalize_embedding_input(text);
        self.with_retry("Embedding", || self.send_embedding(&input))
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))
    }
}
