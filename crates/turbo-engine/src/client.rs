//! Ollama-compatible inference client
//!
//! Speaks the backend's newline-delimited JSON chat protocol. Every request
//! carries a connect timeout and an overall deadline; failures surface as a
//! single terminal error item on the returned stream. There is no retry
//! logic here — callers decide whether a failed query is worth repeating.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use turbo_core::config::BackendConfig;
use turbo_core::{Error, Result};

/// One chat turn sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-request sampling knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_tokens: u32,
}

impl From<&BackendConfig> for ChatOptions {
    fn from(config: &BackendConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            context_tokens: config.context_tokens,
        }
    }
}

/// One decoded streaming frame
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

/// Token stream handed to the caller. Dropping it cancels the request.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: WireOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
}

#[derive(Serialize)]
struct WireOptions {
    temperature: f32,
    num_predict: u32,
    num_ctx: u32,
}

impl From<ChatOptions> for WireOptions {
    fn from(options: ChatOptions) -> Self {
        Self {
            temperature: options.temperature,
            num_predict: options.max_tokens,
            num_ctx: options.context_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct ReleaseRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

#[derive(Serialize)]
struct WarmRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// HTTP client for an Ollama-compatible serving endpoint
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    config: BackendConfig,
}

impl OllamaClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::backend_unavailable(format!("http client init failed: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    /// Cheap reachability probe against the backend's root endpoint
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.endpoint)
            .timeout(self.config.connect_timeout())
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::backend_unavailable(format!(
                "backend responded with {}",
                response.status()
            )))
        }
    }

    /// Stream a chat completion.
    ///
    /// The returned stream yields token chunks as the backend produces them.
    /// Exactly one terminal item follows any failure (connect refused,
    /// non-success status, deadline exceeded, malformed frame); a clean end
    /// of stream means the backend reported `done`.
    pub fn stream(&self, model: &str, messages: Vec<ChatMessage>) -> TokenStream {
        let messages = truncate_messages(messages, self.config.prompt_char_limit);
        let request = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .timeout(self.config.request_timeout())
            .json(&ChatRequest {
                model,
                messages: &messages,
                stream: true,
                options: ChatOptions::from(&self.config).into(),
                keep_alive: None,
            });

        let model = model.to_string();
        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(32);

        tokio::spawn(async move {
            debug!(model = %model, "starting streaming chat request");
            if let Err(e) = pump_stream(request, &tx).await {
                // Receiver may already be gone; that just means the caller
                // cancelled by dropping the stream.
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Non-streaming chat completion: the full reply as one string
    pub async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let messages = truncate_messages(messages, self.config.prompt_char_limit);
        let response = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .timeout(self.config.request_timeout())
            .json(&ChatRequest {
                model,
                messages: &messages,
                stream: false,
                options: ChatOptions::from(&self.config).into(),
                keep_alive: None,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = check_status(response).await?;
        let frame: ChatFrame = response.json().await.map_err(map_transport_error)?;
        Ok(frame.message.map(|m| m.content).unwrap_or_default())
    }

    /// Load a model into backend memory without generating anything.
    /// An empty prompt makes the backend pull the weights in and idle.
    pub async fn warm(&self, model: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.endpoint))
            .timeout(self.config.request_timeout())
            .json(&WarmRequest {
                model,
                prompt: "",
                stream: false,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response).await?;
        Ok(())
    }

    /// Ask the backend to release a model's resources immediately
    pub async fn release(&self, model: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.endpoint))
            .timeout(self.config.connect_timeout())
            .json(&ReleaseRequest {
                model,
                keep_alive: 0,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl crate::cache::ModelUnloader for OllamaClient {
    async fn unload(&self, model_id: &str) -> Result<()> {
        self.release(model_id).await
    }
}

/// Drive the HTTP response and forward decoded frames. A send failure means
/// the consumer dropped the stream; we stop without error.
async fn pump_stream(
    request: reqwest::RequestBuilder,
    tx: &mpsc::Sender<Result<StreamChunk>>,
) -> Result<()> {
    let response = request.send().await.map_err(map_transport_error)?;
    let response = check_status(response).await?;

    let mut body = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = body.next().await {
        let bytes = chunk.map_err(map_transport_error)?;
        buffer.extend_from_slice(&bytes);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let frame: ChatFrame = serde_json::from_str(line).map_err(|e| {
                Error::backend_unavailable(format!("malformed stream frame: {}", e))
            })?;

            let chunk = StreamChunk {
                content: frame.message.map(|m| m.content).unwrap_or_default(),
                done: frame.done,
            };
            let done = chunk.done;

            if tx.send(Ok(chunk)).await.is_err() {
                debug!("stream consumer dropped, cancelling request");
                return Ok(());
            }
            if done {
                return Ok(());
            }
        }
    }

    // Body ended without a done frame
    warn!("backend closed the stream before signalling completion");
    Ok(())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(Error::backend_unavailable(format!(
        "backend returned {}: {}",
        status,
        detail.trim()
    )))
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("backend request timed out: {}", e))
    } else if e.is_connect() {
        Error::backend_unavailable(format!("cannot reach backend: {}", e))
    } else {
        Error::backend_unavailable(format!("backend transport error: {}", e))
    }
}

/// Hard-truncate message contents that exceed the character limit, keeping
/// the head of the prompt. Splits on a char boundary, never mid-codepoint.
fn truncate_messages(mut messages: Vec<ChatMessage>, limit: usize) -> Vec<ChatMessage> {
    for message in &mut messages {
        message.content = truncate_prompt(&message.content, limit);
    }
    messages
}

fn truncate_prompt(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }
    // Keep a margin below the limit so the ellipsis and any wrapper text the
    // caller adds still fit.
    let keep = limit.saturating_sub(500);
    let truncated: String = content.chars().take(keep).collect();
    warn!(
        limit,
        "prompt exceeded character limit, truncated to {} chars", keep
    );
    format!("{}...", truncated)
}
