// src/llm/provider.rs
// Narrow provider interface (§9: "tagged variants + narrow interfaces per
// capability" rather than an inheritance hierarchy). One implementation
// targets the Anthropic Messages API's SSE event stream.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One unit of the provider's stream, following the Start/Delta/Complete
/// shape used across the `querymt` provider crates.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    ToolUseStart { index: usize, id: String, name: String },
    ToolUseInputDelta { index: usize, partial_json: String },
    ToolUseComplete { index: usize, tool_call: ToolCall },
    Usage(Usage),
    Done { stop_reason: String },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited")]
    RateLimited,
    #[error("provider returned malformed event: {0}")]
    Malformed(String),
}

pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn send_stream(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}

/// Anthropic Messages API client speaking the `text/event-stream` protocol.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String, request_timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client, api_key, base_url }
    }

}

fn clone_request(req: &CompletionRequest) -> CompletionRequest {
    CompletionRequest {
        model: req.model.clone(),
        system_prompt: req.system_prompt.clone(),
        messages: req.messages.clone(),
        tools: req.tools.clone(),
        max_tokens: req.max_tokens,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    /// Retries transient rate limits with exponential backoff (§7: 3
    /// attempts, base 2s) before surfacing an error to the orchestrator.
    async fn send_stream(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send_stream_once(clone_request(&req)).await {
                Ok(stream) => return Ok(stream),
                Err(ProviderError::RateLimited) if attempt < 3 => {
                    attempt += 1;
                    let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl AnthropicProvider {
    async fn send_stream_once(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let body = serde_json::json!({
            "model": req.model,
            "system": req.system_prompt,
            "messages": req.messages,
            "tools": req.tools.iter().map(|t| serde_json::json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })).collect::<Vec<_>>(),
            "max_tokens": req.max_tokens,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Transport(format!("provider returned {}", response.status())));
        }

        let byte_stream = response.bytes_stream();
        let chunk_stream = parse_sse(byte_stream);
        Ok(Box::pin(chunk_stream))
    }
}

/// Turns a raw SSE byte stream into `StreamChunk`s, tracking in-flight
/// tool_use blocks by content index the way Anthropic's `content_block_*`
/// events are framed.
fn parse_sse(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send {
    async_stream::try_stream! {
        let mut buffer = String::new();
        let mut tool_states: std::collections::HashMap<usize, (String, String, String)> = std::collections::HashMap::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);

                let Some(data_line) = event.lines().find(|l| l.starts_with("data:")) else {
                    continue;
                };
                let payload = data_line.trim_start_matches("data:").trim();
                if payload == "[DONE]" {
                    continue;
                }
                let parsed: Value = serde_json::from_str(payload)
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?;

                let event_type = parsed.get("type").and_then(|v| v.as_str()).unwrap_or_default();
                match event_type {
                    "content_block_start" => {
                        let index = parsed.get("index").and_then(|v| v.as_u64()).unwrap_or_default() as usize;
                        if let Some(block) = parsed.get("content_block") {
                            if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                tool_states.insert(index, (id.clone(), name.clone(), String::new()));
                                yield StreamChunk::ToolUseStart { index, id, name };
                            }
                        }
                    }
                    "content_block_delta" => {
                        let index = parsed.get("index").and_then(|v| v.as_u64()).unwrap_or_default() as usize;
                        if let Some(delta) = parsed.get("delta") {
                            match delta.get("type").and_then(|v| v.as_str()) {
                                Some("text_delta") => {
                                    let text = delta.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                                    yield StreamChunk::TextDelta(text.to_string());
                                }
                                Some("input_json_delta") => {
                                    let partial = delta.get("partial_json").and_then(|v| v.as_str()).unwrap_or_default();
                                    if let Some(state) = tool_states.get_mut(&index) {
                                        state.2.push_str(partial);
                                    }
                                    yield StreamChunk::ToolUseInputDelta { index, partial_json: partial.to_string() };
                                }
                                _ => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        let index = parsed.get("index").and_then(|v| v.as_u64()).unwrap_or_default() as usize;
                        if let Some((id, name, arguments)) = tool_states.remove(&index) {
                            yield StreamChunk::ToolUseComplete {
                                index,
                                tool_call: ToolCall { id, name, arguments },
                            };
                        }
                    }
                    "message_delta" => {
                        if let Some(usage) = parsed.get("usage") {
                            yield StreamChunk::Usage(Usage {
                                input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or_default() as u32,
                                output_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or_default() as u32,
                            });
                        }
                        if let Some(stop_reason) = parsed.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()) {
                            yield StreamChunk::Done { stop_reason: stop_reason.to_string() };
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
