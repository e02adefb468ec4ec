//! Provider backed by any OpenAI-compatible chat completions endpoint.
//!
//! Speaks the `POST {base_url}/chat/completions` wire protocol in both
//! blocking and streaming (SSE) modes and maps responses into the crate's
//! canonical types. Wire parsing is kept in pure functions so the mapping
//! and the SSE line decoder are testable without a live endpoint.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{ChunkStream, Provider, ProviderError, Tier};
use crate::api_types::{
    ChatCompletionChunk, ChatCompletionResult, ChatRequest, FinishReason, Message, Usage,
};

const DONE_SENTINEL: &str = "[DONE]";

/// A single upstream endpoint speaking the OpenAI chat completions API.
pub struct OpenAiCompatibleProvider {
    id: String,
    tier: Tier,
    priority: u32,
    models: Vec<String>,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        tier: Tier,
        priority: u32,
        models: Vec<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            priority,
            models,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn supported_models(&self) -> &[String] {
        &self.models
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResult, ProviderError> {
        let body = WireRequest::blocking(request);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = self.post(&body) => result?,
        };

        let completion: WireCompletion = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = response.json() => result?,
        };

        map_completion(completion)
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let body = WireRequest::streaming(request);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = self.post(&body) => result?,
        };

        Ok(SseChunkStream::new(response.bytes_stream().boxed()).boxed())
    }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<WireStreamOptions>,
}

#[derive(Serialize)]
struct WireStreamOptions {
    include_usage: bool,
}

impl<'a> WireRequest<'a> {
    fn blocking(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            stream_options: None,
        }
    }

    fn streaming(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: Some(WireStreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    id: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage {
            prompt_tokens: wire.prompt_tokens,
            completion_tokens: wire.completion_tokens,
            total_tokens: if wire.total_tokens > 0 {
                wire.total_tokens
            } else {
                wire.prompt_tokens + wire.completion_tokens
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    id: String,
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    delta: WireDelta,
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
}

fn map_completion(wire: WireCompletion) -> Result<ChatCompletionResult, ProviderError> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Protocol("completion carried no choices".to_string()))?;

    Ok(ChatCompletionResult {
        id: wire.id,
        content: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason.unwrap_or(FinishReason::Stop),
        usage: wire.usage.map(Usage::from).unwrap_or_default(),
    })
}

/// Map one SSE data payload. Returns `None` for chunks that carry nothing we
/// surface (e.g. a bare role announcement with no content, finish reason, or
/// usage).
fn map_chunk(payload: &str) -> Result<Option<ChatCompletionChunk>, ProviderError> {
    let wire: WireChunk = serde_json::from_str(payload)
        .map_err(|e| ProviderError::Protocol(format!("bad chunk payload: {e}")))?;

    let (delta, finish_reason) = match wire.choices.into_iter().next() {
        Some(choice) => (
            choice.delta.content.unwrap_or_default(),
            choice.finish_reason,
        ),
        // Usage-only trailer chunks have an empty choices array
        None => (String::new(), None),
    };

    let usage = wire.usage.map(Usage::from);
    if delta.is_empty() && finish_reason.is_none() && usage.is_none() {
        return Ok(None);
    }

    Ok(Some(ChatCompletionChunk {
        id: wire.id,
        delta,
        finish_reason,
        usage,
    }))
}

// ─── SSE decoding ────────────────────────────────────────────────────────────

/// Incremental decoder for `text/event-stream` bodies. Feed raw byte slices
/// in whatever framing the transport delivers; complete `data:` lines come
/// out as canonical chunks.
struct SseParser {
    buffer: BytesMut,
    done: bool,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            done: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<ChatCompletionChunk>, ProviderError> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(newline + 1);
            if self.done {
                continue;
            }

            let line = std::str::from_utf8(&line[..newline])
                .map_err(|_| ProviderError::Protocol("non-UTF-8 event line".to_string()))?
                .trim_end_matches('\r');

            // Blank separator lines and comment lines carry no data
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();

            if payload == DONE_SENTINEL {
                self.done = true;
                self.buffer.advance(self.buffer.len());
                continue;
            }

            if let Some(chunk) = map_chunk(payload)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// Adapts a raw response byte stream into a stream of canonical chunks.
struct SseChunkStream {
    body: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    pending: VecDeque<ChatCompletionChunk>,
    terminated: bool,
}

impl SseChunkStream {
    fn new(body: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            body,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            terminated: false,
        }
    }
}

impl Stream for SseChunkStream {
    type Item = Result<ChatCompletionChunk, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(chunk) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if this.terminated {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match this.parser.push(&bytes) {
                    Ok(chunks) => {
                        this.pending.extend(chunks);
                        if this.parser.is_done() {
                            this.terminated = true;
                        }
                    }
                    Err(error) => {
                        this.terminated = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                },
                Poll::Ready(Some(Err(error))) => {
                    this.terminated = true;
                    return Poll::Ready(Some(Err(error.into())));
                }
                Poll::Ready(None) => {
                    this.terminated = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
