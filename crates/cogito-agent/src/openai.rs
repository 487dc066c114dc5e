use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
use crate::stream::{parse_sse_line, Delta, LineBuffer, SseParsed, StreamEvent};

/// Any OpenAI-compatible `/v1/chat/completions` endpoint (DeepSeek, QwQ,
/// SiliconFlow, vLLM, llama.cpp, ...).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(ProviderError::from_send)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI-compatible API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);

        debug!(model = %req.model, "sending request to OpenAI-compatible endpoint");

        let resp = self.post(&body).await?;
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp, &req.model))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(req, true);

        debug!(model = %req.model, "sending streaming request to OpenAI-compatible endpoint");

        let resp = self.post(&body).await?;
        process_openai_stream(resp, req.model.clone(), tx).await;
        Ok(())
    }
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    // System prompt is prepended as a system message.
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if !req.system.is_empty() {
        messages.push(serde_json::json!({
            "role": "system",
            "content": req.system,
        }));
    }

    for m in &req.messages {
        messages.push(serde_json::json!({
            "role": m.role,
            "content": m.content,
        }));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": stream,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse, requested_model: &str) -> ChatResponse {
    let message = resp.choices.into_iter().next().map(|c| c.message);
    let content = message
        .as_ref()
        .and_then(|m| m.content.as_deref())
        .unwrap_or("");
    let reasoning = message
        .as_ref()
        .and_then(|m| m.reasoning_content.as_deref())
        .filter(|r| !r.is_empty());

    let content = match reasoning {
        Some(r) => format!("<think>{r}</think>{content}"),
        None => content.to_string(),
    };

    ChatResponse {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
    }
}

/// Interpret one SSE `data:` payload.
///
/// Returns `None` for `[DONE]`, otherwise the events the chunk produced.
/// Malformed JSON is logged and skipped.
fn parse_chunk(data: &str, stop_reason: &mut String) -> Option<Vec<StreamEvent>> {
    let data = data.trim();
    // OpenAI signals end-of-stream with a literal `[DONE]` data value
    if data == "[DONE]" {
        return None;
    }

    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(c) => c,
        Err(e) => {
            warn!(data, err = %e, "skipping malformed OpenAI stream frame");
            return Some(Vec::new());
        }
    };

    if let Some(err) = chunk.error {
        return Some(vec![StreamEvent::Error {
            message: err.message,
        }]);
    }

    let mut events = Vec::new();
    // Only the first choice is rendered.
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            *stop_reason = reason;
        }
        let delta = Delta {
            reasoning: choice.delta.reasoning_content,
            text: choice.delta.content,
        };
        if !delta.is_empty() {
            events.push(StreamEvent::Delta(delta));
        }
    }
    Some(events)
}

/// Parse an OpenAI streaming SSE response and emit StreamEvents.
/// Each data line contains a JSON delta object; `data: [DONE]` signals end.
async fn process_openai_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    use futures_util::StreamExt;

    let mut stop_reason = String::new();
    let mut lines = LineBuffer::new();
    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        for line in lines.push(&chunk) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                continue;
            };

            let Some(events) = parse_chunk(&data, &mut stop_reason) else {
                break 'outer;
            };
            for event in events {
                let is_error = matches!(event, StreamEvent::Error { .. });
                if tx.send(event).await.is_err() {
                    return; // receiver dropped
                }
                if is_error {
                    return;
                }
            }
        }
    }

    let _ = tx.send(StreamEvent::Done { model, stop_reason }).await;
}

// OpenAI API response types (private, deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

// OpenAI streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}
