use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
use crate::stream::{Delta, LineBuffer, StreamEvent};

/// Runs a Langflow flow. The flow owns its own prompt and memory, so only
/// the latest user message is sent.
pub struct LangflowProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    flow_id: String,
}

impl LangflowProvider {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        flow_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            flow_id: flow_id.into(),
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        let url = format!("{}/api/v1/run/{}", self.base_url, self.flow_id);
        if stream {
            format!("{url}?stream=true")
        } else {
            url
        }
    }

    async fn post(
        &self,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = serde_json::json!({
            "input_value": req.last_user_text(),
            "output_type": "chat",
            "input_type": "chat",
        });

        let mut builder = self
            .client
            .post(self.endpoint(stream))
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(ProviderError::from_send)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, flow = %self.flow_id, "Langflow API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for LangflowProvider {
    fn name(&self) -> &str {
        "langflow"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        debug!(flow = %self.flow_id, "running Langflow flow");

        let resp = self.post(req, false).await?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = extract_run_text(&value)
            .ok_or_else(|| ProviderError::Parse("no chat message in flow output".to_string()))?;

        Ok(ChatResponse {
            content,
            model: self.flow_id.clone(),
        })
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        debug!(flow = %self.flow_id, "streaming Langflow flow");

        let resp = self.post(req, true).await?;
        process_langflow_stream(resp, self.flow_id.clone(), tx).await;
        Ok(())
    }
}

/// First chat message text of a non-streamed run response.
fn extract_run_text(value: &serde_json::Value) -> Option<String> {
    let output = value.pointer("/outputs/0/outputs/0")?;
    output
        .pointer("/results/message/text")
        .or_else(|| output.pointer("/messages/0/message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Decode literal `\uXXXX` escapes (including surrogate pairs) left in a chunk.
pub fn decode_unicode_escapes(s: &str) -> Result<String, ProviderError> {
    if !s.contains("\\u") {
        return Ok(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' || chars.peek() != Some(&'u') {
            out.push(c);
            continue;
        }
        chars.next();

        let hi = read_hex4(&mut chars)?;
        let code = if (0xD800..0xDC00).contains(&hi) {
            if chars.next() != Some('\\') || chars.next() != Some('u') {
                return Err(ProviderError::Decode(format!(
                    "unpaired surrogate \\u{hi:04x}"
                )));
            }
            let lo = read_hex4(&mut chars)?;
            if !(0xDC00..0xE000).contains(&lo) {
                return Err(ProviderError::Decode(format!(
                    "invalid low surrogate \\u{lo:04x}"
                )));
            }
            0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00)
        } else {
            hi
        };

        let ch = char::from_u32(code)
            .ok_or_else(|| ProviderError::Decode(format!("invalid code point {code:#x}")))?;
        out.push(ch);
    }
    Ok(out)
}

fn read_hex4(chars: &mut impl Iterator<Item = char>) -> Result<u32, ProviderError> {
    let hex: String = chars.take(4).collect();
    if hex.chars().count() != 4 {
        return Err(ProviderError::Decode(format!("truncated escape \\u{hex}")));
    }
    u32::from_str_radix(&hex, 16)
        .map_err(|_| ProviderError::Decode(format!("bad escape \\u{hex}")))
}

/// One NDJSON line, interpreted.
#[derive(Debug)]
enum Frame {
    Token(Delta),
    End,
    Error(String),
    Skip,
}

fn parse_line(line: &str) -> Frame {
    let event = match serde_json::from_str::<LangflowEvent>(line) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(line, err = %e, "failed to parse Langflow stream line");
            return Frame::Skip;
        }
    };

    match event.event.as_str() {
        "token" => {
            let chunk = event
                .data
                .get("chunk")
                .and_then(|c| c.as_str())
                .unwrap_or_default();
            // empty chunks are keep-alive heartbeats
            if chunk.is_empty() {
                return Frame::Skip;
            }
            match decode_unicode_escapes(chunk) {
                Ok(text) => Frame::Token(Delta::text(text)),
                Err(e) => {
                    warn!(chunk, err = %e, "skipping undecodable Langflow token");
                    Frame::Skip
                }
            }
        }
        "add_message" => {
            debug!(id = ?event.data.get("id"), "langflow message created");
            Frame::Skip
        }
        "end" => Frame::End,
        "error" => {
            let message = event
                .data
                .get("error")
                .or_else(|| event.data.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("flow reported an error")
                .to_string();
            Frame::Error(message)
        }
        other => {
            debug!(event = other, "ignoring Langflow event");
            Frame::Skip
        }
    }
}

/// Parse Langflow's newline-delimited JSON event stream.
async fn process_langflow_stream(
    resp: reqwest::Response,
    flow_id: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    use futures_util::StreamExt;

    let mut lines = LineBuffer::new();
    let mut byte_stream = resp.bytes_stream();
    let mut ended = false;

    while let Some(chunk) = byte_stream.next().await {
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
            if !forward_line(&line, &tx, &mut ended).await {
                return;
            }
            if ended {
                break;
            }
        }
        if ended {
            break;
        }
    }

    if !ended {
        if let Some(tail) = lines.finish() {
            if !forward_line(&tail, &tx, &mut ended).await {
                return;
            }
        }
    }

    let _ = tx
        .send(StreamEvent::Done {
            model: flow_id,
            stop_reason: "end".to_string(),
        })
        .await;
}

/// Returns `false` when streaming must stop without a `Done` event.
async fn forward_line(line: &str, tx: &mpsc::Sender<StreamEvent>, ended: &mut bool) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    match parse_line(line) {
        Frame::Token(delta) => tx.send(StreamEvent::Delta(delta)).await.is_ok(),
        Frame::End => {
            *ended = true;
            true
        }
        Frame::Error(message) => {
            let _ = tx.send(StreamEvent::Error { message }).await;
            false
        }
        Frame::Skip => true,
    }
}

#[derive(Deserialize)]
struct LangflowEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}
