/// One incremental chunk from an upstream model.
///
/// `reasoning` carries the side-channel chain of thought some backends send
/// (`reasoning_content`); `text` is the regular content field, which may itself
/// contain inline `<think>` markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub reasoning: Option<String>,
    pub text: Option<String>,
}

impl Delta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            reasoning: None,
            text: Some(text.into()),
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: Some(reasoning.into()),
            text: None,
        }
    }

    /// True when every present field is empty.
    pub fn is_empty(&self) -> bool {
        self.reasoning.as_deref().map_or(true, str::is_empty)
            && self.text.as_deref().map_or(true, str::is_empty)
    }
}

/// Events emitted during a streaming upstream response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental content from the model.
    Delta(Delta),

    /// Stream completed successfully.
    Done { model: String, stop_reason: String },

    /// Error during streaming (transport failure or an error event from upstream).
    Error { message: String },
}

/// Parse a single SSE line.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event:") {
        Some(SseParsed::Event(event_type.trim_start().to_string()))
    } else {
        line.strip_prefix("data:")
            .map(|data| SseParsed::Data(data.trim_start().to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Accumulates raw body bytes and yields complete `\n`-terminated lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte UTF-8 character
/// split across network chunks is never mangled.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!rest.is_empty()).then_some(rest)
    }
}
