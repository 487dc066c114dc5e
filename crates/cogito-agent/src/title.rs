//! Thread title generation: a one-shot, non-streamed call made in the
//! background after a thread's first completed turn.

use tracing::debug;

use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};
use crate::thinking::{filter_think_spans, Markers};

const TITLE_SYSTEM_PROMPT: &str = concat!(
    "You name chat conversations. ",
    "Reply with a short title (at most six words) that describes the user's request. ",
    "Reply with the title only: no quotes, no trailing punctuation, no explanation."
);

/// Characters of the first exchange sent to the model.
const EXCERPT_CHARS: usize = 1_000;

/// Ask `provider` for a title summarising the first exchange of a thread.
pub async fn generate_title(
    provider: &dyn LlmProvider,
    model: &str,
    user_text: &str,
    answer: &str,
    markers: &Markers,
    max_chars: usize,
) -> Result<String, ProviderError> {
    let req = ChatRequest {
        model: model.to_string(),
        system: TITLE_SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(format!(
            "User: {}\n\nAssistant: {}",
            excerpt(user_text),
            excerpt(answer)
        ))],
        temperature: Some(0.3),
        stream: false,
    };

    let resp = provider.send(&req).await?;
    let title = clean_title(&filter_think_spans(&resp.content, markers), max_chars);
    debug!(raw_len = resp.content.len(), title = %title, "title generated");

    if title.is_empty() {
        return Err(ProviderError::Parse("model returned an empty title".to_string()));
    }
    Ok(title)
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First non-empty line, without markdown heading marks, quotes or trailing
/// punctuation, cut to `max_chars` characters.
pub fn clean_title(raw: &str, max_chars: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    let line = line.trim_start_matches('#').trim();
    let line = line.strip_prefix("Title:").unwrap_or(line);
    let line = line
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '*' | '`'))
        .trim_end_matches(|c| matches!(c, '.' | '。' | '!' | '?' | ':'))
        .trim();

    line.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
