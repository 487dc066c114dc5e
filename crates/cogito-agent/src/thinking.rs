//! Real-time split of an upstream token stream into thinking and answer text.
//!
//! Reasoning reaches us two ways: a side channel (`Delta::reasoning`) or
//! `<think>…</think>` markers embedded in regular content, possibly split
//! across deltas. [`ThinkingClassifier`] normalises both into one event shape.

use std::time::{Duration, Instant};

use cogito_core::config::{ReopenPolicy, DEFAULT_THINK_CLOSE, DEFAULT_THINK_OPEN};

use crate::stream::Delta;

/// Literal markers delimiting an inline thinking span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub open: String,
    pub close: String,
}

impl Markers {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Longest tail that may be held back waiting for the rest of a marker.
    fn carry_limit(&self) -> usize {
        self.open.len().max(self.close.len()).saturating_sub(1)
    }

    fn strip(&self, text: &str) -> String {
        text.replace(&self.open, "").replace(&self.close, "")
    }

    /// Length of the longest suffix of `text` that is a proper prefix of a marker.
    fn partial_suffix_len(&self, text: &str) -> usize {
        let max = self.carry_limit().min(text.len());
        (1..=max)
            .rev()
            .find(|&k| {
                let start = text.len() - k;
                if !text.is_char_boundary(start) {
                    return false;
                }
                let tail = &text[start..];
                [&self.open, &self.close]
                    .iter()
                    .any(|m| tail.len() < m.len() && m.starts_with(tail))
            })
            .unwrap_or(0)
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(DEFAULT_THINK_OPEN, DEFAULT_THINK_CLOSE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedEvent {
    ThinkingStart,
    ThinkingToken(String),
    ThinkingEnd { duration: Duration },
    AnswerToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Entered through `Delta::reasoning`.
    Channel,
    /// Entered through an inline open marker.
    Marker,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Answering,
    Thinking { source: Source, started: Instant },
    /// Inside a repeated inline span that the drop policy swallows. Held
    /// text is released as answer if the span never closes.
    Discarding,
}

/// Stateful per-stream classifier. Create one per upstream response.
#[derive(Debug)]
pub struct ThinkingClassifier {
    markers: Markers,
    policy: ReopenPolicy,
    phase: Phase,
    closed_once: bool,
    carry: String,
    held: String,
}

impl ThinkingClassifier {
    pub fn new(markers: Markers, policy: ReopenPolicy) -> Self {
        Self {
            markers,
            policy,
            phase: Phase::Answering,
            closed_once: false,
            carry: String::new(),
            held: String::new(),
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self.phase, Phase::Thinking { .. })
    }

    /// Classify one delta. Empty deltas yield nothing and change nothing.
    pub fn feed(&mut self, delta: &Delta) -> Vec<ClassifiedEvent> {
        let mut out = Vec::new();

        if let Some(reasoning) = delta.reasoning.as_deref().filter(|r| !r.is_empty()) {
            self.flush_carry(&mut out);
            if matches!(self.phase, Phase::Answering) && self.may_open() {
                self.open(Source::Channel, &mut out);
            }
            if self.is_thinking() {
                out.push(ClassifiedEvent::ThinkingToken(reasoning.to_string()));
            }
            return out;
        }

        if let Some(text) = delta.text.as_deref().filter(|t| !t.is_empty()) {
            // Side-channel reasoning never sends a close marker; regular text ends it.
            if let Phase::Thinking {
                source: Source::Channel,
                ..
            } = self.phase
            {
                self.close(&mut out);
            }
            let mut buf = std::mem::take(&mut self.carry);
            buf.push_str(text);
            self.scan(buf, &mut out);
        }

        out
    }

    /// End of stream: flush held-back text and close an unterminated span.
    ///
    /// A swallowed span that never closed was a stray open marker, so its
    /// text goes out as answer.
    pub fn finish(&mut self) -> Vec<ClassifiedEvent> {
        let mut out = Vec::new();
        self.flush_carry(&mut out);
        let phase = self.phase;
        match phase {
            Phase::Thinking { .. } => self.close(&mut out),
            Phase::Discarding => {
                self.phase = Phase::Answering;
                let held = std::mem::take(&mut self.held);
                self.emit(&held, &mut out);
            }
            Phase::Answering => {}
        }
        out
    }

    fn scan(&mut self, mut buf: String, out: &mut Vec<ClassifiedEvent>) {
        loop {
            let marker = match self.phase {
                Phase::Answering => &self.markers.open,
                Phase::Thinking { .. } | Phase::Discarding => &self.markers.close,
            };
            let marker_len = marker.len();
            let Some(idx) = buf.find(marker.as_str()) else {
                break;
            };

            let rest = buf.split_off(idx + marker_len);
            buf.truncate(idx);
            self.emit(&buf, out);

            let phase = self.phase;
            match phase {
                Phase::Answering if self.may_open() => self.open(Source::Marker, out),
                Phase::Answering => self.phase = Phase::Discarding,
                Phase::Thinking { .. } => self.close(out),
                Phase::Discarding => {
                    self.held.clear();
                    self.phase = Phase::Answering;
                }
            }
            buf = rest;
        }

        let keep = self.markers.partial_suffix_len(&buf);
        self.carry = buf.split_off(buf.len() - keep);
        self.emit(&buf, out);
    }

    fn emit(&mut self, text: &str, out: &mut Vec<ClassifiedEvent>) {
        let text = self.markers.strip(text);
        if text.is_empty() {
            return;
        }
        match self.phase {
            Phase::Answering => out.push(ClassifiedEvent::AnswerToken(text)),
            Phase::Thinking { .. } => out.push(ClassifiedEvent::ThinkingToken(text)),
            Phase::Discarding => self.held.push_str(&text),
        }
    }

    fn flush_carry(&mut self, out: &mut Vec<ClassifiedEvent>) {
        if self.carry.is_empty() {
            return;
        }
        let carry = std::mem::take(&mut self.carry);
        self.emit(&carry, out);
    }

    fn may_open(&self) -> bool {
        !self.closed_once || self.policy == ReopenPolicy::Reopen
    }

    fn open(&mut self, source: Source, out: &mut Vec<ClassifiedEvent>) {
        self.phase = Phase::Thinking {
            source,
            started: Instant::now(),
        };
        out.push(ClassifiedEvent::ThinkingStart);
    }

    fn close(&mut self, out: &mut Vec<ClassifiedEvent>) {
        if let Phase::Thinking { started, .. } = self.phase {
            out.push(ClassifiedEvent::ThinkingEnd {
                duration: started.elapsed(),
            });
            self.phase = Phase::Answering;
            self.closed_once = true;
        }
    }
}

/// Remove complete thinking spans and any stray markers from finished text.
///
/// An unterminated open marker is dropped but the text after it is kept.
pub fn filter_think_spans(text: &str, markers: &Markers) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(&markers.open) {
        let after = &rest[start + markers.open.len()..];
        match after.find(&markers.close) {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after[end + markers.close.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    markers.strip(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(events: &[ClassifiedEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                ClassifiedEvent::ThinkingStart => "start".to_string(),
                ClassifiedEvent::ThinkingToken(t) => format!("think:{t}"),
                ClassifiedEvent::ThinkingEnd { .. } => "end".to_string(),
                ClassifiedEvent::AnswerToken(t) => format!("answer:{t}"),
            })
            .collect()
    }

    fn run(classifier: &mut ThinkingClassifier, deltas: &[Delta]) -> Vec<String> {
        let mut events = Vec::new();
        for d in deltas {
            events.extend(classifier.feed(d));
        }
        events.extend(classifier.finish());
        render(&events)
    }

    fn texts(parts: &[&str]) -> Vec<Delta> {
        parts.iter().map(|p| Delta::text(*p)).collect()
    }

    fn drop_policy() -> ThinkingClassifier {
        ThinkingClassifier::new(Markers::default(), ReopenPolicy::Drop)
    }

    #[test]
    fn marker_span_across_deltas() {
        let mut c = drop_policy();
        let events = run(
            &mut c,
            &texts(&["<think>", "reasoning text ", "more.</think>", "Final answer."]),
        );
        assert_eq!(
            events,
            vec![
                "start",
                "think:reasoning text ",
                "think:more.",
                "end",
                "answer:Final answer."
            ]
        );
    }

    #[test]
    fn missing_close_ends_once_on_finish() {
        let mut c = drop_policy();
        let mut events = c.feed(&Delta::text("<think>still going"));
        assert!(c.is_thinking());
        events.extend(c.finish());
        let rendered = render(&events);
        assert_eq!(rendered, vec!["start", "think:still going", "end"]);
        assert!(c.finish().is_empty(), "second finish must not close again");
    }

    #[test]
    fn side_channel_matches_marker_shape() {
        let mut c = drop_policy();
        let side = run(
            &mut c,
            &[
                Delta::reasoning("step one "),
                Delta::reasoning("step two"),
                Delta::text("Done."),
            ],
        );

        let mut c = drop_policy();
        let inline = run(&mut c, &texts(&["<think>step one ", "step two</think>", "Done."]));

        assert_eq!(side, inline);
        assert_eq!(
            side,
            vec!["start", "think:step one ", "think:step two", "end", "answer:Done."]
        );
    }

    #[test]
    fn split_open_marker_is_detected() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["<thi", "nk>internal reasoning</think>answer"]));
        assert_eq!(
            events,
            vec!["start", "think:internal reasoning", "end", "answer:answer"]
        );
        assert!(events.iter().all(|e| !e.contains("<thi")));
    }

    #[test]
    fn split_close_marker_is_detected() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["<think>abc</th", "ink>xyz"]));
        assert_eq!(events, vec!["start", "think:abc", "end", "answer:xyz"]);
    }

    #[test]
    fn empty_delta_changes_nothing() {
        let mut c = drop_policy();
        assert!(c.feed(&Delta::default()).is_empty());
        assert!(c
            .feed(&Delta {
                reasoning: Some(String::new()),
                text: Some(String::new()),
            })
            .is_empty());
        assert!(!c.is_thinking());

        c.feed(&Delta::text("<think>x"));
        assert!(c.feed(&Delta::default()).is_empty());
        assert!(c.is_thinking());
    }

    #[test]
    fn text_without_markers_is_all_answer() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["Hello", ", world"]));
        assert_eq!(events, vec!["answer:Hello", "answer:, world"]);
    }

    #[test]
    fn answer_before_and_after_span_in_one_delta() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["pre<think>mid</think>post"]));
        assert_eq!(
            events,
            vec!["answer:pre", "start", "think:mid", "end", "answer:post"]
        );
    }

    #[test]
    fn held_back_prefix_flushed_on_finish() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["a < b, c <"]));
        assert_eq!(events, vec!["answer:a < b, c ", "answer:<"]);
    }

    #[test]
    fn stray_close_marker_is_stripped() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["a</think>b"]));
        assert_eq!(events, vec!["answer:ab"]);
    }

    #[test]
    fn drop_policy_swallows_second_span() {
        let mut c = drop_policy();
        let events = run(
            &mut c,
            &texts(&["<think>a</think>b", "<think>hidden</think>", "c"]),
        );
        assert_eq!(
            events,
            vec!["start", "think:a", "end", "answer:b", "answer:c"]
        );
    }

    #[test]
    fn drop_policy_keeps_text_after_unclosed_marker() {
        let mut c = drop_policy();
        let events = run(
            &mut c,
            &texts(&[
                "<think>a</think>",
                "Wrap it in a <think>",
                " tag. ",
                "The rest of the answer.",
            ]),
        );
        assert_eq!(
            events,
            vec![
                "start",
                "think:a",
                "end",
                "answer:Wrap it in a ",
                "answer: tag. The rest of the answer."
            ]
        );
    }

    #[test]
    fn drop_policy_ignores_late_reasoning() {
        let mut c = drop_policy();
        let events = run(
            &mut c,
            &[
                Delta::reasoning("first"),
                Delta::text("answer"),
                Delta::reasoning("late"),
                Delta::text(" more"),
            ],
        );
        assert_eq!(
            events,
            vec!["start", "think:first", "end", "answer:answer", "answer: more"]
        );
    }

    #[test]
    fn reopen_policy_starts_new_span() {
        let mut c = ThinkingClassifier::new(Markers::default(), ReopenPolicy::Reopen);
        let events = run(&mut c, &texts(&["<think>a</think>b<think>c</think>d"]));
        assert_eq!(
            events,
            vec![
                "start", "think:a", "end", "answer:b", "start", "think:c", "end", "answer:d"
            ]
        );
    }

    #[test]
    fn reopen_policy_accepts_late_reasoning() {
        let mut c = ThinkingClassifier::new(Markers::default(), ReopenPolicy::Reopen);
        let events = run(
            &mut c,
            &[Delta::reasoning("one"), Delta::text("x"), Delta::reasoning("two")],
        );
        assert_eq!(
            events,
            vec!["start", "think:one", "end", "answer:x", "start", "think:two", "end"]
        );
    }

    #[test]
    fn multibyte_text_near_markers() {
        let mut c = drop_policy();
        let events = run(&mut c, &texts(&["思考<th", "ink>深度</think>答案"]));
        assert_eq!(
            events,
            vec!["answer:思考", "start", "think:深度", "end", "answer:答案"]
        );
    }

    #[test]
    fn custom_markers() {
        let mut c = ThinkingClassifier::new(Markers::new("[[", "]]"), ReopenPolicy::Drop);
        let events = run(&mut c, &texts(&["[", "[plan]", "]ok"]));
        assert_eq!(events, vec!["start", "think:plan", "end", "answer:ok"]);
    }

    #[test]
    fn filter_removes_complete_spans() {
        let m = Markers::default();
        assert_eq!(
            filter_think_spans("<think>why</think>Paris is the capital.", &m),
            "Paris is the capital."
        );
        assert_eq!(filter_think_spans("a<think>1</think>b<think>2</think>c", &m), "abc");
    }

    #[test]
    fn filter_drops_unterminated_markers_only() {
        let m = Markers::default();
        assert_eq!(filter_think_spans("<think>no end", &m), "no end");
        assert_eq!(filter_think_spans("tail</think>", &m), "tail");
        assert_eq!(filter_think_spans("", &m), "");
    }
}
