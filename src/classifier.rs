//! # Streaming Tool-Call Classifier
//!
//! Raw completion backends have no structured tool-call channel. They emit a
//! flat stream of text deltas, and a tool invocation is just text that
//! follows a convention: an explicit `[TOOL_CALLS]` marker, or (for models
//! that skip the marker) text that opens like a JSON array of calls, `[{"`.
//!
//! [`ToolCallClassifier`] re-segments such a stream into two lanes,
//! [`Segment::Content`] and [`Segment::ToolFragment`], incrementally and with
//! a bounded look-ahead.
//!
//! ## State Machine
//!
//! ```text
//!                 buffer starts with [TOOL_CALLS]   (marker stripped)
//!               ┌──────────────────────────────────────────────┐
//!               │  buffer starts with [{" and not JSON mode    ▼
//!  Buffering ───┼──────────────────────────────────────► EmittingTool ── '\n' ──► Finished
//!               │  more than 15 chars, no match
//!               └──────────────────────────────────────► EmittingContent
//! ```
//!
//! - **Buffering**: characters accumulate in a look-ahead buffer of at most
//!   [`LOOKAHEAD_CHARS`] + 1 characters. Leading whitespace is ignored when
//!   matching either prefix.
//! - **EmittingContent**: everything is prose from here on; there is no
//!   reclassification.
//! - **EmittingTool**: everything is tool payload until a newline that
//!   follows at least one non-whitespace payload character. That newline
//!   terminates the payload and anything after it is discarded.
//!
//! If the source ends while still buffering, the buffer is flushed as
//! content.
//!
//! ## Chunk-Boundary Independence
//!
//! Prefix rules are evaluated after every character, not after every delta,
//! so a marker split across deltas is recognized at exactly the same point
//! as one delivered whole. Splitting the input differently can change how
//! many segments come out, but never which lane a character lands in.
//!
//! ## Known Ambiguity
//!
//! Prose that happens to begin with `[{"` is classified as a tool payload
//! when JSON output mode is off. Requesting [`ResponseFormat::JsonObject`]
//! disables the structured-prefix rule (the explicit marker still applies).
//!
//! [`ResponseFormat::JsonObject`]: crate::ResponseFormat::JsonObject

use crate::Result;
use futures::stream::{Stream, StreamExt};

/// Explicit tool-invocation marker
pub const TOOL_CALL_MARKER: &str = "[TOOL_CALLS]";

/// Opening of a bare JSON array of calls
pub const STRUCTURED_PREFIX: &str = "[{\"";

/// Characters buffered before committing to content
pub const LOOKAHEAD_CHARS: usize = 15;

/// A classified piece of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Ordinary prose
    Content(String),
    /// Part of a tool-call payload
    ToolFragment(String),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Content(s) | Segment::ToolFragment(s) => s,
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Segment::ToolFragment(_))
    }
}

/// Classifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Buffering,
    EmittingContent,
    EmittingTool,
    Finished,
}

/// Per-response classifier. Create one per streamed response; it is not
/// meant to be shared or reused.
#[derive(Debug)]
pub struct ToolCallClassifier {
    state: ClassifierState,
    buffer: String,
    buffered_chars: usize,
    json_mode: bool,
    payload_started: bool,
}

impl ToolCallClassifier {
    /// `json_mode` disables the structured-prefix rule
    pub fn new(json_mode: bool) -> Self {
        Self {
            state: ClassifierState::Buffering,
            buffer: String::new(),
            buffered_chars: 0,
            json_mode,
            payload_started: false,
        }
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// True once the tool payload has been terminated by a newline
    pub fn is_finished(&self) -> bool {
        self.state == ClassifierState::Finished
    }

    /// Classify one delta.
    ///
    /// Adjacent output of the same lane is merged, so at most a handful of
    /// segments come back per call.
    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut rest = delta;

        while !rest.is_empty() {
            match self.state {
                ClassifierState::Buffering => {
                    let mut chars = rest.chars();
                    if let Some(ch) = chars.next() {
                        self.buffer_char(ch, &mut out);
                    }
                    rest = chars.as_str();
                }
                ClassifierState::EmittingContent => {
                    append(&mut out, Segment::Content(rest.to_string()));
                    rest = "";
                }
                ClassifierState::EmittingTool => {
                    self.tool_text(rest, &mut out);
                    rest = "";
                }
                ClassifierState::Finished => break,
            }
        }

        out
    }

    /// Signal end of input, flushing an undecided buffer as content
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        if self.state == ClassifierState::Buffering && !self.buffer.is_empty() {
            out.push(Segment::Content(std::mem::take(&mut self.buffer)));
        }
        self.state = ClassifierState::Finished;
        out
    }

    fn buffer_char(&mut self, ch: char, out: &mut Vec<Segment>) {
        self.buffer.push(ch);
        self.buffered_chars += 1;

        let trimmed = self.buffer.trim_start();
        if trimmed.starts_with(TOOL_CALL_MARKER) {
            self.buffer.clear();
            self.state = ClassifierState::EmittingTool;
        } else if !self.json_mode && trimmed.starts_with(STRUCTURED_PREFIX) {
            let buffered = std::mem::take(&mut self.buffer);
            self.state = ClassifierState::EmittingTool;
            self.payload_started = true;
            append(out, Segment::ToolFragment(buffered));
        } else if self.buffered_chars > LOOKAHEAD_CHARS {
            let buffered = std::mem::take(&mut self.buffer);
            self.state = ClassifierState::EmittingContent;
            append(out, Segment::Content(buffered));
        }
    }

    fn tool_text(&mut self, text: &str, out: &mut Vec<Segment>) {
        let mut end = text.len();
        for (i, ch) in text.char_indices() {
            if ch == '\n' && self.payload_started {
                end = i;
                self.state = ClassifierState::Finished;
                break;
            }
            if !ch.is_whitespace() {
                self.payload_started = true;
            }
        }

        if end > 0 {
            append(out, Segment::ToolFragment(text[..end].to_string()));
        }
    }
}

fn append(out: &mut Vec<Segment>, segment: Segment) {
    if let Some(last) = out.last_mut() {
        match (last, &segment) {
            (Segment::Content(prev), Segment::Content(next))
            | (Segment::ToolFragment(prev), Segment::ToolFragment(next)) => {
                prev.push_str(next);
                return;
            }
            _ => {}
        }
    }
    out.push(segment);
}

/// Classify a stream of text deltas.
///
/// Reading from `deltas` stops as soon as the tool payload is terminated,
/// which lets the caller's connection be dropped early.
pub fn classify_stream<S>(deltas: S, json_mode: bool) -> impl Stream<Item = Result<Segment>> + Send
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut deltas = Box::pin(deltas);
        let mut classifier = ToolCallClassifier::new(json_mode);

        while let Some(delta) = deltas.next().await {
            for segment in classifier.push(&delta?) {
                yield segment;
            }
            if classifier.is_finished() {
                break;
            }
        }

        for segment in classifier.finish() {
            yield segment;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `deltas` through a fresh classifier and return (content, tool) lanes
    fn lanes<'a>(deltas: impl IntoIterator<Item = &'a str>, json_mode: bool) -> (String, String) {
        let mut classifier = ToolCallClassifier::new(json_mode);
        let mut segments = Vec::new();
        for delta in deltas {
            segments.extend(classifier.push(delta));
        }
        segments.extend(classifier.finish());

        let mut content = String::new();
        let mut tool = String::new();
        for segment in segments {
            match segment {
                Segment::Content(s) => content.push_str(&s),
                Segment::ToolFragment(s) => tool.push_str(&s),
            }
        }
        (content, tool)
    }

    fn single_chars(input: &str) -> Vec<String> {
        input.chars().map(|c| c.to_string()).collect()
    }

    const PROSE: &str = "The capital of France is Paris.";
    const MARKED: &str = "[TOOL_CALLS] [{\"name\":\"add\",\"arguments\":{\"a\":2,\"b\":2}}]";
    const BARE: &str = "[{\"name\":\"add\",\"arguments\":{\"a\":2}}]";

    #[test]
    fn test_prose_becomes_content() {
        let (content, tool) = lanes([PROSE], false);
        assert_eq!(content, PROSE);
        assert!(tool.is_empty());
    }

    #[test]
    fn test_content_decided_after_lookahead() {
        let mut classifier = ToolCallClassifier::new(false);

        assert!(classifier.push("0123456789").is_empty());
        assert!(classifier.push("abcde").is_empty());
        assert_eq!(classifier.state(), ClassifierState::Buffering);

        let out = classifier.push("f");
        assert_eq!(out, vec![Segment::Content("0123456789abcdef".to_string())]);
        assert_eq!(classifier.state(), ClassifierState::EmittingContent);

        assert_eq!(
            classifier.push("[TOOL_CALLS]"),
            vec![Segment::Content("[TOOL_CALLS]".to_string())]
        );
    }

    #[test]
    fn test_marker_yields_only_tool_fragments() {
        let mut classifier = ToolCallClassifier::new(false);
        let mut segments = classifier.push(MARKED);
        segments.extend(classifier.finish());

        assert!(segments.iter().all(Segment::is_tool));
        let payload: String = segments.iter().map(Segment::text).collect();
        assert_eq!(payload, &MARKED[TOOL_CALL_MARKER.len()..]);
    }

    #[test]
    fn test_marker_split_across_deltas() {
        let (content, tool) = lanes(["[TOO", "L_CA", "LLS]", " [{\"name\"", ":\"x\"}]"], false);
        assert!(content.is_empty());
        assert_eq!(tool, " [{\"name\":\"x\"}]");
    }

    #[test]
    fn test_marker_after_leading_whitespace() {
        let (content, tool) = lanes([" ", "[TOOL_CALLS][]"], false);
        assert!(content.is_empty());
        assert_eq!(tool, "[]");
    }

    #[test]
    fn test_bare_structured_prefix_is_tool() {
        let (content, tool) = lanes([BARE], false);
        assert!(content.is_empty());
        assert_eq!(tool, BARE);
    }

    #[test]
    fn test_structured_prefix_ignored_in_json_mode() {
        let (content, tool) = lanes([BARE], true);
        assert_eq!(content, BARE);
        assert!(tool.is_empty());
    }

    #[test]
    fn test_marker_still_applies_in_json_mode() {
        let (content, tool) = lanes([MARKED], true);
        assert!(content.is_empty());
        assert!(!tool.is_empty());
    }

    #[test]
    fn test_short_response_flushed_as_content() {
        let (content, tool) = lanes(["4"], false);
        assert_eq!(content, "4");
        assert!(tool.is_empty());

        let (content, _) = lanes(["[{"], false);
        assert_eq!(content, "[{");
    }

    #[test]
    fn test_newline_terminates_tool_payload() {
        let mut classifier = ToolCallClassifier::new(false);
        let mut segments = classifier.push("[TOOL_CALLS][{\"name\":\"a\"}]");
        segments.extend(classifier.push("\nSome trailing chatter"));
        assert!(classifier.is_finished());
        segments.extend(classifier.push("ignored"));
        segments.extend(classifier.finish());

        let payload: String = segments.iter().map(Segment::text).collect();
        assert_eq!(payload, "[{\"name\":\"a\"}]");
    }

    #[test]
    fn test_newline_before_payload_is_kept() {
        let (content, tool) = lanes(["[TOOL_CALLS]\n", "[{\"name\":\"a\"}]"], false);
        assert!(content.is_empty());
        assert_eq!(tool, "\n[{\"name\":\"a\"}]");
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let inputs = [
            PROSE,
            MARKED,
            BARE,
            "  [{\"name\":\"a\"}]\ntrailing",
            "[TOOL_CALLS]\n[{\"name\":\"a\"}]\n\nmore",
            "short",
            "[not a tool call, just brackets]",
        ];

        for input in inputs {
            for json_mode in [false, true] {
                let whole = lanes([input], json_mode);

                let chars = single_chars(input);
                let by_char = lanes(chars.iter().map(String::as_str), json_mode);
                assert_eq!(by_char, whole, "single-char split of {input:?}");

                for (split, _) in input.char_indices().skip(1) {
                    let (a, b) = input.split_at(split);
                    assert_eq!(
                        lanes([a, b], json_mode),
                        whole,
                        "split of {input:?} at {split}"
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_classify_stream_stops_after_terminator() {
        let deltas = futures::stream::iter(vec![
            Ok("[TOOL_CALLS]".to_string()),
            Ok("[{\"name\":\"a\"}]\n".to_string()),
            Err(crate::Error::protocol("never read")),
        ]);

        let segments: Vec<_> = classify_stream(deltas, false).collect().await;
        let segments: Vec<Segment> = segments.into_iter().map(|s| s.unwrap()).collect();

        assert_eq!(
            segments,
            vec![Segment::ToolFragment("[{\"name\":\"a\"}]".to_string())]
        );
    }

    #[tokio::test]
    async fn test_classify_stream_flushes_short_content() {
        let deltas = futures::stream::iter(vec![Ok("4".to_string())]);
        let segments: Vec<_> = classify_stream(deltas, false).collect().await;

        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].as_ref().unwrap(),
            &Segment::Content("4".to_string())
        );
    }
}
