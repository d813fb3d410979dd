//! Stream plumbing shared by the backend adapters: OpenAI tool-call
//! aggregation, SSE and NDJSON framing, and cancellation.

use crate::types::{MessageChunk, MessageRole, OpenAIChunk, ToolCall};
use crate::{Error, Result};
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Boxed fallible stream
pub type BoxResultStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Turns OpenAI streaming deltas into message chunks.
///
/// Text is forwarded as soon as it arrives. Tool calls are streamed as
/// interleaved fragments keyed by index (id and name first, then argument
/// JSON in arbitrary slices), so they are held back and emitted whole once a
/// `finish_reason` shows up.
#[derive(Debug, Default)]
pub struct ToolCallAggregator {
    tool_calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialToolCall {
    fn into_tool_call(self) -> Result<Option<ToolCall>> {
        let Some(name) = self.name else {
            log::warn!("dropping streamed tool call without a function name");
            return Ok(None);
        };

        let arguments = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                Error::protocol(format!("failed to parse arguments for '{name}': {e}"))
            })?
        };

        let call = ToolCall::new(name, arguments);
        Ok(Some(match self.id {
            Some(id) => call.with_id(id),
            None => call,
        }))
    }
}

impl ToolCallAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one chunk, returning whatever is ready to be emitted
    pub fn process_chunk(&mut self, chunk: OpenAIChunk) -> Result<Vec<MessageChunk>> {
        let mut out = Vec::new();

        for choice in chunk.choices {
            let role = choice
                .delta
                .role
                .as_deref()
                .map(MessageRole::from_wire)
                .unwrap_or(MessageRole::Assistant);

            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    out.push(MessageChunk::text(role, content));
                }
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name = Some(name);
                    }
                    // argument JSON may be split anywhere, even mid-string
                    if let Some(args) = function.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }

            if choice.finish_reason.is_some() {
                out.extend(self.finish()?);
            }
        }

        Ok(out)
    }

    /// Emit every pending tool call, in index order
    pub fn finish(&mut self) -> Result<Vec<MessageChunk>> {
        let mut out = Vec::new();
        for (_, partial) in std::mem::take(&mut self.tool_calls) {
            if let Some(call) = partial.into_tool_call()? {
                out.push(MessageChunk::tool_call(MessageRole::Assistant, call));
            }
        }
        Ok(out)
    }
}

/// Decode an SSE byte stream into OpenAI chunks, skipping the `[DONE]`
/// sentinel.
pub fn parse_sse_stream<S, B, E>(bytes: S) -> BoxResultStream<OpenAIChunk>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = bytes.eventsource().filter_map(|event| async move {
        let event = match event {
            Ok(event) => event,
            Err(e) => return Some(Err(Error::protocol(format!("SSE stream failed: {e}")))),
        };

        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }

        Some(
            serde_json::from_str::<OpenAIChunk>(data)
                .map_err(|e| Error::protocol(format!("failed to parse chunk: {e}"))),
        )
    });

    Box::pin(stream)
}

/// Split a byte stream into trimmed, non-empty lines.
///
/// Lines are cut on raw bytes before UTF-8 decoding, so multi-byte characters
/// split across network reads survive intact.
pub fn ndjson_lines<S, B, E>(bytes: S) -> BoxResultStream<String>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| -> Error { e.into() })?;
            pending.extend_from_slice(chunk.as_ref());

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = decode_line(line)?;
                if !line.is_empty() {
                    yield line;
                }
            }
        }

        let tail = decode_line(pending)?;
        if !tail.is_empty() {
            yield tail;
        }
    })
}

fn decode_line(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::protocol(format!("invalid UTF-8 in response line: {e}")))
}

/// Await `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Stop `inner` when `cancel` fires, yielding a final [`Error::Cancelled`].
///
/// The first error from `inner` also ends the stream.
pub fn with_cancellation<T>(inner: BoxResultStream<T>, cancel: CancellationToken) -> BoxResultStream<T>
where
    T: Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(Error::Cancelled)),
                item = inner.next() => item,
            };

            match next {
                Some(Ok(item)) => yield Ok(item),
                Some(Err(err)) => {
                    yield Err(err);
                    break;
                }
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpenAIChoice, OpenAIDelta, OpenAIFunctionDelta, OpenAIToolCallDelta};
    use std::time::Duration;

    fn chunk(delta: OpenAIDelta, finish_reason: Option<&str>) -> OpenAIChunk {
        OpenAIChunk {
            choices: vec![OpenAIChoice {
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    fn tool_delta(id: Option<&str>, name: Option<&str>, args: &str) -> OpenAIDelta {
        OpenAIDelta {
            role: None,
            content: None,
            tool_calls: Some(vec![OpenAIToolCallDelta {
                index: 0,
                id: id.map(str::to_string),
                function: Some(OpenAIFunctionDelta {
                    name: name.map(str::to_string),
                    arguments: Some(args.to_string()),
                }),
            }]),
        }
    }

    #[test]
    fn test_tool_call_aggregator_text_is_immediate() {
        let mut aggregator = ToolCallAggregator::new();

        let out = aggregator
            .process_chunk(chunk(
                OpenAIDelta {
                    content: Some("Hello ".to_string()),
                    ..Default::default()
                },
                None,
            ))
            .unwrap();

        assert_eq!(out, vec![MessageChunk::text(MessageRole::Assistant, "Hello ")]);
    }

    #[test]
    fn test_tool_call_aggregator_tool() {
        let mut aggregator = ToolCallAggregator::new();

        let out = aggregator
            .process_chunk(chunk(
                tool_delta(Some("call_123"), Some("get_weather"), r#"{"location":"#),
                None,
            ))
            .unwrap();
        assert!(out.is_empty());

        let out = aggregator
            .process_chunk(chunk(tool_delta(None, None, r#""Paris"}"#), Some("tool_calls")))
            .unwrap();
        assert_eq!(out.len(), 1);

        let call = out[0].call().unwrap();
        assert_eq!(call.id(), Some("call_123"));
        assert_eq!(call.name(), "get_weather");
        assert_eq!(call.arguments()["location"], "Paris");
    }

    #[test]
    fn test_tool_call_aggregator_bad_arguments() {
        let mut aggregator = ToolCallAggregator::new();
        let result = aggregator.process_chunk(chunk(
            tool_delta(Some("c"), Some("f"), "{not json"),
            Some("tool_calls"),
        ));
        assert!(matches!(result, Err(Error::ProtocolDecode(_))));
    }

    #[tokio::test]
    async fn test_parse_sse_stream() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"4\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: [DONE]\n\n",
        );
        let bytes = futures::stream::iter(vec![Ok::<_, std::io::Error>(body.as_bytes().to_vec())]);

        let chunks: Vec<_> = parse_sse_stream(bytes).collect().await;
        assert_eq!(chunks.len(), 1);
        let chunk = chunks.into_iter().next().unwrap().unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("4"));
    }

    #[test]
    fn test_chunk_ignores_unread_wire_fields() {
        let raw = r#"{
            "id": "chatcmpl-1", "model": "gpt-4o", "object": "chat.completion.chunk",
            "choices": [{"index": 0, "finish_reason": null, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "add", "arguments": "{}"}}
            ]}}]
        }"#;

        let chunk: OpenAIChunk = serde_json::from_str(raw).unwrap();
        let mut aggregator = ToolCallAggregator::new();
        assert!(aggregator.process_chunk(chunk).unwrap().is_empty());

        let calls = aggregator.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call().unwrap().name(), "add");
    }

    #[tokio::test]
    async fn test_ndjson_lines_reassembles_split_reads() {
        let reads: Vec<Result<Vec<u8>>> = vec![
            Ok(b"{\"done\":false,".to_vec()),
            Ok(b"\"response\":\"h\xC3".to_vec()),
            Ok(b"\xA9\"}\n\n{\"done\":true}".to_vec()),
        ];

        let lines: Vec<String> = ndjson_lines(futures::stream::iter(reads))
            .map(|l| l.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                "{\"done\":false,\"response\":\"h\u{e9}\"}".to_string(),
                "{\"done\":true}".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cancellable(&cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_with_cancellation_stops_pending_stream() {
        let cancel = CancellationToken::new();
        let inner: BoxResultStream<u32> = Box::pin(futures::stream::pending());
        let mut stream = with_cancellation(inner, cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
    }
}
