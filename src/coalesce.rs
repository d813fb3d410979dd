//! Chunk coalescing: turning a fragment stream back into whole messages.
//!
//! Chunks are grouped by contiguous role. A role change is the only thing
//! that closes a message; the number of chunks in a run is irrelevant. Tool
//! call fragments count as message content, so a run made only of tool calls
//! still produces a message.

use crate::handler::ChunkStream;
use crate::types::{Message, MessageChunk, MessageRole, ToolCall};
use crate::Result;
use futures::stream::{Stream, StreamExt};

#[derive(Debug, Default)]
struct RoleRun {
    role: Option<MessageRole>,
    text: String,
    tool_calls: Vec<ToolCall>,
}

impl RoleRun {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }

    /// Feed one chunk, returning the message closed by a role change
    fn push(&mut self, chunk: MessageChunk) -> Option<Message> {
        let (role, content, tool_call) = chunk.into_parts();

        let closed = match self.role {
            Some(current) if current != role && !self.is_empty() => self.take(current),
            _ => None,
        };

        self.role = Some(role);
        if let Some(content) = content {
            self.text.push_str(&content);
        }
        if let Some(call) = tool_call {
            self.tool_calls.push(call);
        }
        closed
    }

    fn take(&mut self, role: MessageRole) -> Option<Message> {
        let text = std::mem::take(&mut self.text);
        let tool_calls = std::mem::take(&mut self.tool_calls);
        Some(Message::new(
            role,
            (!text.is_empty()).then_some(text),
            (!tool_calls.is_empty()).then_some(tool_calls),
        ))
    }

    fn finish(&mut self) -> Option<Message> {
        match self.role {
            Some(role) if !self.is_empty() => self.take(role),
            _ => None,
        }
    }
}

/// Coalesce a materialized sequence of chunks.
///
/// Lazy: messages are produced as the underlying iterator is advanced.
pub fn coalesce_chunks<I>(chunks: I) -> impl Iterator<Item = Message>
where
    I: IntoIterator<Item = MessageChunk>,
{
    let mut chunks = chunks.into_iter();
    let mut run = RoleRun::default();
    let mut exhausted = false;

    std::iter::from_fn(move || {
        if exhausted {
            return None;
        }
        for chunk in chunks.by_ref() {
            if let Some(message) = run.push(chunk) {
                return Some(message);
            }
        }
        exhausted = true;
        run.finish()
    })
}

/// Coalesce a live chunk stream.
///
/// The first error from the source is yielded and ends the stream.
pub fn coalesce_stream(chunks: ChunkStream) -> impl Stream<Item = Result<Message>> + Send {
    async_stream::try_stream! {
        let mut chunks = chunks;
        let mut run = RoleRun::default();
        while let Some(chunk) = chunks.next().await {
            if let Some(message) = run.push(chunk?) {
                yield message;
            }
        }
        if let Some(message) = run.finish() {
            yield message;
        }
    }
}

/// Drain a chunk stream and coalesce it into messages
pub async fn collect_messages(chunks: ChunkStream) -> Result<Vec<Message>> {
    let stream = coalesce_stream(chunks);
    futures::pin_mut!(stream);

    let mut messages = Vec::new();
    while let Some(message) = stream.next().await {
        messages.push(message?);
    }
    Ok(messages)
}
