//! Projection of a streamed answer into the items a web host sends to its
//! client.
//!
//! Answer text and search activity are interleaved in arrival order. A
//! failure ends the projection with one generic [`ReplyItem::Error`]; the
//! underlying error is logged and never sent.

use crate::Result;
use crate::handler::ChunkStream;
use crate::types::MessageChunk;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc::UnboundedReceiver;

/// Text of the single error item emitted when a reply fails
pub const GENERIC_ERROR_MESSAGE: &str = "Sorry, something went wrong while answering.";

/// Where a search hit came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultRef {
    pub search_result_id: i64,
    pub product_id: Option<i64>,
    pub page_number: Option<i64>,
}

/// One item of a projected reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplyItem {
    AnswerChunk { text: String },
    Search { phrase: String },
    SearchResults { results: Vec<SearchResultRef> },
    Error { message: String },
}

enum Next {
    Event(ReplyItem),
    Chunk(Option<Result<MessageChunk>>),
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = ReplyItem> + Send>>;

/// Project `chunks` into reply items.
///
/// `events` carries items produced out of band, typically by
/// [`search_manual_tool_with_events`](crate::retrieval::search_manual_tool_with_events).
/// Pending events are delivered before the next answer chunk, and any left
/// over when the answer ends are flushed before the stream closes.
pub fn project_replies(chunks: ChunkStream, events: Option<UnboundedReceiver<ReplyItem>>) -> ReplyStream {
    Box::pin(async_stream::stream! {
        let mut chunks = chunks;
        let mut events = events;

        loop {
            let next = match events.as_mut() {
                Some(rx) => tokio::select! {
                    biased;
                    Some(item) = rx.recv() => Next::Event(item),
                    chunk = chunks.next() => Next::Chunk(chunk),
                },
                None => Next::Chunk(chunks.next().await),
            };

            let next = match next {
                Next::Event(item) => {
                    yield item;
                    continue;
                }
                Next::Chunk(chunk) => chunk,
            };

            match next {
                Some(Ok(chunk)) => {
                    // events raised while this chunk was being produced come first
                    if let Some(rx) = events.as_mut() {
                        while let Ok(item) = rx.try_recv() {
                            yield item;
                        }
                    }
                    if let Some(text) = chunk.content().filter(|t| !t.is_empty()) {
                        yield ReplyItem::AnswerChunk { text: text.to_string() };
                    }
                }
                Some(Err(err)) => {
                    log::error!("reply failed: {}", err);
                    yield ReplyItem::Error { message: GENERIC_ERROR_MESSAGE.to_string() };
                    return;
                }
                None => break,
            }
        }

        if let Some(rx) = events.as_mut() {
            while let Ok(item) = rx.try_recv() {
                yield item;
            }
        }
    })
}
