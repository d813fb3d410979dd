//! End-to-end tests through the default client stack
//!
//! A stub backend answers "2+2?" with "4"; the result must come back intact
//! from both the blocking and the streaming path.

use async_trait::async_trait;
use chat_pipeline::{
    ChatClient, ChatHandler, ChatOptions, ChatRequest, ChunkStream, Message, MessageChunk,
    MessageRole, Result, collect_messages,
};
use futures::StreamExt;
use std::sync::Arc;

struct ArithmeticStub;

impl ArithmeticStub {
    fn answer(request: &ChatRequest) -> &'static str {
        match request.messages.last().and_then(|m| m.content()) {
            Some("2+2?") => "4",
            _ => "I don't know",
        }
    }
}

#[async_trait]
impl ChatHandler for ArithmeticStub {
    fn name(&self) -> &str {
        "ArithmeticStub"
    }

    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        Ok(vec![Message::assistant(Self::answer(&request))])
    }

    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        let chunks = Self::answer(&request)
            .chars()
            .map(|c| Ok(MessageChunk::text(MessageRole::Assistant, c.to_string())))
            .collect::<Vec<_>>();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn client() -> ChatClient {
    ChatClient::builder(Arc::new(ArithmeticStub)).build()
}

#[tokio::test]
async fn test_blocking_answer() {
    let messages = client()
        .complete(vec![Message::user("2+2?")], ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(messages, vec![Message::assistant("4")]);
}

#[tokio::test]
async fn test_streaming_answer_coalesces() {
    let stream = client()
        .complete_streaming(vec![Message::user("2+2?")], ChatOptions::default())
        .await
        .unwrap();

    let messages = collect_messages(stream).await.unwrap();
    assert_eq!(messages, vec![Message::assistant("4")]);
}

#[tokio::test]
async fn test_streaming_multi_char_answer_preserved() {
    let stream = client()
        .complete_streaming(vec![Message::user("what?")], ChatOptions::default())
        .await
        .unwrap();

    let chunks: Vec<MessageChunk> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks.len(), "I don't know".chars().count());

    let messages: Vec<Message> = chat_pipeline::coalesce_chunks(chunks).collect();
    assert_eq!(messages, vec![Message::assistant("I don't know")]);
}

#[tokio::test]
async fn test_unsupported_operation_names_backend() {
    let err = client()
        .define_function(
            chat_pipeline::function("noop", "Does nothing")
                .build(|_| async { Ok(serde_json::Value::Null) }),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "ArithmeticStub does not support define_function, and no inner handler is defined"
    );
}
