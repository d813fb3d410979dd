//! Tests for debug logging functionality
//!
//! Runs calls through `LoggingMiddleware` with debug output enabled. Log
//! lines appear in test output with RUST_LOG=debug; these tests make sure
//! logging never changes what the caller receives.

use async_trait::async_trait;
use chat_pipeline::middleware::LoggingMiddleware;
use chat_pipeline::{
    ChatHandler, ChatOptions, ChatRequest, ChatTool, ChunkStream, Error, FunctionDefinition,
    Message, MessageChunk, MessageRole, Pipeline, Result, ToolCall, collect_messages, function,
};
use serde_json::json;

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

struct Quiet;

#[async_trait]
impl ChatHandler for Quiet {
    fn name(&self) -> &str {
        "Quiet"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<Vec<Message>> {
        Ok(vec![Message::assistant("4")])
    }

    async fn complete_streaming(&self, _request: ChatRequest) -> Result<ChunkStream> {
        let chunks = vec![
            Ok(MessageChunk::text(MessageRole::Assistant, "4")),
            Err(Error::protocol("stream cut")),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        let descriptor = definition.to_openai_format();
        Ok(ChatTool::new(definition, descriptor, self.name()))
    }

    async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        chat_pipeline::execute_tool_call(call, options).await
    }
}

fn logged() -> Pipeline {
    Pipeline::builder(Quiet).with(LoggingMiddleware::new()).build()
}

#[tokio::test]
async fn test_logged_completion_is_unchanged() {
    init_logging();

    let messages = logged()
        .complete(ChatRequest::new(
            vec![Message::user("2+2?")],
            ChatOptions::default(),
        ))
        .await
        .unwrap();

    assert_eq!(messages, vec![Message::assistant("4")]);
}

#[tokio::test]
async fn test_logged_stream_passes_errors_through() {
    init_logging();

    let stream = logged()
        .complete_streaming(ChatRequest::new(
            vec![Message::user("2+2?")],
            ChatOptions::default(),
        ))
        .await
        .unwrap();
    let err = collect_messages(stream).await.unwrap_err();

    assert!(matches!(err, Error::ProtocolDecode(_)));
}

#[tokio::test]
async fn test_logged_tool_execution_records_result() {
    init_logging();
    let pipeline = logged();

    let tool = pipeline
        .define_function(
            function("double", "Double a number")
                .param("x", "number")
                .build(|args| async move { Ok(json!(args["x"].as_f64().unwrap_or(0.0) * 2.0)) }),
        )
        .await
        .unwrap();
    let options = ChatOptions::builder().tool(tool).build().unwrap();

    let mut call = ToolCall::new("double", json!({"x": 21}));
    pipeline.execute_tool_call(&mut call, &options).await.unwrap();

    assert_eq!(call.result(), Some(&json!(42.0)));
}
