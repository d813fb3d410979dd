//! High-level client over a composed pipeline.
//!
//! [`ChatClient`] is what most hosts hold on to: it owns a [`Pipeline`],
//! packages messages and options into [`ChatRequest`]s, and exposes the four
//! handler operations with less ceremony.
//!
//! # Default Stack
//!
//! [`ChatClient::from_config`] builds, outermost first:
//!
//! ```text
//! LoggingMiddleware
//!   └─ ToolExecutionMiddleware
//!        └─ PreventStreamingWithTools   (raw-protocol providers only)
//!             └─ backend adapter
//! ```
//!
//! Extra middleware registered on the builder sits between logging and tool
//! execution, in registration order, so it sees each caller request once
//! rather than once per tool iteration.
//!
//! # Example
//!
//! ```rust,no_run
//! use chat_pipeline::{BackendConfig, ChatClient, ChatOptions, Message, Provider};
//!
//! #[tokio::main]
//! async fn main() -> chat_pipeline::Result<()> {
//!     let config = BackendConfig::builder()
//!         .provider(Provider::LMStudio)
//!         .model("qwen2.5-32b-instruct")
//!         .build()?;
//!     let client = ChatClient::from_config(&config)?;
//!
//!     let reply = client
//!         .complete(vec![Message::user("What's 2+2?")], ChatOptions::default())
//!         .await?;
//!     println!("{}", reply[0].content().unwrap_or_default());
//!     Ok(())
//! }
//! ```

use crate::config::{BackendConfig, WireProtocol, create_backend};
use crate::handler::{ChatHandler, ChunkStream};
use crate::middleware::{LoggingMiddleware, PreventStreamingWithTools};
use crate::orchestrator::ToolExecutionMiddleware;
use crate::pipeline::{Middleware, Pipeline, PipelineBuilder};
use crate::tools::{ChatTool, FunctionDefinition};
use crate::types::{ChatOptions, ChatRequest, Message, ToolCall};
use crate::Result;
use std::sync::Arc;

/// Entry point for issuing chat completions through a pipeline
#[derive(Clone)]
pub struct ChatClient {
    pipeline: Pipeline,
}

impl ChatClient {
    /// Wrap an already composed pipeline
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Default stack over the backend `config` describes
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Ok(Self::builder_for(config)?.build())
    }

    /// Builder with the default stack for `config`, open for extra middleware
    pub fn builder_for(config: &BackendConfig) -> Result<ChatClientBuilder> {
        let builder = ChatClientBuilder::new(create_backend(config)?);
        Ok(match config.provider().wire_protocol() {
            WireProtocol::Raw => builder.prevent_streaming_with_tools(true),
            WireProtocol::Structured => builder,
        })
    }

    pub fn builder(backend: Arc<dyn ChatHandler>) -> ChatClientBuilder {
        ChatClientBuilder::new(backend)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn complete(&self, messages: Vec<Message>, options: ChatOptions) -> Result<Vec<Message>> {
        self.complete_request(ChatRequest::new(messages, options)).await
    }

    pub async fn complete_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChunkStream> {
        self.stream_request(ChatRequest::new(messages, options)).await
    }

    /// Complete a fully specified request (carrying its own cancellation token)
    pub async fn complete_request(&self, request: ChatRequest) -> Result<Vec<Message>> {
        self.pipeline.complete(request).await
    }

    pub async fn stream_request(&self, request: ChatRequest) -> Result<ChunkStream> {
        self.pipeline.complete_streaming(request).await
    }

    /// Turn a declaration into a tool the backend understands
    pub async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        self.pipeline.define_function(definition).await
    }

    pub async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        self.pipeline.execute_tool_call(call, options).await
    }
}

/// Builder for [`ChatClient`]
pub struct ChatClientBuilder {
    backend: Arc<dyn ChatHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
    logging: bool,
    tool_execution: bool,
    prevent_streaming_with_tools: bool,
}

impl ChatClientBuilder {
    pub fn new(backend: Arc<dyn ChatHandler>) -> Self {
        Self {
            backend,
            middleware: Vec::new(),
            logging: true,
            tool_execution: true,
            prevent_streaming_with_tools: false,
        }
    }

    /// Add middleware between logging and tool execution
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Disable to receive tool calls instead of having them executed
    pub fn tool_execution(mut self, enabled: bool) -> Self {
        self.tool_execution = enabled;
        self
    }

    pub fn prevent_streaming_with_tools(mut self, enabled: bool) -> Self {
        self.prevent_streaming_with_tools = enabled;
        self
    }

    pub fn build(self) -> ChatClient {
        let mut builder = PipelineBuilder::from_shared(self.backend);

        if self.logging {
            builder = builder.with(LoggingMiddleware::new());
        }
        for middleware in self.middleware {
            builder = builder.with_shared(middleware);
        }
        if self.tool_execution {
            builder = builder.with(ToolExecutionMiddleware::new());
        }
        if self.prevent_streaming_with_tools {
            builder = builder.with(PreventStreamingWithTools);
        }

        ChatClient::new(builder.build())
    }
}
