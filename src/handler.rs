//! The callable contract shared by backends, pipeline layers, and the client.

use crate::tools::{ChatTool, FunctionDefinition};
use crate::types::{ChatOptions, ChatRequest, Message, MessageChunk, ToolCall};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Boxed stream of message fragments
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk>> + Send>>;

/// Capability set every backend adapter and pipeline layer exposes.
///
/// Each method defaults to [`Error::CapabilityNotSupported`] naming the
/// operation and [`ChatHandler::name`], so an adapter only implements what
/// its wire protocol can actually do.
#[async_trait]
pub trait ChatHandler: Send + Sync {
    /// Component name used in errors and logs
    fn name(&self) -> &str;

    /// Blocking completion
    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        let _ = request;
        Err(Error::unsupported("complete", self.name()))
    }

    /// Incremental completion
    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        let _ = request;
        Err(Error::unsupported("complete_streaming", self.name()))
    }

    /// Turn a function definition into a tool this backend can advertise
    async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        let _ = definition;
        Err(Error::unsupported("define_function", self.name()))
    }

    /// Run the function named by `call` and write its result slot
    async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        let _ = (call, options);
        Err(Error::unsupported("execute_tool_call", self.name()))
    }
}
