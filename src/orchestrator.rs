//! # Tool-Execution Loop
//!
//! Bounded round trips between the model and developer-declared functions.
//!
//! ```text
//! for iteration in 1..=max_iterations:
//!     options = last iteration ? options.without_tools() : options
//!     stream  = inner.complete_streaming(messages, options)
//!     forward content chunks as they arrive, collect tool-call chunks
//!     no tool calls            -> done
//!     run each call in order   -> inner.execute_tool_call(call)
//!     messages += Assistant { tool_calls (with results) }
//! ```
//!
//! Withholding tools on the last iteration forces the model to answer in
//! prose. A model that asks for a tool anyway on that iteration is logged and
//! ignored; nothing is executed.
//!
//! Tool failures abort the loop and reach the caller as-is. Every await
//! races the request's cancellation token, so a cancelled call stops reading
//! the stream and never starts a queued tool.

use crate::coalesce::collect_messages;
use crate::handler::{ChatHandler, ChunkStream};
use crate::pipeline::Middleware;
use crate::types::{ChatOptions, ChatRequest, Message, MessageChunk, MessageRole};
use crate::utils::cancellable;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::sync::Arc;

/// Strategy for running tool-calling round trips against an inner handler.
///
/// Selected per call through [`ChatOptions`]; [`StandardToolLoop`] when unset.
pub trait ToolOrchestrator: Send + Sync {
    fn name(&self) -> &str;

    /// Drive the conversation in `request` to completion, streaming only the
    /// content the caller should see
    fn run(&self, inner: Arc<dyn ChatHandler>, request: ChatRequest) -> ChunkStream;
}

/// Sequential loop bounded by [`ChatOptions::max_tool_iterations`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardToolLoop;

impl ToolOrchestrator for StandardToolLoop {
    fn name(&self) -> &str {
        "standard"
    }

    fn run(&self, inner: Arc<dyn ChatHandler>, request: ChatRequest) -> ChunkStream {
        let ChatRequest {
            mut messages,
            options,
            cancel,
        } = request;
        let max_iterations = options.max_tool_iterations().max(1);

        Box::pin(async_stream::try_stream! {
            for iteration in 1..=max_iterations {
                let last = iteration == max_iterations;
                let iteration_options = if last {
                    options.without_tools()
                } else {
                    options.clone()
                };

                log::debug!(
                    "tool loop iteration {}/{} with {} tool(s)",
                    iteration,
                    max_iterations,
                    iteration_options.tools().len()
                );

                let call = ChatRequest {
                    messages: messages.clone(),
                    options: iteration_options,
                    cancel: cancel.clone(),
                };
                let mut chunks = cancellable(&cancel, inner.complete_streaming(call)).await?;

                let mut tool_calls = Vec::new();
                loop {
                    let next = cancellable(&cancel, async { Ok::<_, Error>(chunks.next().await) }).await?;
                    let Some(chunk) = next else {
                        break;
                    };

                    let (role, content, tool_call) = chunk?.into_parts();
                    if let Some(call) = tool_call {
                        tool_calls.push(call);
                    }
                    if content.is_some() {
                        yield MessageChunk::new(role, content, None);
                    }
                }

                if tool_calls.is_empty() {
                    break;
                }

                if last {
                    log::warn!(
                        "ignoring {} tool call(s) requested after tools were withdrawn",
                        tool_calls.len()
                    );
                    break;
                }

                for call in tool_calls.iter_mut() {
                    log::debug!("executing tool call '{}'", call.name());
                    cancellable(&cancel, inner.execute_tool_call(call, &options)).await?;
                }

                messages.push(Message::with_tool_calls(MessageRole::Assistant, tool_calls));
            }
        })
    }
}

/// Places tool orchestration in the pipeline.
///
/// Engages only when the call carries tools and automatic execution is on;
/// otherwise every operation passes straight through.
pub struct ToolExecutionMiddleware {
    default_orchestrator: Arc<dyn ToolOrchestrator>,
}

impl Default for ToolExecutionMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutionMiddleware {
    pub fn new() -> Self {
        Self::with_orchestrator(Arc::new(StandardToolLoop))
    }

    /// Use `orchestrator` for calls whose options do not pick one
    pub fn with_orchestrator(orchestrator: Arc<dyn ToolOrchestrator>) -> Self {
        Self {
            default_orchestrator: orchestrator,
        }
    }

    fn engages(options: &ChatOptions) -> bool {
        options.has_tools() && options.auto_execute_tools()
    }

    fn orchestrator_for(&self, options: &ChatOptions) -> Arc<dyn ToolOrchestrator> {
        options
            .orchestrator()
            .cloned()
            .unwrap_or_else(|| self.default_orchestrator.clone())
    }
}

#[async_trait]
impl Middleware for ToolExecutionMiddleware {
    fn name(&self) -> &str {
        "ToolExecutionMiddleware"
    }

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        if !Self::engages(&request.options) {
            return next.complete(request).await;
        }
        let orchestrator = self.orchestrator_for(&request.options);
        collect_messages(orchestrator.run(next, request)).await
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        if !Self::engages(&request.options) {
            return next.complete_streaming(request).await;
        }
        let orchestrator = self.orchestrator_for(&request.options);
        Ok(orchestrator.run(next, request))
    }
}
