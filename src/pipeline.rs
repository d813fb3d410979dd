//! # Middleware Pipeline
//!
//! Composes cross-cutting middleware around a terminal backend into a single
//! [`ChatHandler`].
//!
//! ## Ordering
//!
//! The first middleware registered is the outermost layer: it sees the
//! caller's request first and the response last.
//!
//! ```text
//! PipelineBuilder::new(backend).with(log).with(cache).build()
//!
//!   caller ──► log ──► cache ──► backend
//!   caller ◄── log ◄── cache ◄── backend
//! ```
//!
//! ## Layers
//!
//! The composed value is a chain of [`Layer`]s. `Terminal` wraps the backend;
//! `Wrapped` pairs a middleware with the next layer inward. A capability the
//! backend lacks can only fail at `Terminal`; middleware defaults always
//! delegate inward, so no layer ever hides an inner error behind a default
//! value.
//!
//! ## Writing Middleware
//!
//! Override only the operations you care about; the rest pass through.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chat_pipeline::{ChatHandler, ChatRequest, Message, Middleware, Result};
//! use std::sync::Arc;
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Middleware for Shout {
//!     fn name(&self) -> &str {
//!         "Shout"
//!     }
//!
//!     async fn complete(
//!         &self,
//!         request: ChatRequest,
//!         next: Arc<dyn ChatHandler>,
//!     ) -> Result<Vec<Message>> {
//!         let messages = next.complete(request).await?;
//!         Ok(messages
//!             .into_iter()
//!             .map(|m| Message::assistant(m.content().unwrap_or_default().to_uppercase()))
//!             .collect())
//!     }
//! }
//! ```

use crate::handler::{ChatHandler, ChunkStream};
use crate::tools::{ChatTool, FunctionDefinition};
use crate::types::{ChatOptions, ChatRequest, Message, ToolCall};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A composable unit wrapping an inner handler.
///
/// A middleware may pass a call through, transform its inputs or outputs,
/// short-circuit without calling `next`, or call `next` several times.
/// Implementations must not keep per-call state on `self`; everything a call
/// needs travels in the [`ChatRequest`].
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        next.complete(request).await
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        next.complete_streaming(request).await
    }

    async fn define_function(
        &self,
        definition: FunctionDefinition,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChatTool> {
        next.define_function(definition).await
    }

    async fn execute_tool_call(
        &self,
        call: &mut ToolCall,
        options: &ChatOptions,
        next: Arc<dyn ChatHandler>,
    ) -> Result<()> {
        next.execute_tool_call(call, options).await
    }
}

/// One level of the pipeline onion
#[derive(Clone)]
pub enum Layer {
    /// The backend adapter at the center
    Terminal(Arc<dyn ChatHandler>),
    /// A middleware and the layer it wraps
    Wrapped {
        middleware: Arc<dyn Middleware>,
        next: Arc<Layer>,
    },
}

#[async_trait]
impl ChatHandler for Layer {
    fn name(&self) -> &str {
        match self {
            Layer::Terminal(backend) => backend.name(),
            Layer::Wrapped { middleware, .. } => middleware.name(),
        }
    }

    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        match self {
            Layer::Terminal(backend) => backend.complete(request).await,
            Layer::Wrapped { middleware, next } => middleware.complete(request, next.clone()).await,
        }
    }

    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        match self {
            Layer::Terminal(backend) => backend.complete_streaming(request).await,
            Layer::Wrapped { middleware, next } => {
                middleware.complete_streaming(request, next.clone()).await
            }
        }
    }

    async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        match self {
            Layer::Terminal(backend) => backend.define_function(definition).await,
            Layer::Wrapped { middleware, next } => {
                middleware.define_function(definition, next.clone()).await
            }
        }
    }

    async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        match self {
            Layer::Terminal(backend) => backend.execute_tool_call(call, options).await,
            Layer::Wrapped { middleware, next } => {
                middleware
                    .execute_tool_call(call, options, next.clone())
                    .await
            }
        }
    }
}

/// Collects middleware around a backend
pub struct PipelineBuilder {
    backend: Arc<dyn ChatHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn new(backend: impl ChatHandler + 'static) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    pub fn from_shared(backend: Arc<dyn ChatHandler>) -> Self {
        Self {
            backend,
            middleware: Vec::new(),
        }
    }

    /// Register the next middleware, one level further inward than the
    /// previous registration
    pub fn with(self, middleware: impl Middleware + 'static) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> Pipeline {
        let mut root = Arc::new(Layer::Terminal(self.backend));
        for middleware in self.middleware.into_iter().rev() {
            root = Arc::new(Layer::Wrapped {
                middleware,
                next: root,
            });
        }
        Pipeline { root }
    }
}

/// A composed, reusable pipeline.
///
/// Cloning is cheap and clones share every layer.
#[derive(Clone)]
pub struct Pipeline {
    root: Arc<Layer>,
}

impl Pipeline {
    pub fn builder(backend: impl ChatHandler + 'static) -> PipelineBuilder {
        PipelineBuilder::new(backend)
    }

    /// Layer names from outermost to the backend
    pub fn layer_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut layer = self.root.as_ref();
        loop {
            names.push(layer.name().to_string());
            match layer {
                Layer::Terminal(_) => break,
                Layer::Wrapped { next, .. } => layer = next.as_ref(),
            }
        }
        names
    }

    /// The pipeline as a shareable handler
    pub fn handler(&self) -> Arc<dyn ChatHandler> {
        self.root.clone()
    }
}

#[async_trait]
impl ChatHandler for Pipeline {
    fn name(&self) -> &str {
        self.root.name()
    }

    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        self.root.complete(request).await
    }

    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        self.root.complete_streaming(request).await
    }

    async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        self.root.define_function(definition).await
    }

    async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        self.root.execute_tool_call(call, options).await
    }
}
