//! # chat-pipeline
//!
//! A backend-agnostic chat-completion layer for local and hosted LLM servers.
//!
//! ## Overview
//!
//! Every backend and every middleware layer exposes the same four operations
//! ([`ChatHandler`]):
//!
//! - `complete`: blocking completion returning whole messages
//! - `complete_streaming`: incremental completion as [`MessageChunk`]s
//! - `define_function`: turn a declared function into a backend-specific tool
//! - `execute_tool_call`: run a model-requested call and record its result
//!
//! Two wire protocols are supported:
//! - **Structured** (LM Studio, llama.cpp, vLLM, OpenAI): `/chat/completions`
//!   with SSE streaming and native tool calls
//! - **Raw** (Ollama): `/api/generate` with a hand-built Mistral prompt; tool
//!   calls are recovered from the text stream by the [`ToolCallClassifier`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chat_pipeline::{BackendConfig, ChatClient, ChatOptions, Message, Provider, function};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> chat_pipeline::Result<()> {
//!     let config = BackendConfig::builder()
//!         .provider(Provider::Ollama)
//!         .model("mistral:7b")
//!         .build()?;
//!     let client = ChatClient::from_config(&config)?;
//!
//!     // Declare a function and let the backend shape it into a tool
//!     let add = function("add", "Add two numbers")
//!         .param("a", "number")
//!         .param("b", "number")
//!         .build(|args| async move {
//!             let a = args["a"].as_f64().unwrap_or(0.0);
//!             let b = args["b"].as_f64().unwrap_or(0.0);
//!             Ok(json!(a + b))
//!         });
//!     let tool = client.define_function(add).await?;
//!
//!     let options = ChatOptions::builder().tool(tool).build()?;
//!     let mut stream = client
//!         .complete_streaming(vec![Message::user("What's 2+2?")], options)
//!         .await?;
//!
//!     while let Some(chunk) = stream.next().await {
//!         print!("{}", chunk?.content().unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **types**: messages, chunks, tool calls, options and requests
//! - **handler**: the `ChatHandler` contract
//! - **pipeline**: middleware composition, first registered is outermost
//! - **classifier**: content/tool-call lane splitting for raw streams
//! - **orchestrator**: the bounded tool-execution loop
//! - **coalesce**: chunk-to-message folding
//! - **openai** / **ollama**: backend adapters
//! - **middleware**: logging, caching, retry, rate limiting, streaming shim
//! - **client**: `ChatClient` façade with a default stack
//! - **config**: providers, environment lookups, backend factory
//! - **retrieval** / **reply**: the `searchManual` tool and host reply items
//! - **error**: `Error` enum and `Result<T>` alias

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Streaming split of raw model output into content and tool-call lanes.
mod classifier;

/// `ChatClient` façade owning a composed pipeline.
mod client;

/// Folding of chunk sequences into role-contiguous messages.
mod coalesce;

/// Provider shortcuts, environment lookups and the backend factory.
mod config;

/// Error types and the crate `Result<T>` alias.
mod error;

/// The capability contract shared by backends and layers.
mod handler;

/// Raw-protocol adapter for Ollama's `/api/generate`.
mod ollama;

/// Structured-protocol adapter for `/chat/completions` servers.
mod openai;

/// Tool-execution loop and the middleware that places it in a pipeline.
mod orchestrator;

/// Middleware trait, layers and the pipeline builder.
mod pipeline;

/// Function declarations, argument coercion and backend tools.
mod tools;

/// Messages, chunks, options, requests and wire formats.
mod types;

/// SSE/NDJSON framing, tool-call aggregation and cancellation helpers.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Standard middleware.
pub mod middleware;

/// Reply items for web hosts.
pub mod reply;

/// The `searchManual` tool and its search collaborator.
pub mod retrieval;

/// Retry utilities with exponential backoff and jitter.
pub mod retry;

// --- Client ---

pub use client::{ChatClient, ChatClientBuilder};

// --- Contract & Pipeline ---

pub use handler::{ChatHandler, ChunkStream};
pub use pipeline::{Layer, Middleware, Pipeline, PipelineBuilder};

// --- Tool Loop ---

pub use orchestrator::{StandardToolLoop, ToolExecutionMiddleware, ToolOrchestrator};

// --- Classifier & Coalescing ---

pub use classifier::{
    ClassifierState, LOOKAHEAD_CHARS, STRUCTURED_PREFIX, Segment, TOOL_CALL_MARKER,
    ToolCallClassifier, classify_stream,
};
pub use coalesce::{coalesce_chunks, coalesce_stream, collect_messages};

// --- Backends ---

pub use ollama::{MODEL_UNAVAILABLE, OllamaBackend};
pub use openai::OpenAiBackend;

// --- Provider Configuration ---

pub use config::{
    BackendConfig, BackendConfigBuilder, Provider, WireProtocol, create_backend, get_api_key,
    get_base_url, get_model,
};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Tool System ---

pub use tools::{
    ChatTool, FunctionBuilder, FunctionDefinition, FunctionHandler, ParamKind, ParamSpec,
    execute_tool_call, function,
};

// --- Core Types ---

pub use types::{
    ChatOptions, ChatOptionsBuilder, ChatRequest, DEFAULT_MAX_TOOL_ITERATIONS, Message,
    MessageChunk, MessageRole, ResponseFormat, ToolCall,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The types most hosts need.
/// Import with `use chat_pipeline::prelude::*;`.
pub mod prelude {
    pub use crate::{
        BackendConfig, ChatClient, ChatHandler, ChatOptions, ChatRequest, ChatTool, Error,
        Message, MessageChunk, MessageRole, Middleware, PipelineBuilder, Provider, Result,
        ToolCall, function,
    };
}
