//! Standard middleware: logging, response caching, retries, rate limiting,
//! and a shim for backends that cannot stream while tools are offered.
//!
//! Each is independent and composes through [`PipelineBuilder`]. A typical
//! raw-protocol stack reads outermost first:
//!
//! ```rust,no_run
//! use chat_pipeline::middleware::{
//!     CachingMiddleware, InMemoryStore, LoggingMiddleware, PreventStreamingWithTools,
//! };
//! use chat_pipeline::{BackendConfig, PipelineBuilder, Provider, ToolExecutionMiddleware};
//!
//! # fn example() -> chat_pipeline::Result<()> {
//! let config = BackendConfig::builder()
//!     .provider(Provider::Ollama)
//!     .model("mistral:7b")
//!     .build()?;
//!
//! let pipeline = PipelineBuilder::from_shared(chat_pipeline::create_backend(&config)?)
//!     .with(LoggingMiddleware::new())
//!     .with(CachingMiddleware::new(InMemoryStore::new()))
//!     .with(ToolExecutionMiddleware::new())
//!     .with(PreventStreamingWithTools)
//!     .build();
//! # Ok(())
//! # }
//! ```
//!
//! [`PipelineBuilder`]: crate::PipelineBuilder

use crate::handler::{ChatHandler, ChunkStream};
use crate::pipeline::Middleware;
use crate::retry::{RetryConfig, retry_with_backoff_cancellable};
use crate::types::{ChatOptions, ChatRequest, Message, MessageChunk, ToolCall};
use crate::utils::cancellable;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// LOGGING
// ============================================================================

/// Logs the start and end of every call and tool execution
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "LoggingMiddleware"
    }

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        log::info!(
            "Begin complete via {} ({} messages, {} tools)",
            next.name(),
            request.messages.len(),
            request.options.tools().len()
        );

        match next.complete(request).await {
            Ok(messages) => {
                log::info!("End complete with {} message(s)", messages.len());
                Ok(messages)
            }
            Err(err) => {
                log::error!("complete failed: {}", err);
                Err(err)
            }
        }
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        log::info!(
            "Begin streaming via {} ({} messages, {} tools)",
            next.name(),
            request.messages.len(),
            request.options.tools().len()
        );

        let mut inner = next.complete_streaming(request).await.inspect_err(|err| {
            log::error!("streaming failed to start: {}", err);
        })?;

        Ok(Box::pin(async_stream::stream! {
            let mut chunks = 0usize;
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(_) => chunks += 1,
                    Err(err) => log::error!("stream failed after {} chunk(s): {}", chunks, err),
                }
                yield item;
            }
            log::info!("End streaming after {} chunk(s)", chunks);
        }))
    }

    async fn execute_tool_call(
        &self,
        call: &mut ToolCall,
        options: &ChatOptions,
        next: Arc<dyn ChatHandler>,
    ) -> Result<()> {
        log::info!("Begin executing tool call {}", call.name());
        next.execute_tool_call(call, options).await?;
        log::info!(
            "End executing tool call {} with result {}",
            call.name(),
            call.result().cloned().unwrap_or_default()
        );
        Ok(())
    }
}

// ============================================================================
// RESPONSE CACHE
// ============================================================================

const SUMMARY_CHARS: usize = 30;

/// Content address of a cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    hash: String,
    summary: String,
}

impl CacheKey {
    /// Full SHA-256 hex digest
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Short, filename-safe hint of what was asked
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// `<first 16 hex chars>_<summary>`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", &self.hash[..16], self.summary)
    }
}

#[derive(Serialize)]
struct KeyInput<'a> {
    mode: &'a str,
    messages: &'a [Message],
    options: serde_json::Value,
}

fn key_input(request: &ChatRequest, mode: &str) -> Result<String> {
    let input = KeyInput {
        mode,
        messages: &request.messages,
        options: request.options.fingerprint(),
    };
    Ok(serde_json::to_string_pretty(&input)?.replace("\\r", ""))
}

/// Key for `request` in the given mode (`"complete"` or `"stream"`)
pub fn cache_key(request: &ChatRequest, mode: &str) -> Result<CacheKey> {
    let input = key_input(request, mode)?;
    let hash = Sha256::digest(input.as_bytes());

    let last = request
        .messages
        .last()
        .and_then(|m| m.content())
        .unwrap_or("no_messages");

    Ok(CacheKey {
        hash: format!("{:x}", hash),
        summary: safe_summary(last),
    })
}

fn safe_summary(text: &str) -> String {
    let mut summary = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            summary.push(c);
        } else if c == ' ' {
            summary.push('_');
        }
        if summary.chars().count() >= SUMMARY_CHARS {
            break;
        }
    }
    summary
}

/// Storage for serialized responses
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>>;

    /// Store `response`; `request` is the key's JSON input, kept for
    /// inspection
    async fn put(&self, key: &CacheKey, request: &str, response: &str) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::cache("in-memory store lock poisoned"))?;
        Ok(entries.get(key.hash()).cloned())
    }

    async fn put(&self, key: &CacheKey, _request: &str, response: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::cache("in-memory store lock poisoned"))?;
        entries.insert(key.hash().to_string(), response.to_string());
        Ok(())
    }
}

/// Directory of `<stem>.response` files, each with a `<stem>.request.json`
/// sibling recording what produced it
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn response_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.response", key.file_stem()))
    }

    pub fn request_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.request.json", key.file_stem()))
    }
}

#[async_trait]
impl ResponseStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let path = self.response_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                log::info!("Using cached response for {}", key.file_stem());
                Ok(Some(text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Did not find cached response for {}", key.file_stem());
                Ok(None)
            }
            Err(e) => Err(Error::cache(format!("failed to read {}: {}", path.display(), e))),
        }
    }

    async fn put(&self, key: &CacheKey, request: &str, response: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::cache(format!("failed to create {}: {}", self.dir.display(), e)))?;

        let response_path = self.response_path(key);
        tokio::fs::write(&response_path, response)
            .await
            .map_err(|e| Error::cache(format!("failed to write {}: {}", response_path.display(), e)))?;

        let request_path = self.request_path(key);
        tokio::fs::write(&request_path, request)
            .await
            .map_err(|e| Error::cache(format!("failed to write {}: {}", request_path.display(), e)))?;

        Ok(())
    }
}

/// Replays stored responses for identical requests.
///
/// Streams are recorded chunk by chunk and stored only once they end without
/// error. A failed write is logged and the response is still returned.
#[derive(Clone)]
pub struct CachingMiddleware {
    store: Arc<dyn ResponseStore>,
}

impl CachingMiddleware {
    pub fn new(store: impl ResponseStore + 'static) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<dyn ResponseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Middleware for CachingMiddleware {
    fn name(&self) -> &str {
        "CachingMiddleware"
    }

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        let key = cache_key(&request, "complete")?;
        if let Some(cached) = self.store.get(&key).await? {
            return serde_json::from_str(&cached)
                .map_err(|e| Error::cache(format!("corrupt cache entry {}: {}", key.file_stem(), e)));
        }

        let input = key_input(&request, "complete")?;
        let messages = next.complete(request).await?;
        store_response(self.store.as_ref(), &key, &input, &messages).await;
        Ok(messages)
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        let key = cache_key(&request, "stream")?;
        if let Some(cached) = self.store.get(&key).await? {
            let chunks: Vec<MessageChunk> = serde_json::from_str(&cached)
                .map_err(|e| Error::cache(format!("corrupt cache entry {}: {}", key.file_stem(), e)))?;
            return Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))));
        }

        let input = key_input(&request, "stream")?;
        let mut inner = next.complete_streaming(request).await?;
        let store = self.store.clone();

        Ok(Box::pin(async_stream::try_stream! {
            let mut recorded = Vec::new();
            while let Some(chunk) = inner.next().await {
                let chunk = chunk?;
                recorded.push(chunk.clone());
                yield chunk;
            }
            store_response(store.as_ref(), &key, &input, &recorded).await;
        }))
    }
}

/// Failing to store leaves the answer intact; the next identical call just
/// misses the cache.
async fn store_response<T: Serialize + ?Sized>(
    store: &dyn ResponseStore,
    key: &CacheKey,
    input: &str,
    response: &T,
) {
    let written = match serde_json::to_string_pretty(response) {
        Ok(text) => store.put(key, input, &text).await,
        Err(e) => Err(e.into()),
    };
    if let Err(err) = written {
        log::warn!("failed to cache response {}: {}", key.file_stem(), err);
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Retries transient failures of `complete` and of stream establishment.
///
/// Cancelling the request ends the retry loop at once, even mid-backoff.
///
/// A stream that fails part-way is not restarted; chunks already delivered
/// cannot be taken back.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "RetryMiddleware"
    }

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        let cancel = request.cancel.clone();
        retry_with_backoff_cancellable(self.config.clone(), &cancel, || {
            let next = next.clone();
            let request = request.clone();
            async move { next.complete(request).await }
        })
        .await
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        let cancel = request.cancel.clone();
        retry_with_backoff_cancellable(self.config.clone(), &cancel, || {
            let next = next.clone();
            let request = request.clone();
            async move { next.complete_streaming(request).await }
        })
        .await
    }
}

// ============================================================================
// RATE LIMIT
// ============================================================================

/// Token-bucket admission for `complete` and `complete_streaming`.
///
/// By default a call waits for capacity (and still honours cancellation);
/// [`reject_when_exhausted`](Self::reject_when_exhausted) fails fast with
/// [`Error::RateLimited`] instead.
pub struct RateLimitMiddleware {
    limiter: Arc<DefaultDirectRateLimiter>,
    reject: bool,
}

impl RateLimitMiddleware {
    /// Allow `max_requests` per `window`, with bursts up to `max_requests`
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::config("rate limit window must be > 0"));
        }
        let burst = NonZeroU32::new(max_requests)
            .ok_or_else(|| Error::config("max_requests must be > 0"))?;

        let quota = Quota::with_period(window / max_requests)
            .ok_or_else(|| Error::config("invalid rate limit period"))?
            .allow_burst(burst);

        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            reject: false,
        })
    }

    pub fn reject_when_exhausted(mut self) -> Self {
        self.reject = true;
        self
    }

    async fn admit(&self, request: &ChatRequest) -> Result<()> {
        if self.reject {
            return self
                .limiter
                .check()
                .map_err(|_| Error::rate_limited("request quota exhausted"));
        }

        cancellable(&request.cancel, async {
            self.limiter.until_ready().await;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "RateLimitMiddleware"
    }

    async fn complete(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<Vec<Message>> {
        self.admit(&request).await?;
        next.complete(request).await
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        self.admit(&request).await?;
        next.complete_streaming(request).await
    }
}

// ============================================================================
// STREAMING SHIM
// ============================================================================

/// Resolves streaming calls that carry tools through blocking `complete`,
/// then replays the result as chunks.
///
/// For raw-protocol servers whose streaming endpoint cannot be trusted to
/// deliver tool calls. Calls without tools stream normally.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreventStreamingWithTools;

#[async_trait]
impl Middleware for PreventStreamingWithTools {
    fn name(&self) -> &str {
        "PreventStreamingWithTools"
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        next: Arc<dyn ChatHandler>,
    ) -> Result<ChunkStream> {
        if !request.options.has_tools() {
            return next.complete_streaming(request).await;
        }

        let messages = next.complete(request).await?;
        let chunks: Vec<Result<MessageChunk>> = messages
            .iter()
            .flat_map(message_to_chunks)
            .map(Ok)
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn message_to_chunks(message: &Message) -> Vec<MessageChunk> {
    let text = message
        .content()
        .filter(|c| !c.is_empty())
        .map(|c| MessageChunk::text(message.role(), c));

    text.into_iter()
        .chain(
            message
                .tool_calls()
                .iter()
                .map(|call| MessageChunk::tool_call(message.role(), call.clone())),
        )
        .collect()
}
