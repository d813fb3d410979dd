//! Adapter for OpenAI-compatible `/chat/completions` servers (LM Studio,
//! llama.cpp, vLLM, hosted OpenAI).
//!
//! Blocking calls read `choices[].message`. Streaming calls read SSE deltas:
//! text is forwarded immediately, while tool calls arrive from a structured
//! field and are emitted whole once the server reports a finish reason.

use crate::config::BackendConfig;
use crate::handler::{ChatHandler, ChunkStream};
use crate::tools::{self, ChatTool, FunctionDefinition};
use crate::types::{
    ChatOptions, ChatRequest, Message, MessageRole, OpenAICompletion, OpenAIFunction,
    OpenAIMessage, OpenAIRequest, OpenAIToolCall, ToolCall,
};
use crate::utils::{ToolCallAggregator, cancellable, parse_sse_stream, with_cancellation};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;

/// Backend for servers speaking the structured chat-completions protocol
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model().to_string(),
            api_key: config.api_key().map(str::to_string),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Wire request for `request`
    pub fn build_request(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        let options = &request.options;

        let tools = options
            .has_tools()
            .then(|| options.tools().iter().map(|t| t.descriptor().clone()).collect());

        let response_format = options
            .is_json_mode()
            .then(|| serde_json::json!({"type": "json_object"}));

        let stop = (!options.stop_sequences().is_empty()).then(|| options.stop_sequences().to_vec());

        OpenAIRequest {
            model: self.model.clone(),
            messages: to_openai_messages(&request.messages),
            stream,
            max_tokens: options.max_tokens(),
            temperature: options.temperature(),
            top_p: options.top_p(),
            seed: options.seed(),
            stop,
            tools,
            response_format,
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = self.build_request(request, stream);
        log::debug!(
            "POST {} ({} messages, stream={})",
            self.completions_url(),
            body.messages.len(),
            stream
        );

        let mut builder = self.http_client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = cancellable(&request.cancel, async {
            builder.send().await.map_err(http_error)
        })
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("{}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatHandler for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAiBackend"
    }

    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        let response = self.send(&request, false).await?;
        let completion: OpenAICompletion = cancellable(&request.cancel, async {
            response.json().await.map_err(|e| {
                Error::protocol(format!("failed to decode completion response: {}", e))
            })
        })
        .await?;

        completion
            .choices
            .into_iter()
            .map(|choice| {
                log::debug!(
                    "completion finished: {}",
                    choice.finish_reason.as_deref().unwrap_or("unknown")
                );
                from_openai_message(choice.message)
            })
            .collect()
    }

    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        let response = self.send(&request, true).await?;
        let mut events = parse_sse_stream(response.bytes_stream());

        let chunks: ChunkStream = Box::pin(async_stream::try_stream! {
            let mut aggregator = ToolCallAggregator::new();
            while let Some(event) = events.next().await {
                for chunk in aggregator.process_chunk(event?)? {
                    yield chunk;
                }
            }
            // servers that close without a finish_reason still get their calls flushed
            for chunk in aggregator.finish()? {
                yield chunk;
            }
        });

        Ok(with_cancellation(chunks, request.cancel))
    }

    async fn define_function(&self, definition: FunctionDefinition) -> Result<ChatTool> {
        let descriptor = definition.to_openai_format();
        Ok(ChatTool::new(definition, descriptor, self.name()))
    }

    async fn execute_tool_call(&self, call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
        tools::execute_tool_call(call, options).await
    }
}

fn http_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(e)
    }
}

/// Convert history to wire messages.
///
/// A message carrying tool calls becomes the assistant message that issued
/// them, followed by one `tool` message per call holding its JSON result.
/// Calls without a backend id get a stable synthetic one so the pair still
/// lines up.
pub fn to_openai_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for (m, message) in messages.iter().enumerate() {
        if !message.has_tool_calls() {
            out.push(OpenAIMessage {
                role: message.role().as_str().to_string(),
                content: Some(message.content().unwrap_or_default().to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
            continue;
        }

        let ids: Vec<String> = message
            .tool_calls()
            .iter()
            .enumerate()
            .map(|(c, call)| {
                call.id()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}_{}", m, c))
            })
            .collect();

        out.push(OpenAIMessage {
            role: MessageRole::Assistant.as_str().to_string(),
            content: message.content().map(str::to_string),
            tool_calls: Some(
                message
                    .tool_calls()
                    .iter()
                    .zip(&ids)
                    .map(|(call, id)| OpenAIToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: call.name().to_string(),
                            arguments: call.arguments().to_string(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        });

        for (call, id) in message.tool_calls().iter().zip(ids) {
            let content = call
                .result()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "null".to_string());
            out.push(OpenAIMessage {
                role: MessageRole::Tool.as_str().to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(id),
            });
        }
    }

    out
}

/// Convert a wire message from a blocking response
pub fn from_openai_message(message: OpenAIMessage) -> Result<Message> {
    let tool_calls = message
        .tool_calls
        .map(|calls| {
            calls
                .into_iter()
                .map(|call| {
                    let arguments = if call.function.arguments.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&call.function.arguments).map_err(|e| {
                            Error::protocol(format!(
                                "failed to parse arguments for '{}': {}",
                                call.function.name, e
                            ))
                        })?
                    };
                    Ok(ToolCall::new(call.function.name, arguments).with_id(call.id))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .filter(|calls| !calls.is_empty());

    Ok(Message::new(
        MessageRole::from_wire(&message.role),
        message.content.filter(|c| !c.is_empty()),
        tool_calls,
    ))
}
