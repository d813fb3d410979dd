//! Adapter for Ollama's raw `/api/generate` endpoint.
//!
//! Function calling only works in raw mode, so the prompt is assembled here
//! in the Mistral instruction format and tool calls are recovered from the
//! generated text by the [`classifier`](crate::classifier).
//!
//! Whitespace in the prompt affects tokenization; the separators below are
//! exact.

use crate::classifier::{Segment, ToolCallClassifier, classify_stream};
use crate::config::BackendConfig;
use crate::handler::{ChatHandler, ChunkStream};
use crate::tools::{self, ChatTool, FunctionDefinition};
use crate::types::{
    ChatOptions, ChatRequest, Message, MessageChunk, MessageRole, OllamaGenerateChunk,
    OllamaGenerateRequest, OllamaOptions, ToolCall,
};
use crate::utils::{cancellable, ndjson_lines, with_cancellation};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;

/// Text returned in place of a completion when the server reports 404
pub const MODEL_UNAVAILABLE: &str =
    "ERROR: The configured model isn't available. Perhaps it's still downloading.";

const DEFAULT_TEMPERATURE: f32 = 0.5;
const DEFAULT_TOP_P: f32 = 1.0;

/// Appended to every request's stop sequences
const RAW_STOP_SEQUENCES: [&str; 2] = ["\n\n", "[/TOOL_CALLS]"];

const TOOL_CALLS_END: &str = "[/TOOL_CALLS]";

/// Backend for Ollama's raw generation protocol
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model().to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    pub fn build_request(&self, request: &ChatRequest, stream: bool) -> OllamaGenerateRequest {
        let options = &request.options;

        let stop = options
            .stop_sequences()
            .iter()
            .cloned()
            .chain(RAW_STOP_SEQUENCES.iter().map(|s| s.to_string()))
            .collect();

        OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: format_prompt(&request.messages, options.tools()),
            raw: true,
            stream,
            format: options.is_json_mode().then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: options.temperature().unwrap_or(DEFAULT_TEMPERATURE),
                top_p: options.top_p().unwrap_or(DEFAULT_TOP_P),
                num_predict: options.max_tokens(),
                seed: options.seed(),
                stop,
            },
        }
    }

    /// POST the request; `None` means the model is not available
    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<Option<reqwest::Response>> {
        let body = self.build_request(request, stream);
        log::debug!(
            "POST {} ({} prompt chars, stream={})",
            self.generate_url(),
            body.prompt.chars().count(),
            stream
        );

        let response = cancellable(&request.cancel, async {
            self.http_client
                .post(self.generate_url())
                .json(&body)
                .send()
                .await
                .map_err(|e| if e.is_timeout() { Error::Timeout } else { Error::Http(e) })
        })
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            log::warn!("model '{}' not found on {}", self.model, self.base_url);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("{}: {}", status, body)));
        }

        Ok(Some(response))
    }
}

#[async_trait]
impl ChatHandler for OllamaBackend {
    fn name(&self) -> &str {
        "OllamaBackend"
    }

    async fn complete(&self, request: ChatRequest) -> Result<Vec<Message>> {
        let json_mode = request.options.is_json_mode();
        let Some(response) = self.send(&request, false).await? else {
            return Ok(vec![Message::assistant(model_unavailable_text(json_mode))]);
        };

        let entry: OllamaGenerateChunk = cancellable(&request.cancel, async {
            let text = response.text().await?;
            serde_json::from_str(&text)
                .map_err(|e| Error::protocol(format!("invalid response entry from Ollama: {}", e)))
        })
        .await?;

        let mut classifier = ToolCallClassifier::new(json_mode);
        let mut segments = classifier.push(&entry.response);
        segments.extend(classifier.finish());

        let mut content = String::new();
        let mut payload = String::new();
        for segment in segments {
            match segment {
                Segment::Content(text) => content.push_str(&text),
                Segment::ToolFragment(fragment) => payload.push_str(&fragment),
            }
        }

        let tool_calls = parse_tool_payload(&payload)?;
        if tool_calls.is_empty() {
            return Ok(vec![Message::assistant(content)]);
        }

        Ok(vec![Message::new(
            MessageRole::Assistant,
            Some(content).filter(|c| !c.is_empty()),
            Some(tool_calls),
        )])
    }

    async fn complete_streaming(&self, request: ChatRequest) -> Result<ChunkStream> {
        let json_mode = request.options.is_json_mode();
        let Some(response) = self.send(&request, true).await? else {
            let chunk = MessageChunk::text(MessageRole::Assistant, model_unavailable_text(json_mode));
            return Ok(Box::pin(futures::stream::iter(vec![Ok::<_, Error>(chunk)])));
        };

        let mut lines = ndjson_lines(response.bytes_stream());
        let deltas = async_stream::try_stream! {
            while let Some(line) = lines.next().await {
                let entry: OllamaGenerateChunk = serde_json::from_str(&line?).map_err(|e| {
                    Error::protocol(format!("invalid response entry from Ollama: {}", e))
                })?;
                if entry.done {
                    break;
                }
                yield entry.response;
            }
        };

        let mut segments = Box::pin(classify_stream(deltas, json_mode));
        let chunks: ChunkStream = Box::pin(async_stream::try_stream! {
            let mut payload = String::new();
            while let Some(segment) = segments.next().await {
                match segment? {
                    Segment::Content(text) => {
                        yield MessageChunk::text(MessageRole::Assistant, text);
                    }
                    Segment::ToolFragment(fragment) => payload.push_str(&fragment),
                }
            }
            for call in parse_tool_payload(&payload)? {
                yield MessageChunk::tool_call(MessageRole::Assistant, call);
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

fn model_unavailable_text(json_mode: bool) -> String {
    if json_mode {
        Value::String(MODEL_UNAVAILABLE.to_string()).to_string()
    } else {
        MODEL_UNAVAILABLE.to_string()
    }
}

/// Render history as a Mistral instruction prompt.
///
/// When tools are offered, their descriptors are placed immediately before
/// the last user or system turn.
pub fn format_prompt(messages: &[Message], tools: &[Arc<ChatTool>]) -> String {
    let mut prompt = String::new();
    let last_instruction = messages
        .iter()
        .rposition(|m| matches!(m.role(), MessageRole::User | MessageRole::System));

    for (index, message) in messages.iter().enumerate() {
        if Some(index) == last_instruction && !tools.is_empty() {
            let descriptors: Vec<&Value> = tools.iter().map(|t| t.descriptor()).collect();
            prompt.push_str("[AVAILABLE_TOOLS] ");
            prompt.push_str(&json!(descriptors).to_string());
            prompt.push_str("[/AVAILABLE_TOOLS]");
        }

        if message.has_tool_calls() {
            push_tool_calls(&mut prompt, message.tool_calls());
            continue;
        }

        let content = message.content().unwrap_or_default();
        match message.role() {
            MessageRole::User | MessageRole::System => {
                prompt.push_str("[INST] ");
                prompt.push_str(content);
                prompt.push_str(" [/INST]");
            }
            MessageRole::Assistant => {
                prompt.push_str(content);
                // no matching <s>; Mistral's template only closes turns
                prompt.push_str("</s> ");
            }
            MessageRole::Tool => {
                prompt.push_str("[TOOL_RESULTS] ");
                prompt.push_str(&json!({ "content": content }).to_string());
                prompt.push_str(" [/TOOL_RESULTS]");
            }
        }
    }

    prompt
}

fn push_tool_calls(prompt: &mut String, calls: &[ToolCall]) {
    let issued: Vec<Value> = calls
        .iter()
        .map(|c| json!({ "name": c.name(), "arguments": c.arguments() }))
        .collect();

    prompt.push_str("[TOOL_CALLS] ");
    prompt.push_str(&Value::Array(issued).to_string());
    prompt.push_str("</s>");

    for call in calls.iter().filter(|c| c.has_result()) {
        let result = json!({ "name": call.name(), "content": call.result() });
        prompt.push_str("[TOOL_RESULTS] ");
        prompt.push_str(&result.to_string());
        prompt.push_str(" [/TOOL_RESULTS]");
    }
}

/// Parse the tool lane of a raw completion.
///
/// Accepts a JSON array of `{name, arguments}` objects or a single such
/// object. A blank payload yields no calls.
pub fn parse_tool_payload(payload: &str) -> Result<Vec<ToolCall>> {
    let trimmed = payload.trim();
    let trimmed = trimmed.strip_suffix(TOOL_CALLS_END).unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Value = serde_json::from_str(trimmed)
        .map_err(|e| Error::protocol(format!("unparseable tool call payload: {}", e)))?;

    let items = match parsed {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(Error::protocol(format!(
                "tool call payload must be an array or object, got {}",
                other
            )));
        }
    };

    items.into_iter().map(parse_tool_call).collect()
}

fn parse_tool_call(item: Value) -> Result<ToolCall> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::protocol(format!("tool call without a name: {}", item)))?;

    let arguments = match item.get("arguments") {
        None | Some(Value::Null) => json!({}),
        // some models double-encode the arguments
        Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
            Error::protocol(format!("failed to parse arguments for '{}': {}", name, e))
        })?,
        Some(other) => other.clone(),
    };

    Ok(ToolCall::new(name, arguments))
}
