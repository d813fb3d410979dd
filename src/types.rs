//! Core types for the chat pipeline
//!
//! Everything here is created per call and dropped once the call (or the
//! terminal chunk of its stream) has been consumed. Nothing is shared across
//! independent calls.

use crate::orchestrator::ToolOrchestrator;
use crate::tools::ChatTool;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default number of tool-calling round trips per call
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 3;

// ============================================================================
// MESSAGE MODEL
// ============================================================================

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool result message
    Tool,
}

impl MessageRole {
    /// Wire name used by OpenAI-compatible servers
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    /// Parse a wire role name, defaulting unknown roles to assistant
    pub fn from_wire(role: &str) -> Self {
        match role {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "tool" => MessageRole::Tool,
            _ => MessageRole::Assistant,
        }
    }
}

/// A model-issued request to invoke a declared function.
///
/// The result slot starts empty and is written exactly once, after the
/// function has run. The optional `id` is the backend's opaque call id, echoed
/// back when the result is sent in a follow-up request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl ToolCall {
    /// Create a call with no backend id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
            result: None,
        }
    }

    /// Attach the backend's call id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Record the function's result.
    ///
    /// Fails if a result was already recorded for this call.
    pub fn set_result(&mut self, result: Value) -> Result<()> {
        if self.result.is_some() {
            return Err(Error::tool(format!(
                "result for tool call '{}' was already set",
                self.name
            )));
        }
        self.result = Some(result);
        Ok(())
    }
}

/// One conversation turn.
///
/// Immutable once constructed. Fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn new(
        role: MessageRole,
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Self {
        Self {
            role,
            content,
            tool_calls,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Some(text.into()), None)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Some(text.into()), None)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Some(text.into()), None)
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, Some(text.into()), None)
    }

    /// Assistant turn that records tool invocations (and, once executed,
    /// their results)
    pub fn with_tool_calls(role: MessageRole, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(role, None, Some(tool_calls))
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Tool calls issued by this message, empty when there are none
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

/// One incremental fragment of a streaming response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call: Option<ToolCall>,
}

impl MessageChunk {
    pub fn new(role: MessageRole, content: Option<String>, tool_call: Option<ToolCall>) -> Self {
        Self {
            role,
            content,
            tool_call,
        }
    }

    /// Text fragment
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self::new(role, Some(content.into()), None)
    }

    /// Tool-call fragment
    pub fn tool_call(role: MessageRole, call: ToolCall) -> Self {
        Self::new(role, None, Some(call))
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn call(&self) -> Option<&ToolCall> {
        self.tool_call.as_ref()
    }

    pub fn into_parts(self) -> (MessageRole, Option<String>, Option<ToolCall>) {
        (self.role, self.content, self.tool_call)
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Response-format hint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text
    #[default]
    Text,
    /// A single JSON object
    JsonObject,
}

/// Per-call configuration.
///
/// Built fresh for each call and never mutated by the pipeline. The tool loop
/// substitutes a copy from [`ChatOptions::without_tools`] on its last
/// iteration.
#[derive(Clone)]
pub struct ChatOptions {
    response_format: ResponseFormat,
    temperature: Option<f32>,
    top_p: Option<f32>,
    seed: Option<u64>,
    stop_sequences: Vec<String>,
    max_tokens: Option<u32>,
    tools: Vec<Arc<ChatTool>>,
    auto_execute_tools: bool,
    max_tool_iterations: u32,
    orchestrator: Option<Arc<dyn ToolOrchestrator>>,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("response_format", &self.response_format)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("seed", &self.seed)
            .field("stop_sequences", &self.stop_sequences)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("auto_execute_tools", &self.auto_execute_tools)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field(
                "orchestrator",
                &self.orchestrator.as_ref().map(|o| o.name().to_string()),
            )
            .finish()
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            response_format: ResponseFormat::Text,
            temperature: None,
            top_p: None,
            seed: None,
            stop_sequences: Vec::new(),
            max_tokens: None,
            tools: Vec::new(),
            auto_execute_tools: true,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            orchestrator: None,
        }
    }
}

impl ChatOptions {
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
    }

    pub fn is_json_mode(&self) -> bool {
        self.response_format == ResponseFormat::JsonObject
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn stop_sequences(&self) -> &[String] {
        &self.stop_sequences
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn tools(&self) -> &[Arc<ChatTool>] {
        &self.tools
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Look up a tool by name
    pub fn find_tool(&self, name: &str) -> Option<&Arc<ChatTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn auto_execute_tools(&self) -> bool {
        self.auto_execute_tools
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations
    }

    /// Orchestrator selected for this call, `None` meaning the standard loop
    pub fn orchestrator(&self) -> Option<&Arc<dyn ToolOrchestrator>> {
        self.orchestrator.as_ref()
    }

    /// Copy of these options with an empty tool list
    pub fn without_tools(&self) -> Self {
        Self {
            tools: Vec::new(),
            ..self.clone()
        }
    }

    /// Stable JSON view of everything that influences a backend response.
    ///
    /// Handlers and the orchestrator are not representable and are left out;
    /// tools contribute their name, description and parameter schema.
    pub fn fingerprint(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect();

        serde_json::json!({
            "response_format": self.response_format,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "seed": self.seed,
            "stop": self.stop_sequences,
            "max_tokens": self.max_tokens,
            "tools": tools,
        })
    }
}

/// Builder for [`ChatOptions`]
#[derive(Default)]
pub struct ChatOptionsBuilder {
    response_format: Option<ResponseFormat>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    seed: Option<u64>,
    stop_sequences: Vec<String>,
    max_tokens: Option<u32>,
    tools: Vec<Arc<ChatTool>>,
    auto_execute_tools: Option<bool>,
    max_tool_iterations: Option<u32>,
    orchestrator: Option<Arc<dyn ToolOrchestrator>>,
}

impl std::fmt::Debug for ChatOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptionsBuilder")
            .field("response_format", &self.response_format)
            .field("temperature", &self.temperature)
            .field("tools", &format!("{} tools", self.tools.len()))
            .finish()
    }
}

impl ChatOptionsBuilder {
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Shorthand for `response_format(ResponseFormat::JsonObject)`
    pub fn json_mode(self) -> Self {
        self.response_format(ResponseFormat::JsonObject)
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn tool(mut self, tool: ChatTool) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tools(mut self, tools: Vec<ChatTool>) -> Self {
        self.tools.extend(tools.into_iter().map(Arc::new));
        self
    }

    /// Add an already shared tool
    pub fn shared_tool(mut self, tool: Arc<ChatTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn auto_execute_tools(mut self, auto: bool) -> Self {
        self.auto_execute_tools = Some(auto);
        self
    }

    pub fn max_tool_iterations(mut self, iterations: u32) -> Self {
        self.max_tool_iterations = Some(iterations);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn ToolOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn build(self) -> Result<ChatOptions> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::config("temperature must be between 0.0 and 2.0"));
            }
        }

        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::config("top_p must be between 0.0 and 1.0"));
            }
        }

        let max_tool_iterations = self
            .max_tool_iterations
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS);
        if max_tool_iterations == 0 {
            return Err(Error::config("max_tool_iterations must be at least 1"));
        }

        for (i, tool) in self.tools.iter().enumerate() {
            if self.tools[..i].iter().any(|t| t.name() == tool.name()) {
                return Err(Error::config(format!(
                    "duplicate tool name '{}'",
                    tool.name()
                )));
            }
        }

        Ok(ChatOptions {
            response_format: self.response_format.unwrap_or_default(),
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
            stop_sequences: self.stop_sequences,
            max_tokens: self.max_tokens,
            tools: self.tools,
            auto_execute_tools: self.auto_execute_tools.unwrap_or(true),
            max_tool_iterations,
            orchestrator: self.orchestrator,
        })
    }
}

// ============================================================================
// REQUEST ENVELOPE
// ============================================================================

/// Everything one call needs: history, options, and the caller's
/// cancellation signal
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
    pub cancel: CancellationToken,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, options: ChatOptions) -> Self {
        Self {
            messages,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same request with different options, sharing the cancellation token
    pub fn with_options(&self, options: ChatOptions) -> Self {
        Self {
            messages: self.messages.clone(),
            options,
            cancel: self.cancel.clone(),
        }
    }
}

// ============================================================================
// OPENAI WIRE FORMAT
// ============================================================================

/// OpenAI API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// OpenAI tool call format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: OpenAIFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// OpenAI function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    pub arguments: String,
}

/// OpenAI chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// Non-streaming completion response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAICompletion {
    pub choices: Vec<OpenAICompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAICompletionChoice {
    pub message: OpenAIMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// OpenAI streaming response chunk
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    pub choices: Vec<OpenAIChoice>,
}

/// OpenAI choice in streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    pub delta: OpenAIDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// OpenAI delta (incremental update)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

/// OpenAI tool call delta
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAIFunctionDelta>,
}

/// OpenAI function delta
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ============================================================================
// OLLAMA RAW GENERATE WIRE FORMAT
// ============================================================================

/// `POST /api/generate` body
#[derive(Debug, Clone, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub raw: bool,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub options: OllamaOptions,
}

/// Sampling options nested in a generate request
#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub stop: Vec<String>,
}

/// One NDJSON line of a generate response
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaGenerateChunk {
    pub done: bool,
    #[serde(default)]
    pub response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::function;
    use serde_json::json;

    fn noop_tool(name: &str) -> ChatTool {
        ChatTool::new(
            function(name, "does nothing").build(|_| async { Ok(json!({})) }),
            json!({"name": name}),
            "test",
        )
    }

    #[test]
    fn test_chat_options_defaults() {
        let options = ChatOptions::builder().build().unwrap();

        assert_eq!(options.response_format(), ResponseFormat::Text);
        assert!(!options.is_json_mode());
        assert!(options.auto_execute_tools());
        assert_eq!(options.max_tool_iterations(), 3);
        assert!(options.tools().is_empty());
        assert!(options.orchestrator().is_none());
    }

    #[test]
    fn test_chat_options_builder() {
        let options = ChatOptions::builder()
            .json_mode()
            .temperature(0.2)
            .top_p(0.9)
            .seed(7)
            .stop_sequence("END")
            .max_tokens(256)
            .max_tool_iterations(5)
            .auto_execute_tools(false)
            .build()
            .unwrap();

        assert!(options.is_json_mode());
        assert_eq!(options.temperature(), Some(0.2));
        assert_eq!(options.top_p(), Some(0.9));
        assert_eq!(options.seed(), Some(7));
        assert_eq!(options.stop_sequences(), ["END".to_string()]);
        assert_eq!(options.max_tokens(), Some(256));
        assert_eq!(options.max_tool_iterations(), 5);
        assert!(!options.auto_execute_tools());
    }

    #[test]
    fn test_chat_options_validation() {
        assert!(ChatOptions::builder().temperature(2.5).build().is_err());
        assert!(ChatOptions::builder().top_p(1.5).build().is_err());
        assert!(ChatOptions::builder().max_tool_iterations(0).build().is_err());
    }

    #[test]
    fn test_duplicate_tool_names_rejected() {
        let result = ChatOptions::builder()
            .tool(noop_tool("lookup"))
            .tool(noop_tool("lookup"))
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_without_tools_leaves_original_untouched() {
        let options = ChatOptions::builder()
            .tool(noop_tool("a"))
            .tool(noop_tool("b"))
            .seed(3)
            .build()
            .unwrap();

        let stripped = options.without_tools();

        assert!(stripped.tools().is_empty());
        assert_eq!(stripped.seed(), Some(3));
        assert_eq!(options.tools().len(), 2);
        assert!(options.find_tool("b").is_some());
        assert!(options.find_tool("c").is_none());
    }

    #[test]
    fn test_fingerprint_changes_with_options() {
        let a = ChatOptions::builder().temperature(0.1).build().unwrap();
        let b = ChatOptions::builder().temperature(0.2).build().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn test_tool_call_result_written_once() {
        let mut call = ToolCall::new("add", json!({"a": 1})).with_id("call_1");
        assert!(!call.has_result());
        assert_eq!(call.id(), Some("call_1"));

        call.set_result(json!(2)).unwrap();
        assert_eq!(call.result(), Some(&json!(2)));

        let second = call.set_result(json!(3));
        assert!(matches!(second, Err(Error::ToolExecution(_))));
        assert_eq!(call.result(), Some(&json!(2)));
    }

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("hi");
        assert_eq!(msg.role(), MessageRole::User);
        assert_eq!(msg.content(), Some("hi"));
        assert!(!msg.has_tool_calls());

        let msg = Message::with_tool_calls(
            MessageRole::Assistant,
            vec![ToolCall::new("lookup", json!({}))],
        );
        assert_eq!(msg.content(), None);
        assert_eq!(msg.tool_calls().len(), 1);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::assistant("4");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"role": "assistant", "content": "4"}));

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(MessageRole::Tool.as_str(), "tool");
        assert_eq!(MessageRole::from_wire("system"), MessageRole::System);
        assert_eq!(MessageRole::from_wire("whatever"), MessageRole::Assistant);
    }

    #[test]
    fn test_ollama_chunk_requires_done() {
        let chunk: OllamaGenerateChunk =
            serde_json::from_str(r#"{"done":false,"response":"Hel"}"#).unwrap();
        assert!(!chunk.done);
        assert_eq!(chunk.response, "Hel");

        assert!(serde_json::from_str::<OllamaGenerateChunk>(r#"{"response":"x"}"#).is_err());
    }
}
