//! # Function Definitions and Tool Dispatch
//!
//! Developer-declared functions that a model may ask to invoke.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. Declaration: function(name, description).param(..).build(handler)
//! 2. Definition:  pipeline.define_function(def) -> ChatTool (backend descriptor attached)
//! 3. Attachment:  ChatOptions::builder().tool(chat_tool)
//! 4. Invocation:  the model emits a ToolCall naming the function
//! 5. Execution:   execute_tool_call() coerces arguments, runs the handler,
//!                 and writes the call's result slot
//! ```
//!
//! ## Declarative Parameters
//!
//! There is no runtime reflection. Each parameter is registered up front with
//! a [`ParamKind`], and incoming arguments are coerced against that schema
//! before the handler runs. Models routinely send `"3"` where `3` was
//! expected, so coercion is lenient in the obvious directions:
//!
//! | Kind      | Accepted                                   |
//! |-----------|--------------------------------------------|
//! | `string`  | strings; numbers and booleans are stringified |
//! | `integer` | integers, whole floats, numeric strings    |
//! | `number`  | numbers, numeric strings                   |
//! | `boolean` | booleans, `"true"` / `"false"`             |
//! | `array`   | arrays, strings holding a JSON array       |
//! | `object`  | objects, strings holding a JSON object     |
//!
//! A missing required argument is an [`Error::InvalidInput`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use chat_pipeline::{function, Result};
//! use serde_json::json;
//!
//! let add = function("add", "Add two numbers")
//!     .param("a", "number")
//!     .param("b", "number")
//!     .build(|args| async move {
//!         let a = args["a"].as_f64().unwrap_or(0.0);
//!         let b = args["b"].as_f64().unwrap_or(0.0);
//!         Ok(json!({"result": a + b}))
//!     });
//! ```

use crate::types::{ChatOptions, ToolCall};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async function handler.
///
/// ```text
/// Arc<                                      // shared by every ChatTool clone
///   dyn Fn(Value)                           // coerced JSON arguments
///     -> Pin<Box<                           // boxed so handlers of different
///       dyn Future<Output = Result<Value>>  // concrete types share one slot
///         + Send>>
///     + Send + Sync>
/// ```
pub type FunctionHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Expected JSON kind of a function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Passed through without coercion
    Any,
}

impl ParamKind {
    /// Parse the short type notation used by [`FunctionBuilder::param`].
    ///
    /// Unknown names fall back to `String`.
    pub fn from_type_str(type_str: &str) -> Self {
        match type_str {
            "string" | "str" => ParamKind::String,
            "integer" | "int" | "i32" | "i64" | "u32" | "u64" => ParamKind::Integer,
            "number" | "float" | "f32" | "f64" => ParamKind::Number,
            "boolean" | "bool" => ParamKind::Boolean,
            "array" | "list" | "vec" => ParamKind::Array,
            "object" | "dict" | "map" => ParamKind::Object,
            "any" => ParamKind::Any,
            _ => ParamKind::String,
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamKind::String => serde_json::json!({"type": "string"}),
            ParamKind::Integer => serde_json::json!({"type": "integer"}),
            ParamKind::Number => serde_json::json!({"type": "number"}),
            ParamKind::Boolean => serde_json::json!({"type": "boolean"}),
            ParamKind::Array => serde_json::json!({"type": "array"}),
            ParamKind::Object => serde_json::json!({"type": "object"}),
            ParamKind::Any => serde_json::json!({}),
        }
    }

    /// Coerce `value` into this kind, or `None` if it cannot be represented
    fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::Any, v) => Some(v),

            (ParamKind::String, Value::String(s)) => Some(Value::String(s)),
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::String, _) => None,

            (ParamKind::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(Value::Number(n))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| Value::from(f as i64))
                }
            }
            (ParamKind::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (ParamKind::Integer, _) => None,

            (ParamKind::Number, Value::Number(n)) => Some(Value::Number(n)),
            (ParamKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ParamKind::Number, _) => None,

            (ParamKind::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (ParamKind::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamKind::Boolean, _) => None,

            (ParamKind::Array, Value::Array(a)) => Some(Value::Array(a)),
            (ParamKind::Object, Value::Object(o)) => Some(Value::Object(o)),
            (ParamKind::Array | ParamKind::Object, Value::String(s)) => {
                let parsed: Value = serde_json::from_str(&s).ok()?;
                let matches = match self {
                    ParamKind::Array => parsed.is_array(),
                    _ => parsed.is_object(),
                };
                matches.then_some(parsed)
            }
            (ParamKind::Array | ParamKind::Object, _) => None,
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<String>,
    pub required: bool,
}

/// A developer-declared function: metadata, parameter schema, and handler.
#[derive(Clone)]
pub struct FunctionDefinition {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    handler: FunctionHandler,
}

impl FunctionDefinition {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            params,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// JSON Schema object describing the parameters
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut schema = param.kind.json_schema();
            if let (Some(desc), Some(obj)) = (&param.description, schema.as_object_mut()) {
                obj.insert("description".to_string(), Value::String(desc.clone()));
            }
            properties.insert(param.name.clone(), schema);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Function descriptor in the `{"type":"function","function":{...}}` shape
    /// both supported wire protocols understand
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }

    /// Coerce raw model arguments against the declared parameters.
    ///
    /// `null` is treated as an empty argument object. Arguments that are not
    /// declared are passed through untouched.
    pub fn coerce_arguments(&self, arguments: Value) -> Result<Value> {
        let mut args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => map,
                _ => {
                    return Err(Error::invalid_input(format!(
                        "arguments for '{}' must be a JSON object",
                        self.name
                    )));
                }
            },
            _ => {
                return Err(Error::invalid_input(format!(
                    "arguments for '{}' must be a JSON object",
                    self.name
                )));
            }
        };

        for param in &self.params {
            match args.remove(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(Error::invalid_input(format!(
                            "missing required argument '{}' for function '{}'",
                            param.name, self.name
                        )));
                    }
                }
                Some(value) => {
                    let coerced = param.kind.coerce(value.clone()).ok_or_else(|| {
                        Error::invalid_input(format!(
                            "argument '{}' for function '{}' cannot be read as {:?}: {}",
                            param.name, self.name, param.kind, value
                        ))
                    })?;
                    args.insert(param.name.clone(), coerced);
                }
            }
        }

        Ok(Value::Object(args))
    }

    /// Coerce `arguments` and run the handler.
    ///
    /// Handler failures surface as [`Error::ToolExecution`]; cancellation is
    /// passed through unchanged.
    pub async fn invoke(&self, arguments: Value) -> Result<Value> {
        let args = self.coerce_arguments(arguments)?;
        match (self.handler)(args).await {
            Ok(value) => Ok(value),
            Err(err @ (Error::ToolExecution(_) | Error::Cancelled)) => Err(err),
            Err(err) => Err(Error::tool(format!("{}: {}", self.name, err))),
        }
    }
}

impl std::fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params)
            .finish()
    }
}

/// Builder for [`FunctionDefinition`]
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Required parameter using the short type notation (`"string"`, `"int"`, ...)
    pub fn param(self, name: &str, type_str: &str) -> Self {
        self.push(name, ParamKind::from_type_str(type_str), None, true)
    }

    /// Required parameter with a description shown to the model
    pub fn described_param(self, name: &str, type_str: &str, description: &str) -> Self {
        self.push(
            name,
            ParamKind::from_type_str(type_str),
            Some(description.to_string()),
            true,
        )
    }

    pub fn optional_param(self, name: &str, type_str: &str) -> Self {
        self.push(name, ParamKind::from_type_str(type_str), None, false)
    }

    fn push(
        mut self,
        name: &str,
        kind: ParamKind,
        description: Option<String>,
        required: bool,
    ) -> Self {
        // later declarations replace earlier ones with the same name
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            description,
            required,
        });
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> FunctionDefinition
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        FunctionDefinition::new(self.name, self.description, self.params, handler)
    }
}

/// Start declaring a function
pub fn function(name: impl Into<String>, description: impl Into<String>) -> FunctionBuilder {
    FunctionBuilder::new(name, description)
}

/// A function as defined by a particular backend.
///
/// Carries the backend-specific descriptor that is sent on the wire, and the
/// name of the backend that produced it.
#[derive(Clone)]
pub struct ChatTool {
    definition: FunctionDefinition,
    descriptor: Value,
    backend: String,
}

impl ChatTool {
    pub fn new(definition: FunctionDefinition, descriptor: Value, backend: impl Into<String>) -> Self {
        Self {
            definition,
            descriptor,
            backend: backend.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn description(&self) -> &str {
        self.definition.description()
    }

    pub fn parameters_schema(&self) -> Value {
        self.definition.parameters_schema()
    }

    /// Wire descriptor produced by the defining backend
    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    /// Name of the backend that defined this tool
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        self.definition.invoke(arguments).await
    }
}

impl std::fmt::Debug for ChatTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTool")
            .field("name", &self.name())
            .field("backend", &self.backend)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Resolve `call` against the tools in `options`, run it, and record the
/// result on the call.
pub async fn execute_tool_call(call: &mut ToolCall, options: &ChatOptions) -> Result<()> {
    let tool = options.find_tool(call.name()).ok_or_else(|| {
        Error::tool(format!(
            "model requested unknown function '{}'",
            call.name()
        ))
    })?;

    let result = tool.execute(call.arguments().clone()).await?;
    call.set_result(result)
}
