//! Error types for the chat pipeline

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// A layer or backend does not implement the requested operation and has
    /// nothing further to delegate to
    #[error("{component} does not support {operation}, and no inner handler is defined")]
    CapabilityNotSupported {
        /// Operation that was invoked (`complete`, `complete_streaming`, ...)
        operation: String,
        /// Name of the component that raised the error
        component: String,
    },

    /// Malformed or unexpected wire payload
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// A tool handler failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// A rate limiter refused the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Response cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a capability error for `operation` raised by `component`
    pub fn unsupported(operation: impl Into<String>, component: impl Into<String>) -> Self {
        Error::CapabilityNotSupported {
            operation: operation.into(),
            component: component.into(),
        }
    }

    /// Create a new protocol decode error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolDecode(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::ToolExecution(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::RateLimited(msg.into())
    }

    /// Create a new cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a cancellation error
    pub fn cancelled() -> Self {
        Error::Cancelled
    }

    /// Whether this error came from the caller abandoning the request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_unsupported_names_operation_and_component() {
        let err = Error::unsupported("complete_streaming", "StubBackend");
        match &err {
            Error::CapabilityNotSupported {
                operation,
                component,
            } => {
                assert_eq!(operation, "complete_streaming");
                assert_eq!(component, "StubBackend");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "StubBackend does not support complete_streaming, and no inner handler is defined"
        );
    }

    #[test]
    fn test_error_protocol() {
        let err = Error::protocol("bad ndjson line");
        assert!(matches!(err, Error::ProtocolDecode(_)));
        assert_eq!(err.to_string(), "Protocol decode error: bad ndjson line");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::ToolExecution(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout_and_cancelled() {
        assert_eq!(Error::timeout().to_string(), "Request timeout");
        let err = Error::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Request cancelled");
        assert!(!Error::timeout().is_cancelled());
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("Something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
