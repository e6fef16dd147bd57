use thiserror::Error;

/// Top-level error type for the nlsql system.
///
/// Collaborator failures arrive as [`FlowError::Upstream`] and are propagated
/// verbatim: the code and message a store, LLM or tool reported are exactly
/// what the caller of `query` sees. Every other variant maps to a fixed code
/// via [`FlowError::code`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlowError {
    #[error("{message}")]
    Upstream { code: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Pub/sub error: {0}")]
    PubSub(String),

    #[error("Presenter error: {0}")]
    Presenter(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Tool-call loop exceeded {limit} iterations")]
    ToolLoopExceeded { limit: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Failure reported by an external collaborator.
    pub fn upstream(code: u16, message: impl Into<String>) -> Self {
        FlowError::Upstream {
            code,
            message: message.into(),
        }
    }

    /// Status code carried by this failure.
    pub fn code(&self) -> u16 {
        match self {
            FlowError::Upstream { code, .. } => *code,
            FlowError::Timeout { .. } => 504,
            FlowError::ToolLoopExceeded { .. } => 508,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(err: toml::de::Error) -> Self {
        FlowError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FlowError {
    fn from(err: toml::ser::Error) -> Self {
        FlowError::Config(err.to_string())
    }
}

/// A specialized `Result` type for nlsql operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_is_verbatim() {
        let err = FlowError::upstream(404, "Database nb not found");
        assert_eq!(err.to_string(), "Database nb not found");
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_fixed_codes() {
        assert_eq!(FlowError::Internal("boom".into()).code(), 500);
        assert_eq!(FlowError::Config("bad".into()).code(), 500);
        assert_eq!(
            FlowError::Timeout {
                operation: "LLM reply".into(),
                secs: 30
            }
            .code(),
            504
        );
        assert_eq!(FlowError::ToolLoopExceeded { limit: 4 }.code(), 508);
    }

    #[test]
    fn test_error_display() {
        let err = FlowError::Timeout {
            operation: "tool invocation".to_string(),
            secs: 15,
        };
        assert_eq!(err.to_string(), "tool invocation timed out after 15s");

        let err = FlowError::ToolLoopExceeded { limit: 3 };
        assert_eq!(err.to_string(), "Tool-call loop exceeded 3 iterations");
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let flow_err: FlowError = err.unwrap_err().into();
        assert!(matches!(flow_err, FlowError::Serialization(_)));
        assert_eq!(flow_err.code(), 500);
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let flow_err: FlowError = err.unwrap_err().into();
        assert!(matches!(flow_err, FlowError::Config(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let flow_err: FlowError = io_err.into();
        assert!(matches!(flow_err, FlowError::Io(_)));
        assert!(flow_err.to_string().contains("access denied"));
    }
}
