//! Error types for the message stream adapters.

use nlsql_core::FlowError;

/// Errors from publishing to or consuming from a message stream.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PubSubError {
    #[error("broker is closed")]
    Closed,
    #[error("invalid topic name: {0:?}")]
    InvalidTopic(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<PubSubError> for FlowError {
    fn from(err: PubSubError) -> Self {
        FlowError::PubSub(err.to_string())
    }
}
