//! Message stream plumbing for the non-SQL notification pipeline.
//!
//! Defines the publish/consume seams, an in-process broker with consumer
//! group semantics, and the three stream adapters built on top of them:
//! the query event producer, the bounded answer repository and the trigger
//! consumer.

pub mod error;
pub mod kafka_repo;
pub mod memory;
pub mod producer;
pub mod trigger;

use std::time::Duration;

use async_trait::async_trait;

pub use error::PubSubError;
pub use kafka_repo::KafkaAsRepo;
pub use memory::{MemoryBroker, MemoryConsumer};
pub use producer::QueryFlowEventProducer;
pub use trigger::NonSqlNotifyTriggerConsumer;

/// Writes string messages to named topics.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, content: &str) -> Result<(), PubSubError>;
}

/// Reads string messages from the topics it was subscribed to.
///
/// A returned message is already committed for the consumer's group.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    async fn consume(&self, timeout: Duration) -> Result<Option<String>, PubSubError>;
}

/// Normalize a topic or path-like name to dotted form.
///
/// `/api/v1/query-flow` becomes `api.v1.query-flow`; spaces also become dots.
pub fn normalize_topic(topic: &str) -> Result<String, PubSubError> {
    let normalized = topic.replace(['/', ' '], ".");
    let normalized = normalized.trim_start_matches('.');
    if normalized.is_empty() {
        return Err(PubSubError::InvalidTopic(topic.to_string()));
    }
    Ok(normalized.to_string())
}
