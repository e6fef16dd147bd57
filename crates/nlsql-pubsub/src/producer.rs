//! Publishes query outcomes onto the message stream.

use async_trait::async_trait;

use nlsql_core::config::PubSubConfig;
use nlsql_core::{FlowError, NonSqlAnswer, QueryFailure, QueryFlowListener};

use crate::Publisher;

/// [`QueryFlowListener`] that writes non-SQL answers and failures as JSON.
///
/// Publish errors are logged and swallowed; the query that triggered the
/// event never observes them.
pub struct QueryFlowEventProducer<P> {
    publisher: P,
    non_sql_topic: String,
    failure_topic: String,
}

impl<P: Publisher> QueryFlowEventProducer<P> {
    pub fn new(publisher: P, config: &PubSubConfig) -> Self {
        Self {
            publisher,
            non_sql_topic: config.non_sql_topic.clone(),
            failure_topic: config.failure_topic.clone(),
        }
    }

    async fn publish_json<T: serde::Serialize>(&self, topic: &str, event: &T) {
        let content = match serde_json::to_string(event) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Failed to serialize event");
                return;
            }
        };
        match self.publisher.publish(topic, &content).await {
            Ok(()) => tracing::debug!(topic = %topic, bytes = content.len(), "Event published"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to publish event"),
        }
    }
}

#[async_trait]
impl<P: Publisher> QueryFlowListener for QueryFlowEventProducer<P> {
    async fn on_fail(&self, session_id: &str, db_id: &str, question: &str, failure: &FlowError) {
        let event = QueryFailure::new(session_id, db_id, question, failure);
        self.publish_json(&self.failure_topic, &event).await;
    }

    async fn on_no_sql(&self, answer: &NonSqlAnswer) {
        self.publish_json(&self.non_sql_topic, answer).await;
    }
}
