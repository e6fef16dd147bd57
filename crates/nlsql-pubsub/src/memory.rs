//! In-process broker with consumer-group semantics.
//!
//! Each topic is an append-only log. Every consumer group keeps its own
//! committed offset per topic, so two groups subscribed to the same topic
//! each see every message once. New groups start at the earliest offset.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::PubSubError;
use crate::{normalize_topic, Consumer, Publisher};

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<String>>,
    /// (group, topic) -> next offset to deliver.
    offsets: HashMap<(String, String), usize>,
    closed: bool,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    published: Notify,
}

/// Cheaply cloneable handle to a shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a consumer for `group` subscribed to `topics`.
    ///
    /// Consumers sharing a group share its offsets.
    pub fn consumer(&self, group: &str, topics: &[&str]) -> Result<MemoryConsumer, PubSubError> {
        let topics = topics
            .iter()
            .map(|t| normalize_topic(t))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(group = %group, topics = ?topics, "Consumer subscribed");
        Ok(MemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topics,
        })
    }

    /// Number of messages on `topic` not yet consumed by `group`.
    pub fn backlog(&self, group: &str, topic: &str) -> usize {
        let Ok(topic) = normalize_topic(topic) else {
            return 0;
        };
        let Ok(state) = self.inner.state.lock() else {
            return 0;
        };
        let len = state.logs.get(&topic).map_or(0, Vec::len);
        let offset = state
            .offsets
            .get(&(group.to_string(), topic))
            .copied()
            .unwrap_or(0);
        len.saturating_sub(offset)
    }

    /// Close the broker. Pending and future reads fail with [`PubSubError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.closed = true;
        }
        self.inner.published.notify_waiters();
    }

    /// Take the next uncommitted message for `group` across `topics`,
    /// committing it in the same step.
    fn take_next(&self, group: &str, topics: &[String]) -> Result<Option<String>, PubSubError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|e| PubSubError::Transport(format!("broker lock poisoned: {}", e)))?;
        if state.closed {
            return Err(PubSubError::Closed);
        }

        for topic in topics {
            let key = (group.to_string(), topic.clone());
            let offset = state.offsets.get(&key).copied().unwrap_or(0);
            let message = state
                .logs
                .get(topic)
                .and_then(|log| log.get(offset))
                .cloned();
            if let Some(message) = message {
                state.offsets.insert(key, offset + 1);
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, content: &str) -> Result<(), PubSubError> {
        let topic = normalize_topic(topic)?;
        let offset = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|e| PubSubError::Transport(format!("broker lock poisoned: {}", e)))?;
            if state.closed {
                return Err(PubSubError::Closed);
            }
            let log = state.logs.entry(topic.clone()).or_default();
            log.push(content.to_string());
            log.len() - 1
        };
        tracing::debug!(topic = %topic, offset, "Message published");
        self.inner.published.notify_waiters();
        Ok(())
    }
}

/// A subscription of one consumer group to a set of topics.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    topics: Vec<String>,
}

impl MemoryConsumer {
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn consume(&self, timeout: Duration) -> Result<Option<String>, PubSubError> {
        // A timeout too large to represent waits until a message or close.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // Register for wake-ups before checking so a publish between the
            // check and the wait is not missed.
            let published = self.broker.inner.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            if let Some(message) = self.broker.take_next(&self.group, &self.topics)? {
                return Ok(Some(message));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, published).await.is_err() {
                        tracing::trace!(group = %self.group, topics = ?self.topics, "No message before timeout");
                        return Ok(None);
                    }
                }
                None => published.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g1", &["answers"]).unwrap();
        broker.publish("answers", "hello").await.unwrap();

        assert_eq!(consumer.consume(SHORT).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(consumer.consume(SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_consume_times_out_on_empty_topic() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g1", &["answers"]).unwrap();
        let started = Instant::now();
        assert_eq!(consumer.consume(SHORT).await.unwrap(), None);
        assert!(started.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn test_groups_have_independent_offsets() {
        let broker = MemoryBroker::new();
        let a = broker.consumer("repo", &["answers"]).unwrap();
        let b = broker.consumer("audit", &["answers"]).unwrap();
        broker.publish("answers", "one").await.unwrap();

        assert_eq!(a.consume(SHORT).await.unwrap().as_deref(), Some("one"));
        assert_eq!(b.consume(SHORT).await.unwrap().as_deref(), Some("one"));
        assert_eq!(a.consume(SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_same_group_shares_offsets() {
        let broker = MemoryBroker::new();
        let first = broker.consumer("repo", &["answers"]).unwrap();
        let second = broker.consumer("repo", &["answers"]).unwrap();
        broker.publish("answers", "one").await.unwrap();
        broker.publish("answers", "two").await.unwrap();

        assert_eq!(first.consume(SHORT).await.unwrap().as_deref(), Some("one"));
        assert_eq!(second.consume(SHORT).await.unwrap().as_deref(), Some("two"));
        assert_eq!(broker.backlog("repo", "answers"), 0);
    }

    #[tokio::test]
    async fn test_topic_names_are_normalized() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g", &["/api/v1/query-flow"]).unwrap();
        broker.publish("api.v1.query-flow", "x").await.unwrap();
        assert_eq!(consumer.consume(SHORT).await.unwrap().as_deref(), Some("x"));
        assert_eq!(consumer.topics(), &["api.v1.query-flow".to_string()]);
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g", &["t"]).unwrap();
        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish("t", "late").await.unwrap();
        });

        let got = consumer.consume(Duration::from_secs(5)).await.unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_unbounded_wait_ends_on_publish_or_close() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g", &["t"]).unwrap();
        let other = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.publish("t", "late").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.close();
        });

        let got = consumer.consume(Duration::MAX).await.unwrap();
        assert_eq!(got.as_deref(), Some("late"));
        assert_eq!(consumer.consume(Duration::MAX).await, Err(PubSubError::Closed));
    }

    #[tokio::test]
    async fn test_closed_broker_fails_reads_and_writes() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g", &["t"]).unwrap();
        broker.close();

        assert_eq!(consumer.consume(SHORT).await, Err(PubSubError::Closed));
        assert_eq!(broker.publish("t", "x").await, Err(PubSubError::Closed));
    }

    #[tokio::test]
    async fn test_backlog_counts_uncommitted() {
        let broker = MemoryBroker::new();
        for i in 0..3 {
            broker.publish("t", &i.to_string()).await.unwrap();
        }
        assert_eq!(broker.backlog("new-group", "t"), 3);
        let consumer = broker.consumer("new-group", &["t"]).unwrap();
        consumer.consume(SHORT).await.unwrap();
        assert_eq!(broker.backlog("new-group", "t"), 2);
    }
}
