//! Trigger-driven runner for the non-SQL notification flow.
//!
//! Any message on the trigger topic means "check for new non-SQL answers
//! now"; its payload is ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nlsql_core::{NotifyFlow, NotifyReport};

use crate::{Consumer, PubSubError};

pub struct NonSqlNotifyTriggerConsumer<C> {
    consumer: C,
    flow: Arc<dyn NotifyFlow>,
    poll_interval: Duration,
    keep_consuming: AtomicBool,
}

impl<C: Consumer> NonSqlNotifyTriggerConsumer<C> {
    /// `consumer` must already be subscribed to the trigger topic.
    pub fn new(consumer: C, flow: Arc<dyn NotifyFlow>, poll_interval: Duration) -> Self {
        Self {
            consumer,
            flow,
            poll_interval,
            keep_consuming: AtomicBool::new(true),
        }
    }

    /// Wait up to `timeout` for one trigger and run the flow once if it came.
    ///
    /// Returns `None` when no trigger arrived or the read failed.
    pub async fn consume(&self, timeout: Duration) -> Option<NotifyReport> {
        match self.consumer.consume(timeout).await {
            Ok(Some(_)) => {
                tracing::info!("Received trigger, invoking non-SQL notify flow");
                Some(self.flow.fetch_and_notify().await)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Error while consuming trigger");
                None
            }
        }
    }

    /// Run the flow once per trigger until [`Self::stop_consuming`] is called
    /// or the broker closes. Read errors are logged and retried after one
    /// poll interval.
    pub async fn listen(&self) {
        tracing::info!("Listening for non-SQL notify triggers");
        self.keep_consuming.store(true, Ordering::SeqCst);

        while self.keep_consuming.load(Ordering::SeqCst) {
            match self.consumer.consume(self.poll_interval).await {
                Ok(Some(_)) => {
                    tracing::info!("Received trigger, invoking non-SQL notify flow");
                    let report = self.flow.fetch_and_notify().await;
                    if !report.is_complete() {
                        tracing::warn!(
                            fetched = report.fetched,
                            failed_presenters = report.failed_presenters(),
                            "Notification cycle did not fully succeed"
                        );
                    }
                }
                Ok(None) => {}
                Err(PubSubError::Closed) => {
                    tracing::info!("Trigger stream closed, stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error while consuming trigger");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        tracing::info!("Stopped listening for non-SQL notify triggers");
    }

    /// Ask a running [`Self::listen`] loop to stop after its current poll.
    pub fn stop_consuming(&self) {
        self.keep_consuming.store(false, Ordering::SeqCst);
    }
}
