//! Pull-style answer repository over the non-SQL answers stream.
//!
//! Drains up to `page_size` answers per call. A read that times out means the
//! backlog is exhausted for now and ends the page early. Failed reads and
//! undecodable messages are skipped without counting toward the page, up to
//! `max_failed_reads` per call. The whole call never waits longer than
//! `page_size * answer_timeout`; a page cut short by that budget is partial.
//! A budget too large to represent leaves only the per-read timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use nlsql_core::config::RepoConfig;
use nlsql_core::{AnswerPage, GetNonSqlAnswersRequest, NonSqlAnswer, NonSqlAnswerRepo, Result};

use crate::Consumer;

pub struct KafkaAsRepo<C> {
    consumer: C,
    answer_timeout: Duration,
    max_failed_reads: u32,
}

impl<C: Consumer> KafkaAsRepo<C> {
    /// Wrap a consumer already subscribed to the non-SQL answers topic.
    pub fn new(consumer: C, config: &RepoConfig) -> Self {
        Self {
            consumer,
            answer_timeout: config.answer_timeout(),
            max_failed_reads: config.max_failed_reads,
        }
    }

    pub fn with_answer_timeout(mut self, answer_timeout: Duration) -> Self {
        self.answer_timeout = answer_timeout;
        self
    }

    pub fn with_max_failed_reads(mut self, max_failed_reads: u32) -> Self {
        self.max_failed_reads = max_failed_reads;
        self
    }
}

#[async_trait]
impl<C: Consumer> NonSqlAnswerRepo for KafkaAsRepo<C> {
    async fn get_non_sql_answers(&self, request: GetNonSqlAnswersRequest) -> Result<AnswerPage> {
        let mut page = AnswerPage::default();
        let mut remaining = request.page_size;
        let mut failed_reads = 0u32;

        let budget = self
            .answer_timeout
            .saturating_mul(u32::try_from(request.page_size).unwrap_or(u32::MAX));
        let deadline = Instant::now().checked_add(budget);

        while remaining > 0 {
            let read_timeout = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        tracing::debug!(collected = page.answers.len(), "Answer page budget spent");
                        page.partial = true;
                        break;
                    }
                    self.answer_timeout.min(left)
                }
                None => self.answer_timeout,
            };

            let message = match self.consumer.consume(read_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::debug!(
                        collected = page.answers.len(),
                        "No more non-SQL answers within timeout"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error consuming non-SQL answer");
                    failed_reads += 1;
                    if failed_reads > self.max_failed_reads {
                        page.partial = true;
                        break;
                    }
                    continue;
                }
            };

            match serde_json::from_str::<NonSqlAnswer>(&message) {
                Ok(answer) => {
                    page.answers.push(answer);
                    remaining -= 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable non-SQL answer message");
                    page.skipped += 1;
                    failed_reads += 1;
                    if failed_reads > self.max_failed_reads {
                        page.partial = true;
                        break;
                    }
                }
            }
        }

        if page.partial {
            tracing::warn!(
                collected = page.answers.len(),
                failed_reads,
                "Answer page ended before it was drained"
            );
        }
        Ok(page)
    }
}
