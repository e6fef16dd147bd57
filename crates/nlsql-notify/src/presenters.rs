//! Built-in presenters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use nlsql_core::{NonSqlAnswer, NonSqlPresenter, Result};

/// Emits one structured log line per answer.
#[derive(Debug, Default)]
pub struct LogPresenter;

#[async_trait]
impl NonSqlPresenter for LogPresenter {
    fn name(&self) -> &str {
        "log"
    }

    async fn present(&self, answers: &[NonSqlAnswer]) -> Result<()> {
        for answer in answers {
            tracing::info!(
                session_id = %answer.session_id,
                db_id = %answer.db_id,
                question = %answer.question,
                answer = %answer.answer,
                "Non-SQL answer"
            );
        }
        Ok(())
    }
}

/// Appends each answer as one JSON line to a file, creating it (and its
/// parent directories) on first use.
#[derive(Debug)]
pub struct JsonLinesPresenter {
    path: PathBuf,
}

impl JsonLinesPresenter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NonSqlPresenter for JsonLinesPresenter {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn present(&self, answers: &[NonSqlAnswer]) -> Result<()> {
        if answers.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for answer in answers {
            buf.push_str(&serde_json::to_string(answer)?);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(path = %self.path.display(), count = answers.len(), "Answers appended");
        Ok(())
    }
}
