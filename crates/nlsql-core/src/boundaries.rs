//! Capability seams between the flows and their external collaborators.
//!
//! Every collaborator is an async trait object injected at construction
//! time. Implementations report failures as [`FlowError::Upstream`] so that
//! the flows can propagate their code and message unchanged.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};
use crate::types::{
    AnswerPage, DbMetadata, ExternalTool, GetNonSqlAnswersRequest, NonSqlAnswer, NotifyReport,
};

/// Read access to database metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_db(
        &self,
        db_id: &str,
        with_tables: bool,
        with_fields: bool,
        with_kpis: bool,
        with_additional_info: bool,
    ) -> Result<DbMetadata>;
}

#[async_trait]
pub trait Llm: Send + Sync {
    /// Produce a reply for the full conversation text.
    async fn generate_reply(&self, context: &str) -> Result<String>;
}

/// String key-value store used for per-session and per-database caches.
///
/// `get_session_data` returns an empty string for keys that were never set.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session_data(&self, key: &str) -> Result<String>;
    async fn update_session_data(&self, key: &str, value: &str) -> Result<()>;
    async fn delete_session_data(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait ToolRepository: Send + Sync {
    async fn fetch_tools(&self) -> Result<Vec<ExternalTool>>;
    async fn invoke_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value>;
}

/// Pull-style source of pending non-SQL answers.
#[async_trait]
pub trait NonSqlAnswerRepo: Send + Sync {
    async fn get_non_sql_answers(&self, request: GetNonSqlAnswersRequest) -> Result<AnswerPage>;
}

/// A sink that makes non-SQL answers visible to someone.
#[async_trait]
pub trait NonSqlPresenter: Send + Sync {
    /// Short name used in logs and [`crate::PresenterOutcome`]s.
    fn name(&self) -> &str;

    async fn present(&self, answers: &[NonSqlAnswer]) -> Result<()>;
}

/// Observer of query outcomes. Calls are fire-and-forget.
#[async_trait]
pub trait QueryFlowListener: Send + Sync {
    async fn on_fail(&self, session_id: &str, db_id: &str, question: &str, failure: &FlowError);
    async fn on_no_sql(&self, answer: &NonSqlAnswer);
}

/// Anything that can run one fetch-and-notify cycle.
#[async_trait]
pub trait NotifyFlow: Send + Sync {
    async fn fetch_and_notify(&self) -> NotifyReport;
}
