//! Shared domain types for the nlsql crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

// =============================================================================
// Database metadata
// =============================================================================

/// A column of a table as described to the LLM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: String,
    /// Other names users call this field by.
    pub aka: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub description: String,
    pub fields: Vec<Field>,
}

/// A business KPI with the formula the LLM should use for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Kpi {
    pub id: String,
    pub name: String,
    pub aka: String,
    pub description: String,
    pub formula: String,
}

/// Snapshot of a database's metadata as returned by a [`crate::MetadataStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tables: Vec<Table>,
    pub kpis: Vec<Kpi>,
    pub additional_info: String,
}

/// Dimension name to comma-joined list of known values, cached per database.
pub type MasterValues = BTreeMap<String, String>;

// =============================================================================
// External tools
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// A read-only tool the LLM may ask the flow to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

// =============================================================================
// Events
// =============================================================================

/// A final reply that did not turn out to be a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonSqlAnswer {
    pub session_id: String,
    pub db_id: String,
    pub question: String,
    pub answer: String,
}

/// Advisory record of a failed `query` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub session_id: String,
    pub db_id: String,
    pub question: String,
    pub response: Response<()>,
}

impl QueryFailure {
    pub fn new(session_id: &str, db_id: &str, question: &str, failure: &FlowError) -> Self {
        Self {
            session_id: session_id.to_string(),
            db_id: db_id.to_string(),
            question: question.to_string(),
            response: Response::fail(failure.to_string(), failure.code()),
        }
    }
}

// =============================================================================
// Response envelope
// =============================================================================

/// Wire envelope `{is_success, code, message, payload}` used by event payloads
/// and transport adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response<T> {
    pub is_success: bool,
    pub code: u16,
    pub message: String,
    pub payload: Option<T>,
}

impl<T> Response<T> {
    pub fn fail(message: impl Into<String>, code: u16) -> Self {
        Self {
            is_success: false,
            code,
            message: message.into(),
            payload: None,
        }
    }
}

// =============================================================================
// Non-SQL answer repository
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetNonSqlAnswersRequest {
    pub page_size: usize,
}

/// A batch of answers pulled from a repository.
///
/// `partial` is set when the repository gave up early because of repeated
/// read or decode failures rather than because the backlog was drained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPage {
    pub answers: Vec<NonSqlAnswer>,
    pub skipped: usize,
    pub partial: bool,
}

impl AnswerPage {
    pub fn complete(answers: Vec<NonSqlAnswer>) -> Self {
        Self {
            answers,
            skipped: 0,
            partial: false,
        }
    }
}

// =============================================================================
// Notification outcomes
// =============================================================================

/// Result of handing one batch to one presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenterOutcome {
    pub presenter: String,
    pub result: std::result::Result<(), FlowError>,
}

/// Summary of a single `fetch_and_notify` cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub fetched: usize,
    /// Set when the repository failed and no presenter was invoked.
    pub repo_error: Option<FlowError>,
    pub outcomes: Vec<PresenterOutcome>,
}

impl NotifyReport {
    pub fn repo_failed(err: FlowError) -> Self {
        Self {
            fetched: 0,
            repo_error: Some(err),
            outcomes: Vec::new(),
        }
    }

    pub fn failed_presenters(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// True when the batch was fetched and every presenter succeeded.
    pub fn is_complete(&self) -> bool {
        self.repo_error.is_none() && self.failed_presenters() == 0
    }

    /// True when the batch was fetched but some presenters failed.
    pub fn is_partial(&self) -> bool {
        self.repo_error.is_none() && self.failed_presenters() > 0
    }
}
