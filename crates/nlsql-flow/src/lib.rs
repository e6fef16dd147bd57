//! Conversational NL-to-SQL query flow.
//!
//! [`QueryFlow`] grounds every question in the target database's metadata and
//! the session's history, lets the LLM call external tools, caches master
//! dimension values per database and reports non-SQL answers and failures to
//! its [`nlsql_core::QueryFlowListener`]s.

pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod session;
pub mod sql;

pub use orchestrator::{QueryFlow, QueryFlowBuilder};
pub use parser::{MasterValueUpdate, ReplyParser, SignatureParser, ToolCall};
pub use prompt::{PromptInputs, PromptTemplate};
pub use session::{KeyedLocks, MemorySessionStore};
pub use sql::is_sql_answer;
