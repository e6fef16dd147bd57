//! Query orchestrator: grounds each question in cached database context,
//! drives the LLM through the tool-call loop and maintains the session caches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use nlsql_core::config::QueryFlowConfig;
use nlsql_core::{
    ExternalTool, FlowError, Llm, MasterValues, MetadataStore, NonSqlAnswer, QueryFlowListener,
    Result, SessionStore, ToolRepository,
};

use crate::parser::{ReplyParser, SignatureParser, ToolCall};
use crate::prompt::{
    current_month, render_db_context, render_master_values, render_tools, PromptInputs,
    PromptTemplate, NONE_TEXT,
};
use crate::session::{last_qa_key, master_values_key, metadata_key, KeyedLocks};
use crate::sql::is_sql_answer;

/// Cue appended after a tool's output before asking the LLM to continue.
const PROCEED_CUE: &str = "Proceed.";

/// Run `fut` under `limit`, mapping an elapsed deadline to [`FlowError::Timeout`].
async fn with_deadline<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FlowError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// What one successful `query` produced.
struct QueryOutcome {
    /// The last LLM reply, untrimmed.
    final_reply: String,
    /// Rendered prompt, every reply and every tool output, in order.
    thoughts: Vec<String>,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`QueryFlow`] from its collaborators.
pub struct QueryFlowBuilder {
    metadata: Arc<dyn MetadataStore>,
    llm: Arc<dyn Llm>,
    sessions: Arc<dyn SessionStore>,
    tools: Option<Arc<dyn ToolRepository>>,
    parser: Box<dyn ReplyParser>,
    listeners: Vec<Arc<dyn QueryFlowListener>>,
    config: QueryFlowConfig,
}

impl QueryFlowBuilder {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        llm: Arc<dyn Llm>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            metadata,
            llm,
            sessions,
            tools: None,
            parser: Box::new(SignatureParser),
            listeners: Vec::new(),
            config: QueryFlowConfig::default(),
        }
    }

    pub fn tools(mut self, tools: Arc<dyn ToolRepository>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn parser(mut self, parser: Box<dyn ReplyParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn QueryFlowListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(mut self, config: QueryFlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the prompt template and, when tool calling is enabled, fetch
    /// the tool catalog once. Either failure aborts the build.
    pub async fn build(self) -> Result<QueryFlow> {
        let template = PromptTemplate::new(self.config.resolve_prompt_template()?);
        let enabled = self.config.tool_calling_enabled;

        let catalog = match (&self.tools, enabled) {
            (Some(repo), true) => {
                let tools = with_deadline(
                    "tool listing",
                    self.config.tool_timeout(),
                    repo.fetch_tools(),
                )
                .await?;
                tracing::info!(count = tools.len(), "Fetched external tools");
                tools
            }
            _ => Vec::new(),
        };

        let tools_text = if enabled {
            render_tools(&catalog)
        } else {
            None
        }
        .unwrap_or_else(|| self.config.no_tools_text.clone());

        Ok(QueryFlow {
            metadata: self.metadata,
            llm: self.llm,
            sessions: self.sessions,
            tools: self.tools.filter(|_| enabled),
            catalog,
            tools_text,
            parser: self.parser,
            listeners: self.listeners,
            template,
            config: self.config,
            session_locks: KeyedLocks::new(),
            cache_locks: KeyedLocks::new(),
        })
    }
}

// =============================================================================
// QueryFlow
// =============================================================================

/// Conversational NL-to-SQL orchestrator.
///
/// Each session caches the rendered database context and its last question
/// and answer in the [`SessionStore`]; master dimension values are cached per
/// database and shared by every session. Calls on the same session are
/// serialized within the process.
pub struct QueryFlow {
    metadata: Arc<dyn MetadataStore>,
    llm: Arc<dyn Llm>,
    sessions: Arc<dyn SessionStore>,
    tools: Option<Arc<dyn ToolRepository>>,
    catalog: Vec<ExternalTool>,
    tools_text: String,
    parser: Box<dyn ReplyParser>,
    listeners: Vec<Arc<dyn QueryFlowListener>>,
    template: PromptTemplate,
    config: QueryFlowConfig,
    session_locks: KeyedLocks,
    cache_locks: KeyedLocks,
}

impl QueryFlow {
    pub fn builder(
        metadata: Arc<dyn MetadataStore>,
        llm: Arc<dyn Llm>,
        sessions: Arc<dyn SessionStore>,
    ) -> QueryFlowBuilder {
        QueryFlowBuilder::new(metadata, llm, sessions)
    }

    /// Tools fetched at build time.
    pub fn tools(&self) -> &[ExternalTool] {
        &self.catalog
    }

    /// A fresh random session token (32 hex characters). Touches no storage.
    pub fn start_session(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Forget everything cached for the session.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.clear_session(session_id).await?;
        tracing::info!(session_id = %session_id, "Session stopped");
        Ok(())
    }

    /// Drop the session's caches so the next query rebuilds its context.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        self.clear_session(session_id).await?;
        tracing::info!(session_id = %session_id, "Session reset");
        Ok(())
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.session_locks.lock(session_id).await?;
        self.store_delete(&last_qa_key(session_id)).await?;
        self.store_delete(&metadata_key(session_id)).await
    }

    /// Answer `question` against database `db_id` within a session.
    ///
    /// Returns the trimmed final reply, or with `with_thoughts` the rendered
    /// prompt followed by every reply and tool output. Collaborator failures
    /// are returned unchanged. Listeners hear about failures and about final
    /// replies that are not SQL.
    pub async fn query(
        &self,
        db_id: &str,
        session_id: &str,
        question: &str,
        is_pii_allowed: bool,
        with_thoughts: bool,
    ) -> Result<String> {
        tracing::info!(session_id = %session_id, db_id = %db_id, "Handling query");

        match self.run_query(db_id, session_id, question, is_pii_allowed).await {
            Ok(outcome) => {
                let answer = outcome.final_reply.trim();
                if !is_sql_answer(&self.parser.strip_signatures(answer)) {
                    tracing::info!(session_id = %session_id, "Final answer is not SQL");
                    self.notify_no_sql(NonSqlAnswer {
                        session_id: session_id.to_string(),
                        db_id: db_id.to_string(),
                        question: question.to_string(),
                        answer: answer.to_string(),
                    });
                }
                if with_thoughts {
                    Ok(outcome.thoughts.join("\n\n").trim().to_string())
                } else {
                    Ok(answer.to_string())
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    db_id = %db_id,
                    code = e.code(),
                    error = %e,
                    "Query failed"
                );
                self.notify_failure(session_id, db_id, question, &e);
                Err(e)
            }
        }
    }

    async fn run_query(
        &self,
        db_id: &str,
        session_id: &str,
        question: &str,
        is_pii_allowed: bool,
    ) -> Result<QueryOutcome> {
        let _guard = self.session_locks.lock(session_id).await?;

        // Database context: cached per session, built on first use
        let cached_context = self.store_get(&metadata_key(session_id)).await?;
        let (db_context, freshly_built) = if cached_context.is_empty() {
            tracing::info!(session_id = %session_id, db_id = %db_id, "No cached context, fetching metadata");
            let db = with_deadline(
                "metadata store",
                self.config.store_timeout(),
                self.metadata.get_db(db_id, true, true, true, true),
            )
            .await?;
            (render_db_context(&db), true)
        } else {
            (cached_context, false)
        };

        let master_values = self
            .load_master_values(db_id)
            .await
            .and_then(|values| render_master_values(&values))
            .unwrap_or_else(|| NONE_TEXT.to_string());

        let last_qa = self.store_get(&last_qa_key(session_id)).await?;
        let last_qa = if last_qa.is_empty() {
            NONE_TEXT.to_string()
        } else {
            last_qa
        };

        let this_month = current_month();
        let pii_policy = if is_pii_allowed {
            &self.config.pii_allowed_text
        } else {
            &self.config.pii_forbidden_text
        };
        let prompt = self.template.render(&PromptInputs {
            db_metadata: &db_context,
            last_qa: &last_qa,
            question,
            master_values: &master_values,
            this_month: &this_month,
            tools: &self.tools_text,
            pii_policy,
        });
        tracing::debug!(session_id = %session_id, chars = prompt.len(), "Prompt rendered");

        let mut conversation = prompt.clone();
        let mut thoughts = vec![prompt];

        let mut reply = self.ask_llm(&conversation).await?;
        self.merge_master_values(db_id, &reply).await;

        let mut iterations: u32 = 0;
        while let Some(call) = self.next_tool_call(&reply) {
            if let Some(limit) = self.config.max_tool_iterations {
                if iterations >= limit {
                    return Err(FlowError::ToolLoopExceeded { limit });
                }
            }
            iterations += 1;

            let output = self.invoke_tool(session_id, call).await?;
            let tool_text = format!("Tool output: {}", output);
            conversation.push_str(&format!("\n\n{}\n\n{}\n\n{}\n\n", reply, tool_text, PROCEED_CUE));
            thoughts.push(std::mem::take(&mut reply));
            thoughts.push(tool_text);

            reply = self.ask_llm(&conversation).await?;
            self.merge_master_values(db_id, &reply).await;
        }
        thoughts.push(reply.clone());

        if freshly_built {
            self.store_put(&metadata_key(session_id), &db_context).await?;
        }
        self.store_put(
            &last_qa_key(session_id),
            &format!("{}\n\n{}\n\n", question, reply),
        )
        .await?;

        Ok(QueryOutcome {
            final_reply: reply,
            thoughts,
        })
    }

    /// The reply's tool call, if tool calling is on and it names a fetched tool.
    fn next_tool_call(&self, reply: &str) -> Option<ToolCall> {
        self.tools.as_ref()?;
        let call = self.parser.tool_call(reply)?;
        if !self.catalog.iter().any(|tool| tool.name == call.name) {
            tracing::warn!(tool = %call.name, "Reply names an unregistered tool, treating it as final");
            return None;
        }
        Some(call)
    }

    async fn ask_llm(&self, conversation: &str) -> Result<String> {
        with_deadline(
            "LLM reply",
            self.config.llm_timeout(),
            self.llm.generate_reply(conversation),
        )
        .await
    }

    /// Invoke a requested tool and return its output as compact JSON.
    async fn invoke_tool(&self, session_id: &str, call: ToolCall) -> Result<String> {
        let Some(repo) = &self.tools else {
            return Err(FlowError::Internal("tool calling is disabled".to_string()));
        };
        tracing::info!(session_id = %session_id, tool = %call.name, "Invoking tool");
        let output = with_deadline(
            "tool invocation",
            self.config.tool_timeout(),
            repo.invoke_tool(&call.name, call.args),
        )
        .await?;
        Ok(serde_json::to_string(&output)?)
    }

    // =========================================================================
    // Master dimension values
    // =========================================================================

    /// Read the database's master-value cache. Any failure is logged and
    /// treated as an empty cache.
    async fn load_master_values(&self, db_id: &str) -> Option<MasterValues> {
        let raw = match self.store_get(&master_values_key(db_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(db_id = %db_id, error = %e, "Could not read master dimension values, continuing");
                return None;
            }
        };
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<MasterValues>(&raw) {
            Ok(values) => Some(values),
            Err(e) => {
                tracing::warn!(db_id = %db_id, error = %e, "Could not parse master dimension values, continuing");
                None
            }
        }
    }

    /// Merge every master-value block of `reply` into the database's cache.
    /// Failures are logged and never affect the query.
    async fn merge_master_values(&self, db_id: &str, reply: &str) {
        let updates = self.parser.master_values(reply);
        if updates.is_empty() {
            return;
        }

        let key = master_values_key(db_id);
        let _guard = match self.cache_locks.lock(&key).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(db_id = %db_id, error = %e, "Could not lock master dimension values, skipping");
                return;
            }
        };

        let mut values = self.load_master_values(db_id).await.unwrap_or_default();
        for update in updates {
            tracing::info!(db_id = %db_id, dimension = %update.dimension, "Detected master dimension values");
            values.insert(update.dimension, update.values);
        }

        let saved = match serde_json::to_string(&values) {
            Ok(json) => self.store_put(&key, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = saved {
            tracing::warn!(db_id = %db_id, error = %e, "Could not save master dimension values, continuing");
        }
    }

    // =========================================================================
    // Session store access
    // =========================================================================

    async fn store_get(&self, key: &str) -> Result<String> {
        with_deadline(
            "session store read",
            self.config.store_timeout(),
            self.sessions.get_session_data(key),
        )
        .await
    }

    async fn store_put(&self, key: &str, value: &str) -> Result<()> {
        with_deadline(
            "session store write",
            self.config.store_timeout(),
            self.sessions.update_session_data(key, value),
        )
        .await
    }

    async fn store_delete(&self, key: &str) -> Result<()> {
        with_deadline(
            "session store delete",
            self.config.store_timeout(),
            self.sessions.delete_session_data(key),
        )
        .await
    }

    // =========================================================================
    // Listener notification (fire-and-forget)
    // =========================================================================

    fn notify_failure(&self, session_id: &str, db_id: &str, question: &str, failure: &FlowError) {
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let session_id = session_id.to_string();
            let db_id = db_id.to_string();
            let question = question.to_string();
            let failure = failure.clone();
            tokio::spawn(async move {
                listener
                    .on_fail(&session_id, &db_id, &question, &failure)
                    .await;
            });
        }
    }

    fn notify_no_sql(&self, answer: NonSqlAnswer) {
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let answer = answer.clone();
            tokio::spawn(async move {
                listener.on_no_sql(&answer).await;
            });
        }
    }
}
