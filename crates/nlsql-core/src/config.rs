use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FlowError, Result};

/// Prompt used when neither an inline template nor a template file is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are an expert SQL analyst. Answer the question below with a single SQL query \
that runs against the database described here. If the question cannot be answered \
with SQL, reply in plain text instead. The current month is {this_month}.

{pii_policy}

Here are the details of the database you will be querying.

{db_metadata}

Previously cached master dimension values you can use instead of querying again:
{master_values}

External tools you may call:
{tools}

To call a tool, reply with exactly these two lines and nothing else:
- Tool name: <tool name>
- Tool input: <arguments as a single-line JSON object>

When you have evaluated the valid values of a dimension, include these lines in your reply:
- Master dimension values evaluated.
- Dimension:= <dimension name>
- Values:= <comma separated values>

Here is the last question and its answer:
{last_qa}

We are now trying to answer the following question:
{question}
";

/// Top-level configuration for the nlsql services.
///
/// Loaded from `~/.nlsql/config.toml` by default. Every section falls back to
/// its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NlsqlConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub query_flow: QueryFlowConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
}

impl NlsqlConfig {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: NlsqlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_toml(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a TOML file. A missing file quietly yields the
    /// defaults; an unreadable or invalid one is reported and then ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring configuration file, using defaults");
            Self::default()
        })
    }

    /// Write the configuration as TOML, creating missing parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)?;
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Topics must be named, and the trigger topic must differ from the answer
    /// topics or triggers would be read back as answers.
    pub fn validate(&self) -> Result<()> {
        let topics = [
            ("trigger_topic", &self.pubsub.trigger_topic),
            ("non_sql_topic", &self.pubsub.non_sql_topic),
            ("failure_topic", &self.pubsub.failure_topic),
        ];
        if let Some((name, _)) = topics.iter().find(|(_, topic)| topic.trim().is_empty()) {
            return Err(FlowError::Config(format!("pubsub.{} must not be empty", name)));
        }
        if self.pubsub.trigger_topic == self.pubsub.non_sql_topic
            || self.pubsub.trigger_topic == self.pubsub.failure_topic
        {
            return Err(FlowError::Config(
                "pubsub.trigger_topic must differ from the answer and failure topics".to_string(),
            ));
        }
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Query orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFlowConfig {
    /// Inline prompt template with `{placeholder}` slots.
    pub prompt_template: String,
    /// Template file; takes precedence over `prompt_template` when set.
    pub prompt_template_path: Option<String>,
    /// Whether the LLM may request external tool invocations.
    pub tool_calling_enabled: bool,
    /// Upper bound on tool invocations per query. Unbounded when unset.
    pub max_tool_iterations: Option<u32>,
    /// Deadline for a single LLM reply.
    pub llm_timeout_secs: u64,
    /// Deadline for a single tool invocation or tool listing.
    pub tool_timeout_secs: u64,
    /// Deadline for a single metadata or session store call.
    pub store_timeout_secs: u64,
    /// Substituted for `{pii_policy}` when the caller allows PII.
    pub pii_allowed_text: String,
    /// Substituted for `{pii_policy}` when the caller does not allow PII.
    pub pii_forbidden_text: String,
    /// Substituted for `{tools}` when no tool can be called.
    pub no_tools_text: String,
}

impl Default for QueryFlowConfig {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            prompt_template_path: None,
            tool_calling_enabled: true,
            max_tool_iterations: None,
            llm_timeout_secs: 120,
            tool_timeout_secs: 30,
            store_timeout_secs: 10,
            pii_allowed_text: "Personally identifiable fields may be selected in the query."
                .to_string(),
            pii_forbidden_text:
                "Never select personally identifiable fields such as names, phone numbers, \
                 email addresses or identity numbers."
                    .to_string(),
            no_tools_text: "No tools are available.".to_string(),
        }
    }
}

impl QueryFlowConfig {
    /// The effective prompt template: the file contents when a path is set,
    /// the inline template otherwise.
    pub fn resolve_prompt_template(&self) -> Result<String> {
        match &self.prompt_template_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                FlowError::Config(format!("cannot read prompt template {}: {}", path, e))
            }),
            None => Ok(self.prompt_template.clone()),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Non-SQL notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Maximum answers fetched per notification cycle.
    pub max_items: usize,
    /// File the JSON-lines presenter appends to. Presenter disabled when unset.
    pub jsonl_path: Option<String>,
    /// Seconds between triggers the `notify` service publishes itself.
    /// Zero leaves triggering to external publishers.
    pub trigger_every_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            jsonl_path: None,
            trigger_every_secs: 60,
        }
    }
}

impl NotifyConfig {
    /// Interval of self-published triggers, if enabled.
    pub fn trigger_every(&self) -> Option<Duration> {
        (self.trigger_every_secs > 0).then(|| Duration::from_secs(self.trigger_every_secs))
    }
}

/// Stream-backed answer repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Consumer group the repository reads the answers topic with.
    pub consumer_name: String,
    /// Per-read timeout in milliseconds.
    pub answer_timeout_ms: u64,
    /// Failed or undecodable reads tolerated per page before giving up.
    pub max_failed_reads: u32,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            consumer_name: "non-sql-answer-repo".to_string(),
            answer_timeout_ms: 5_000,
            max_failed_reads: 10,
        }
    }
}

impl RepoConfig {
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }
}

/// Message stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Topic whose messages trigger a notification cycle.
    pub trigger_topic: String,
    /// Topic non-SQL answers are published to.
    pub non_sql_topic: String,
    /// Topic query failures are published to.
    pub failure_topic: String,
    /// Consumer group of the trigger consumer.
    pub trigger_consumer_name: String,
    /// How long one trigger poll waits before checking for shutdown.
    pub poll_interval_ms: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            trigger_topic: "api.v1.non-sql-notify".to_string(),
            non_sql_topic: "api.v1.query-flow.non-sqls".to_string(),
            failure_topic: "api.v1.query-flow.failures".to_string(),
            trigger_consumer_name: "non-sql-notify-trigger-consumer".to_string(),
            poll_interval_ms: 1_000,
        }
    }
}

impl PubSubConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = NlsqlConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(config.query_flow.tool_calling_enabled);
        assert!(config.query_flow.max_tool_iterations.is_none());
        assert_eq!(config.query_flow.llm_timeout_secs, 120);
        assert_eq!(config.notify.max_items, 10);
        assert_eq!(config.repo.consumer_name, "non-sql-answer-repo");
        assert_eq!(config.repo.answer_timeout(), Duration::from_secs(5));
        assert_eq!(config.pubsub.trigger_topic, "api.v1.non-sql-notify");
        assert_eq!(config.pubsub.non_sql_topic, "api.v1.query-flow.non-sqls");
    }

    #[test]
    fn test_default_template_has_every_placeholder() {
        for placeholder in [
            "{db_metadata}",
            "{last_qa}",
            "{question}",
            "{master_values}",
            "{this_month}",
            "{tools}",
            "{pii_policy}",
        ] {
            assert!(
                DEFAULT_PROMPT_TEMPLATE.contains(placeholder),
                "missing {}",
                placeholder
            );
        }
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[query_flow]
tool_calling_enabled = false
max_tool_iterations = 4

[repo]
answer_timeout_ms = 250
"#;
        let file = create_temp_config(content);
        let config = NlsqlConfig::load(file.path()).unwrap();
        assert!(!config.query_flow.tool_calling_enabled);
        assert_eq!(config.query_flow.max_tool_iterations, Some(4));
        assert_eq!(config.repo.answer_timeout(), Duration::from_millis(250));
        // Untouched fields keep their defaults
        assert_eq!(config.repo.max_failed_reads, 10);
        assert_eq!(config.notify.max_items, 10);
        assert_eq!(
            config.query_flow.prompt_template,
            DEFAULT_PROMPT_TEMPLATE.to_string()
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = NlsqlConfig::load_or_default(Path::new("/nonexistent/nlsql.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let err = NlsqlConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = NlsqlConfig::default();
        config.notify.max_items = 25;
        config.query_flow.max_tool_iterations = Some(6);
        config.save(&path).unwrap();

        let reloaded = NlsqlConfig::load(&path).unwrap();
        assert_eq!(reloaded.notify.max_items, 25);
        assert_eq!(reloaded.query_flow.max_tool_iterations, Some(6));
        assert_eq!(reloaded.notify.trigger_every(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_trigger_topic_must_not_collide_with_answers() {
        let content = r#"
[pubsub]
trigger_topic = "api.v1.query-flow.non-sqls"
"#;
        let err = NlsqlConfig::from_toml(content).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));

        let mut config = NlsqlConfig::default();
        config.pubsub.failure_topic = "  ".to_string();
        let dir = tempfile::tempdir().unwrap();
        assert!(config.save(&dir.path().join("config.toml")).is_err());
        assert!(!dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_load_or_default_ignores_invalid_file() {
        let file = create_temp_config("[notify]\nmax_items = \"many\"\n");
        let config = NlsqlConfig::load_or_default(file.path());
        assert_eq!(config.notify.max_items, 10);
    }

    #[test]
    fn test_zero_interval_disables_self_triggering() {
        let config = NlsqlConfig::from_toml("[notify]\ntrigger_every_secs = 0\n").unwrap();
        assert_eq!(config.notify.trigger_every(), None);
    }

    #[test]
    fn test_resolve_prompt_template_prefers_file() {
        let file = create_temp_config("Q: {question}");
        let config = QueryFlowConfig {
            prompt_template_path: Some(file.path().to_string_lossy().to_string()),
            ..QueryFlowConfig::default()
        };
        assert_eq!(config.resolve_prompt_template().unwrap(), "Q: {question}");
    }

    #[test]
    fn test_resolve_prompt_template_missing_file() {
        let config = QueryFlowConfig {
            prompt_template_path: Some("/nonexistent/prompt.txt".to_string()),
            ..QueryFlowConfig::default()
        };
        let err = config.resolve_prompt_template().unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
