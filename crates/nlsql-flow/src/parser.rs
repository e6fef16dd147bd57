//! Structured-output detection in free-text LLM replies.
//!
//! The LLM signals tool calls and newly evaluated master dimension values by
//! emitting fixed textual signatures. [`ReplyParser`] is the seam the query
//! flow reads them through; [`SignatureParser`] implements the line-based
//! signatures with regexes.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// A request from the LLM to invoke an external tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Valid values of one categorical dimension, as evaluated by the LLM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterValueUpdate {
    pub dimension: String,
    pub values: String,
}

/// Extracts structured requests from a reply. A reply without a recognized
/// signature yields nothing; that is never an error.
pub trait ReplyParser: Send + Sync {
    fn tool_call(&self, reply: &str) -> Option<ToolCall>;
    fn master_values(&self, reply: &str) -> Vec<MasterValueUpdate>;
    /// The reply with every recognized signature removed, trimmed.
    fn strip_signatures(&self, reply: &str) -> String;
}

// =============================================================================
// Compiled signatures (compiled once, reused across calls)
// =============================================================================

static TOOL_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"- Tool name:(.*)\r?\n- Tool input:(.*)").expect("Invalid tool-call regex")
});

static MASTER_VALUES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"- Master dimension values evaluated\.?\s*\r?\n- Dimension:=(.*)\r?\n- Values:=(.*)")
        .expect("Invalid master-values regex")
});

// =============================================================================
// SignatureParser
// =============================================================================

/// Line-signature parser:
///
/// ```text
/// - Tool name: count_by_named_division
/// - Tool input: {"division_name": "Mumbai"}
///
/// - Master dimension values evaluated.
/// - Dimension:= region
/// - Values:= North,South
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureParser;

impl ReplyParser for SignatureParser {
    /// The first tool-call signature in the reply, if its input is a JSON object.
    fn tool_call(&self, reply: &str) -> Option<ToolCall> {
        let caps = TOOL_CALL_RE.captures(reply)?;
        let name = caps.get(1)?.as_str().trim();
        let input = caps.get(2)?.as_str().trim();
        if name.is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(input) {
            Ok(Value::Object(args)) => Some(ToolCall {
                name: name.to_string(),
                args,
            }),
            Ok(other) => {
                tracing::warn!(tool = %name, input = %other, "Tool input is not a JSON object, ignoring");
                None
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool input is not valid JSON, ignoring");
                None
            }
        }
    }

    fn master_values(&self, reply: &str) -> Vec<MasterValueUpdate> {
        MASTER_VALUES_RE
            .captures_iter(reply)
            .filter_map(|caps| {
                let dimension = caps.get(1)?.as_str().trim();
                let values = caps.get(2)?.as_str().trim();
                if dimension.is_empty() {
                    return None;
                }
                Some(MasterValueUpdate {
                    dimension: dimension.to_string(),
                    values: values.to_string(),
                })
            })
            .collect()
    }

    fn strip_signatures(&self, reply: &str) -> String {
        let without_tools = TOOL_CALL_RE.replace_all(reply, "");
        MASTER_VALUES_RE
            .replace_all(&without_tools, "")
            .trim()
            .to_string()
    }
}
