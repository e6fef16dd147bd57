//! Prompt assembly: database context rendering and template filling.

use chrono::Local;

use nlsql_core::{DbMetadata, ExternalTool, MasterValues};

/// Text substituted for slots that have nothing to show.
pub const NONE_TEXT: &str = "None";

/// Month label in the `"%b %Y"` form, e.g. `"Oct 2026"`.
pub fn current_month() -> String {
    Local::now().format("%b %Y").to_string()
}

/// Render a database description as the tab-indented block the LLM reads.
pub fn render_db_context(db: &DbMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("Database name: {}\n", db.name));
    if !db.description.is_empty() {
        out.push_str(&format!("Database description: {}\n", db.description));
    }

    for table in &db.tables {
        out.push_str(&format!("\tTable name: {}\n", table.name));
        out.push_str(&format!("\tTable description: {}\n", table.description));
        for field in &table.fields {
            out.push_str(&format!(
                "\t\tField name: {}, type: {}\n",
                field.name, field.field_type
            ));
            if !field.description.is_empty() {
                out.push_str(&format!("\t\tField description: {}\n", field.description));
            }
            if !field.aka.is_empty() {
                out.push_str(&format!(
                    "\t\tOther names for field '{}': {}\n",
                    field.name, field.aka
                ));
            }
        }
    }

    if !db.kpis.is_empty() {
        out.push_str("KPIs:\n");
        for kpi in &db.kpis {
            out.push_str(&format!("\tKPI name: {}\n", kpi.name));
            out.push_str(&format!("\tKPI other names: {}\n", kpi.aka));
            out.push_str(&format!("\tKPI description: {}\n", kpi.description));
            out.push_str(&format!("\tKPI formula: {}\n", kpi.formula));
        }
    }

    if !db.additional_info.is_empty() {
        out.push_str("Also keep in mind the following additional points.\n");
        out.push_str(&db.additional_info);
        out.push('\n');
    }
    out
}

/// Describe the callable tools, one block per tool. `None` when there are none.
pub fn render_tools(tools: &[ExternalTool]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut out = String::new();
    for tool in tools {
        out.push_str(&format!("Tool name: {}\n", tool.name));
        out.push_str(&format!("Tool description: {}\n", tool.description));
        if tool.parameters.is_empty() {
            out.push_str("\tNo parameters\n");
        }
        for param in &tool.parameters {
            out.push_str(&format!(
                "\tParameter: {} ({}{}): {}\n",
                param.name,
                param.param_type,
                if param.required { ", required" } else { "" },
                param.description
            ));
        }
        out.push('\n');
    }
    Some(out.trim_end().to_string())
}

/// Pretty JSON for a non-empty cache, `None` otherwise.
pub fn render_master_values(values: &MasterValues) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    serde_json::to_string_pretty(values).ok()
}

// =============================================================================
// PromptTemplate
// =============================================================================

/// Values for every placeholder a template may contain.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub db_metadata: &'a str,
    pub last_qa: &'a str,
    pub question: &'a str,
    pub master_values: &'a str,
    pub this_month: &'a str,
    pub tools: &'a str,
    pub pii_policy: &'a str,
}

impl PromptInputs<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "db_metadata" => Some(self.db_metadata),
            "last_qa" => Some(self.last_qa),
            "question" => Some(self.question),
            "master_values" => Some(self.master_values),
            "this_month" => Some(self.this_month),
            "tools" => Some(self.tools),
            "pii_policy" => Some(self.pii_policy),
            _ => None,
        }
    }
}

/// A prompt with `{name}` slots.
///
/// Filling is a single left-to-right pass: substituted text is never
/// rescanned, and braces that do not name a known slot are kept verbatim.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, inputs: &PromptInputs<'_>) -> String {
        let mut out = String::with_capacity(self.template.len() + inputs.db_metadata.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let slot = after
                .find('}')
                .and_then(|close| inputs.lookup(&after[..close]).map(|v| (close, v)));
            match slot {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
