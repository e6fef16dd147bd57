//! Decides whether a final answer is an executable SQL query.

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// True when `answer`, once unwrapped from an optional Markdown code fence,
/// parses as SQL and its first statement is a query.
pub fn is_sql_answer(answer: &str) -> bool {
    let sql = strip_code_fence(answer);
    if sql.is_empty() {
        return false;
    }
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => matches!(statements.first(), Some(Statement::Query(_))),
        Err(_) => false,
    }
}

/// Remove a surrounding ```` ``` ```` / ```` ```sql ```` fence, if present.
pub fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "sql") on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
