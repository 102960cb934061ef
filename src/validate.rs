//! Structural sanity checks for generated SQL.
//!
//! The checker never looks at table or column names. It only answers three
//! questions about the text: does it start with an allowed statement keyword,
//! does it end with a semicolon, and do the parenthesis counts match.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Reported when the statement does not open with an allowed keyword.
pub const START_KEYWORD_ERROR: &str =
    "La consulta debe comenzar con SELECT, INSERT, UPDATE, DELETE o WITH";

/// Reported when the trimmed statement does not end with `;`.
pub const TERMINATOR_ERROR: &str = "La consulta debe terminar con punto y coma (;)";

/// Reported when `(` and `)` counts differ.
pub const PARENTHESES_ERROR: &str = "Los paréntesis no están balanceados";

static SQL_KEYWORD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:SELECT|INSERT|UPDATE|DELETE|WITH)").expect("keyword regex is valid")
});

/// Whether `text`, after leading whitespace, starts with one of the allowed
/// statement keywords. Matching is case-insensitive on the keyword only.
pub(crate) fn starts_with_sql_keyword(text: &str) -> bool {
    SQL_KEYWORD_PREFIX.is_match(text.trim_start())
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// One message per failed check, in check order.
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Render the errors as SQL line comments, one per line.
    ///
    /// Returns an empty string for a valid result.
    pub fn as_sql_comment(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("-- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run the structural checks against `sql`.
///
/// Check order (and therefore message order) is fixed: start keyword,
/// terminator, parenthesis balance. The balance check compares raw counts,
/// so `")("` passes.
pub fn validate(sql: &str) -> ValidationResult {
    let trimmed = sql.trim();
    let mut errors = Vec::new();

    if !starts_with_sql_keyword(trimmed) {
        errors.push(START_KEYWORD_ERROR.to_string());
    }

    if !trimmed.ends_with(';') {
        errors.push(TERMINATOR_ERROR.to_string());
    }

    let open = sql.matches('(').count();
    let close = sql.matches(')').count();
    if open != close {
        errors.push(PARENTHESES_ERROR.to_string());
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
    }
}
