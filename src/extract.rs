//! Heuristic recovery of SQL, explanation and optimization hint from a
//! free-text LLM reply.
//!
//! Used when the model did not answer with the structured JSON object, or
//! when the service runs in markdown mode. Each field is recovered by an
//! ordered list of rules; the first rule that matches wins and a fixed
//! placeholder covers the case where none do. Extraction never fails.

use serde::Serialize;

use crate::validate::starts_with_sql_keyword;

/// Returned as `sql` when no statement can be recovered.
pub const SQL_PLACEHOLDER: &str = "-- ERROR: No se pudo generar una consulta SQL";

/// Returned as `explanation` when the section is missing or empty.
pub const EXPLANATION_PLACEHOLDER: &str = "No se pudo extraer una explicación de la respuesta.";

/// Returned as `optimization` when the section is missing or empty.
pub const OPTIMIZATION_PLACEHOLDER: &str =
    "Considera crear índices en las columnas utilizadas en las cláusulas WHERE y JOIN.";

/// Heading that introduces the explanation section.
pub const EXPLANATION_MARKER: &str = "**Explicación:**";

/// Heading that introduces the optimization section.
pub const OPTIMIZATION_MARKER: &str = "**Optimización:**";

const SQL_FENCE_OPEN: &str = "```sql";
const FENCE_CLOSE: &str = "```";
const BOLD_DELIMITER: &str = "**";

/// A single extraction attempt over the raw reply.
type Rule = fn(&str) -> Option<String>;

/// SQL rules in priority order.
const SQL_RULES: &[Rule] = &[fenced_sql_block, keyword_lines];

/// Fields recovered from an LLM reply. Every field is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub sql: String,
    pub explanation: String,
    pub optimization: String,
}

/// Recover the SQL / explanation / optimization triple from `raw_text`.
pub fn extract(raw_text: &str) -> ExtractionResult {
    let sql = SQL_RULES
        .iter()
        .find_map(|rule| rule(raw_text))
        .unwrap_or_else(|| SQL_PLACEHOLDER.to_string());

    let explanation = marked_section(raw_text, EXPLANATION_MARKER)
        .unwrap_or_else(|| EXPLANATION_PLACEHOLDER.to_string());

    let optimization = marked_section(raw_text, OPTIMIZATION_MARKER)
        .unwrap_or_else(|| OPTIMIZATION_PLACEHOLDER.to_string());

    ExtractionResult {
        sql,
        explanation,
        optimization,
    }
}

/// Interior of the first `` ```sql `` fence, trimmed.
///
/// The closing fence is searched after the end of the opening marker; an
/// unterminated fence or an empty interior is not a match.
fn fenced_sql_block(text: &str) -> Option<String> {
    let start = text.find(SQL_FENCE_OPEN)? + SQL_FENCE_OPEN.len();
    let len = text[start..].find(FENCE_CLOSE)?;
    let body = text[start..start + len].trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Every line that opens with a statement keyword, joined by newlines.
///
/// CRLF endings are normalized to `\n`.
fn keyword_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| starts_with_sql_keyword(line))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Text after `marker` up to the next `**` (or end of text), trimmed.
fn marked_section(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find(BOLD_DELIMITER).unwrap_or(rest.len());
    let section = rest[..end].trim();
    (!section.is_empty()).then(|| section.to_string())
}
