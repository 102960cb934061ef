//! Question-to-SQL orchestration.
//!
//! [`SqlGenerator`] asks a [`ContextRetriever`] for schema context, prompts
//! the LLM, turns the reply into an [`SqlAnswer`] and runs the structural
//! checks on the SQL. The structured JSON reply is the primary path; the
//! heuristic [`extract`] covers markdown mode and replies that are not
//! valid JSON.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::extract::{
    EXPLANATION_PLACEHOLDER, ExtractionResult, OPTIMIZATION_PLACEHOLDER, SQL_PLACEHOLDER, extract,
};
use crate::llm::{LlmClient, LlmError};
use crate::rag::ContextRetriever;
use crate::validate::validate;

// ============================================================================
// Types
// ============================================================================

/// How the model is asked to format its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// A JSON object matching [`StructuredAnswer`].
    #[default]
    Json,
    /// A ```` ```sql ```` fence plus bold-headed sections.
    Markdown,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown response format '{other}'")),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Markdown => write!(f, "markdown"),
        }
    }
}

/// Reply shape requested from the model in JSON mode.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct StructuredAnswer {
    /// The SQL statement answering the question, or "ERROR" when the schemas cannot answer it.
    #[serde(default)]
    pub sql_query: String,
    /// Short explanation of how the query works.
    #[serde(default)]
    pub explanation: String,
    /// Optional performance suggestion, such as indexes to create.
    #[serde(default)]
    pub optimization: Option<String>,
}

/// Final answer returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlAnswer {
    pub sql: String,
    pub explanation: String,
    pub optimization: String,
}

impl SqlAnswer {
    /// Placeholder triple used when the LLM call itself fails.
    pub fn from_error(err: &LlmError) -> Self {
        Self {
            sql: SQL_PLACEHOLDER.to_string(),
            explanation: format!("Error al generar la consulta: {err}"),
            optimization: OPTIMIZATION_PLACEHOLDER.to_string(),
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

const JSON_SYSTEM_PROMPT: &str = r#"Eres un asistente experto en bases de datos. Tu tarea es generar una consulta SQL y una explicación clara basada en los esquemas de tabla proporcionados y la pregunta del usuario.

Reglas:
1. Analiza el contexto y la pregunta para generar la consulta SQL más precisa posible.
2. Usa los nombres de tablas y columnas exactamente como se definen en los esquemas.
3. Crea una explicación breve y clara de cómo funciona la consulta SQL.
4. Sugiere una optimización concreta, por ejemplo índices útiles.
5. Si la pregunta no se puede responder con los esquemas, la consulta SQL debe ser "ERROR" y la explicación debe indicar por qué.

Responde ÚNICAMENTE con un objeto JSON (sin markdown, sin texto adicional) que cumpla este JSON Schema:
"#;

const MARKDOWN_SYSTEM_PROMPT: &str = r#"Eres un asistente experto en bases de datos. Tu tarea es generar una consulta SQL basada en los esquemas de tabla proporcionados y la pregunta del usuario.

Reglas:
1. Usa los nombres de tablas y columnas exactamente como se definen en los esquemas.
2. La consulta debe terminar con punto y coma.

Responde con este formato exacto:

```sql
<consulta>
```

**Explicación:** <explicación breve de cómo funciona la consulta>

**Optimización:** <sugerencia de optimización, por ejemplo índices>"#;

/// Build the user message sent alongside the system prompt.
fn build_user_message(context: &str, question: &str) -> String {
    format!("Contexto (Esquemas de Tablas):\n{context}\n\nPregunta del usuario:\n{question}")
}

fn build_system_prompt(format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Json => {
            let schema = schemars::schema_for!(StructuredAnswer);
            let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
            format!("{JSON_SYSTEM_PROMPT}{schema_json}")
        }
        ResponseFormat::Markdown => MARKDOWN_SYSTEM_PROMPT.to_string(),
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Turns natural-language questions into checked SQL.
pub struct SqlGenerator {
    retriever: Arc<dyn ContextRetriever>,
    llm: Arc<dyn LlmClient>,
    format: ResponseFormat,
    system_prompt: String,
}

impl SqlGenerator {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        llm: Arc<dyn LlmClient>,
        format: ResponseFormat,
    ) -> Self {
        Self {
            retriever,
            llm,
            format,
            system_prompt: build_system_prompt(format),
        }
    }

    /// Name of the model used for generation.
    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Answer `question` with SQL, explanation and optimization hint.
    ///
    /// Only a failing LLM call is an error. Unparseable replies degrade to
    /// placeholders, and SQL failing the structural checks is returned with
    /// the violations prepended as `--` comments.
    pub async fn generate(&self, question: &str) -> Result<SqlAnswer, LlmError> {
        let context = self.retriever.get_context(question).await;
        let user_msg = build_user_message(&context, question);

        let completion = self.llm.complete(&self.system_prompt, &user_msg).await?;
        let parsed = self.parse_reply(&completion.text);

        Ok(apply_validation(parsed))
    }

    fn parse_reply(&self, text: &str) -> ExtractionResult {
        if self.format == ResponseFormat::Json {
            match parse_structured(text) {
                Ok(answer) => return answer,
                Err(e) => warn!("Structured reply not usable, using heuristic extraction: {e}"),
            }
        }
        extract(text)
    }
}

/// Parse a JSON reply, stripping markdown fences if present.
///
/// Blank or missing fields are replaced with the extractor's placeholders.
fn parse_structured(text: &str) -> Result<ExtractionResult, String> {
    let cleaned = strip_markdown_fences(text);
    let answer: StructuredAnswer =
        serde_json::from_str(&cleaned).map_err(|e| format!("JSON parse error: {e}"))?;

    let or_placeholder = |value: &str, placeholder: &str| {
        let value = value.trim();
        if value.is_empty() {
            placeholder.to_string()
        } else {
            value.to_string()
        }
    };

    Ok(ExtractionResult {
        sql: or_placeholder(&answer.sql_query, SQL_PLACEHOLDER),
        explanation: or_placeholder(&answer.explanation, EXPLANATION_PLACEHOLDER),
        optimization: or_placeholder(
            answer.optimization.as_deref().unwrap_or_default(),
            OPTIMIZATION_PLACEHOLDER,
        ),
    })
}

/// Strip markdown code fences from LLM output.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_first_fence = trimmed
            .find('\n')
            .map(|i| &trimmed[i + 1..])
            .unwrap_or(trimmed);
        if let Some(end) = after_first_fence.rfind("```") {
            return after_first_fence[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn apply_validation(parsed: ExtractionResult) -> SqlAnswer {
    let report = validate(&parsed.sql);
    let sql = if report.is_valid {
        parsed.sql
    } else {
        debug!(errors = ?report.errors, "generated SQL failed structural checks");
        format!("{}\n{}", report.as_sql_comment(), parsed.sql)
    };

    SqlAnswer {
        sql,
        explanation: parsed.explanation,
        optimization: parsed.optimization,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::validate::{START_KEYWORD_ERROR, TERMINATOR_ERROR};
    use async_trait::async_trait;

    struct StaticRetriever(&'static str);

    #[async_trait]
    impl ContextRetriever for StaticRetriever {
        async fn get_context(&self, _question: &str) -> String {
            self.0.to_string()
        }
    }

    fn generator(format: ResponseFormat, replies: Vec<Result<String, String>>) -> SqlGenerator {
        SqlGenerator::new(
            Arc::new(StaticRetriever("Tabla: clientes\nEsquema: id INT, pais VARCHAR(50)")),
            Arc::new(MockLlmClient::with_results(replies)),
            format,
        )
    }

    #[tokio::test]
    async fn test_json_reply() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok(r#"{"sql_query":"SELECT COUNT(*) FROM clientes;","explanation":"Cuenta los clientes.","optimization":"Ninguna necesaria."}"#.into())],
        );

        let answer = sql_gen.generate("¿Cuántos clientes hay?").await.unwrap();
        assert_eq!(answer.sql, "SELECT COUNT(*) FROM clientes;");
        assert_eq!(answer.explanation, "Cuenta los clientes.");
        assert_eq!(answer.optimization, "Ninguna necesaria.");
    }

    #[tokio::test]
    async fn test_json_reply_in_fences_without_optimization() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok("```json\n{\"sql_query\": \"SELECT * FROM clientes;\", \"explanation\": \"Todos.\"}\n```".into())],
        );

        let answer = sql_gen.generate("todos los clientes").await.unwrap();
        assert_eq!(answer.sql, "SELECT * FROM clientes;");
        assert_eq!(answer.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_non_json_reply_falls_back_to_extractor() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok("```sql\nSELECT pais FROM clientes;\n```\n**Explicación:** Lista países.".into())],
        );

        let answer = sql_gen.generate("países").await.unwrap();
        assert_eq!(answer.sql, "SELECT pais FROM clientes;");
        assert_eq!(answer.explanation, "Lista países.");
        assert_eq!(answer.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_markdown_mode_uses_extractor() {
        let sql_gen = generator(
            ResponseFormat::Markdown,
            vec![Ok("select id from clientes;\n**Explicación:** ids\n**Optimización:** ninguna".into())],
        );

        let answer = sql_gen.generate("ids").await.unwrap();
        assert_eq!(answer.sql, "select id from clientes;");
        assert_eq!(answer.explanation, "ids");
        assert_eq!(answer.optimization, "ninguna");
    }

    #[tokio::test]
    async fn test_invalid_sql_gets_comment_header() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok(r#"{"sql_query":"ERROR","explanation":"No hay tabla de productos."}"#.into())],
        );

        let answer = sql_gen.generate("productos").await.unwrap();
        assert_eq!(
            answer.sql,
            format!("-- {START_KEYWORD_ERROR}\n-- {TERMINATOR_ERROR}\nERROR")
        );
        assert_eq!(answer.explanation, "No hay tabla de productos.");
    }

    #[tokio::test]
    async fn test_blank_json_fields_get_placeholders() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok(r#"{"sql_query":"SELECT 1;","explanation":"  ","optimization":""}"#.into())],
        );

        let answer = sql_gen.generate("uno").await.unwrap();
        assert_eq!(answer.sql, "SELECT 1;");
        assert_eq!(answer.explanation, EXPLANATION_PLACEHOLDER);
        assert_eq!(answer.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_json_reply_missing_explanation_keeps_sql() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok(r#"{"sql_query":"SELECT * FROM clientes;"}"#.into())],
        );

        let answer = sql_gen.generate("todos los clientes").await.unwrap();
        assert_eq!(answer.sql, "SELECT * FROM clientes;");
        assert_eq!(answer.explanation, EXPLANATION_PLACEHOLDER);
        assert_eq!(answer.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_json_reply_missing_sql_gets_commented_placeholder() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok(r#"{"explanation":"No hay datos suficientes."}"#.into())],
        );

        let answer = sql_gen.generate("algo").await.unwrap();
        assert_eq!(
            answer.sql,
            format!("-- {START_KEYWORD_ERROR}\n-- {TERMINATOR_ERROR}\n{SQL_PLACEHOLDER}")
        );
        assert_eq!(answer.explanation, "No hay datos suficientes.");
    }

    #[tokio::test]
    async fn test_reply_without_sql_yields_degraded_triple() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok("Lo siento, no puedo responder a esa pregunta.".into())],
        );

        let answer = sql_gen.generate("¿Qué tiempo hace?").await.unwrap();
        assert_eq!(
            answer.sql,
            "-- La consulta debe comenzar con SELECT, INSERT, UPDATE, DELETE o WITH\n\
             -- La consulta debe terminar con punto y coma (;)\n\
             -- ERROR: No se pudo generar una consulta SQL"
        );
        assert_eq!(answer.explanation, EXPLANATION_PLACEHOLDER);
        assert_eq!(answer.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_json_followed_by_sql_fence_uses_fence() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok("{\"sql_query\": \"SELECT 1;\", \"explanation\": \"uno\"}\n\n```sql\nSELECT 2;\n```".into())],
        );

        let answer = sql_gen.generate("dos").await.unwrap();
        assert_eq!(answer.sql, "SELECT 2;");
        assert_eq!(answer.explanation, EXPLANATION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_json_inside_sql_fence_is_parsed() {
        let sql_gen = generator(
            ResponseFormat::Json,
            vec![Ok("```sql\n{\"sql_query\": \"SELECT 3;\", \"explanation\": \"tres\"}\n```".into())],
        );

        let answer = sql_gen.generate("tres").await.unwrap();
        assert_eq!(answer.sql, "SELECT 3;");
        assert_eq!(answer.explanation, "tres");
    }

    #[tokio::test]
    async fn test_llm_error_is_returned() {
        let sql_gen = generator(ResponseFormat::Json, vec![Err("timeout".into())]);

        let err = sql_gen.generate("algo").await.unwrap_err();
        let fallback = SqlAnswer::from_error(&err);
        assert_eq!(fallback.sql, SQL_PLACEHOLDER);
        assert!(fallback.explanation.contains("timeout"));
        assert_eq!(fallback.optimization, OPTIMIZATION_PLACEHOLDER);
    }

    #[test]
    fn test_system_prompts() {
        let json = build_system_prompt(ResponseFormat::Json);
        assert!(json.contains("sql_query"));
        assert!(json.contains("explanation"));

        let markdown = build_system_prompt(ResponseFormat::Markdown);
        assert!(markdown.contains("```sql"));
        assert!(markdown.contains(crate::extract::EXPLANATION_MARKER));
        assert!(markdown.contains(crate::extract::OPTIMIZATION_MARKER));
    }

    #[test]
    fn test_user_message_layout() {
        let msg = build_user_message("CTX", "¿Q?");
        assert_eq!(
            msg,
            "Contexto (Esquemas de Tablas):\nCTX\n\nPregunta del usuario:\n¿Q?"
        );
    }

    #[test]
    fn test_response_format_parse() {
        assert_eq!("JSON".parse::<ResponseFormat>(), Ok(ResponseFormat::Json));
        assert_eq!(" markdown ".parse::<ResponseFormat>(), Ok(ResponseFormat::Markdown));
        assert!("xml".parse::<ResponseFormat>().is_err());
        assert_eq!(ResponseFormat::Markdown.to_string(), "markdown");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("  {}  "), "{}");
    }
}
