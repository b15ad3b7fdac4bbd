//! OpenAI-backed semantic intent extraction.
//!
//! Primary extraction strategy: the raw SQL is handed to the model with a
//! prompt demanding a structured JSON description of operation, tables,
//! columns, and WHERE presence. The response is schema-validated before
//! anything downstream sees it; any timeout, service error, or schema
//! violation is a strategy failure that sends the engine to the
//! deterministic pattern fallback, never a crash.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::Deserialize;
use sqlgate_intent::{
    clean_sql, ExtractionFailure, IntentExtractor, QueryIntent, SqlOperation,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// System prompt teaching the model to describe SQL statements as JSON.
const SYSTEM_PROMPT: &str = r#"You are an expert SQL analyst. Analyze the SQL statement you are given and return ONLY a JSON object with this exact structure:

{
  "operation": "SELECT",
  "tables": ["table1", "table2"],
  "columns": ["column1", "column2"],
  "has_where_clause": true
}

Rules:
1. "operation" is exactly one of SELECT, INSERT, UPDATE, DELETE. If the statement is anything else (multiple statements, DDL, not SQL), use OTHER.
2. "tables" lists every table the statement touches: FROM, JOIN, INTO, UPDATE targets, and tables inside subqueries.
3. "columns" lists only columns explicitly named (selected, updated via SET, or in an INSERT column list). Do not include '*' or function calls. For SELECT *, return an empty list.
4. "has_where_clause" is true only when the outermost statement has a WHERE clause.
5. Keep table and column names exactly as written in the SQL.
6. Return ONLY the JSON object. No markdown fences, no explanations.

Examples:

SQL: SELECT * FROM Students
{"operation": "SELECT", "tables": ["Students"], "columns": [], "has_where_clause": false}

SQL: UPDATE Classes SET Room = '101' WHERE ClassID = 5
{"operation": "UPDATE", "tables": ["Classes"], "columns": ["Room"], "has_where_clause": true}

SQL: SELECT s.FullName, c.CourseName FROM Students s JOIN Enrollments e ON s.StudentID = e.StudentID JOIN Courses c ON e.CourseID = c.CourseID WHERE e.Status = 'active'
{"operation": "SELECT", "tables": ["Students", "Enrollments", "Courses"], "columns": ["FullName", "CourseName"], "has_where_clause": true}

SQL: DROP TABLE Students
{"operation": "OTHER", "tables": [], "columns": [], "has_where_clause": false}"#;

const MAX_RETRIES: usize = 2;

/// Wire schema the model must produce. Unknown fields are rejected: a
/// response shaped differently than expected is a failure, not a guess.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredIntent {
    operation: SqlOperation,
    tables: Vec<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    has_where_clause: bool,
}

impl StructuredIntent {
    fn into_intent(self, raw_sql: &str) -> Result<QueryIntent, ExtractionFailure> {
        let tables: BTreeSet<String> = self
            .tables
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if self.operation != SqlOperation::Other && tables.is_empty() {
            return Err(ExtractionFailure::SchemaViolation(
                "operation without tables".to_string(),
            ));
        }

        let columns = self
            .columns
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && *c != "*" && !c.contains('('))
            .collect();

        Ok(QueryIntent {
            operation: self.operation,
            tables,
            columns,
            has_where_clause: self.has_where_clause,
            raw_text: raw_sql.to_string(),
        })
    }
}

/// Semantic extraction strategy backed by OpenAI.
pub struct SemanticExtractor {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl SemanticExtractor {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn request_structured(
        &self,
        raw_sql: &str,
    ) -> Result<StructuredIntent, ExtractionFailure> {
        let mut messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()
                    .map_err(|e| ExtractionFailure::Service(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(format!("SQL: {raw_sql}"))
                    .build()
                    .map_err(|e| ExtractionFailure::Service(e.to_string()))?,
            ),
        ];

        let mut last_error = String::new();

        for attempt in 0..MAX_RETRIES {
            let request = CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages(messages.clone())
                .temperature(0.0)
                .build()
                .map_err(|e| ExtractionFailure::Service(e.to_string()))?;

            let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
                .await
                .map_err(|_| ExtractionFailure::Timeout(self.timeout.as_secs()))?
                .map_err(|e| ExtractionFailure::Service(e.to_string()))?;

            let content = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.clone())
                .ok_or_else(|| ExtractionFailure::Service("empty response".to_string()))?;

            tracing::debug!(attempt = attempt + 1, %content, "semantic extractor response");

            match serde_json::from_str::<StructuredIntent>(&clean_sql(&content)) {
                Ok(structured) => return Ok(structured),
                Err(err) => {
                    last_error = err.to_string();
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %last_error,
                        "semantic extractor returned invalid structure"
                    );

                    // Feed the violation back once; a model that cannot
                    // produce the schema after that is a failed strategy.
                    messages.push(ChatCompletionRequestMessage::Assistant(
                        async_openai::types::ChatCompletionRequestAssistantMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| ExtractionFailure::Service(e.to_string()))?,
                    ));
                    messages.push(ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(format!(
                                "Error: {last_error}. Return ONLY the JSON object with fields \
                                 operation, tables, columns, has_where_clause."
                            ))
                            .build()
                            .map_err(|e| ExtractionFailure::Service(e.to_string()))?,
                    ));
                }
            }
        }

        Err(ExtractionFailure::SchemaViolation(last_error))
    }
}

#[async_trait::async_trait]
impl IntentExtractor for SemanticExtractor {
    async fn extract(&self, raw_sql: &str) -> Result<QueryIntent, ExtractionFailure> {
        let structured = self.request_structured(raw_sql).await?;
        structured.into_intent(raw_sql)
    }
}
