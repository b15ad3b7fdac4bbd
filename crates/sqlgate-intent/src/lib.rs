//! Structured representation of a SQL statement's intent.
//!
//! A `QueryIntent` is the canonical summary the authorization evaluator works
//! from: the operation kind, the tables and columns a statement touches, and
//! whether it carries a WHERE clause. Intents are produced per request by an
//! `IntentExtractor` and never persisted beyond the decision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

mod pattern;
mod scan;

pub use pattern::PatternExtractor;
pub use scan::{
    find_keyword, find_top_level_keyword, normalize_sql, split_top_level_commas,
    strip_string_literals, ScanError,
};

/// SQL operation kinds the engine can reason about.
///
/// Anything outside the four DML kinds maps to `Other`, which the evaluator
/// treats as non-matchable (denied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl SqlOperation {
    /// True for statements that modify data.
    pub fn is_write(&self) -> bool {
        matches!(self, SqlOperation::Insert | SqlOperation::Update | SqlOperation::Delete)
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Structured summary of a single SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub operation: SqlOperation,

    /// Tables referenced via FROM / JOIN / INTO / UPDATE. Stored lowercase.
    pub tables: BTreeSet<String>,

    /// Columns explicitly referenced. Empty means "all columns implied"
    /// (e.g. `SELECT *`). Stored lowercase.
    pub columns: BTreeSet<String>,

    pub has_where_clause: bool,

    /// The statement text the intent was derived from.
    pub raw_text: String,
}

impl QueryIntent {
    /// Terminal intent for input neither strategy could make sense of.
    /// The evaluator always denies it.
    pub fn unparseable(raw_text: impl Into<String>) -> Self {
        Self {
            operation: SqlOperation::Other,
            tables: BTreeSet::new(),
            columns: BTreeSet::new(),
            has_where_clause: false,
            raw_text: raw_text.into(),
        }
    }

    /// An intent with no recognized operation or tables cannot be matched
    /// against any permission rule.
    pub fn is_unparseable(&self) -> bool {
        self.operation == SqlOperation::Other || self.tables.is_empty()
    }
}

/// Why an extraction strategy failed to produce a usable intent.
#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("extractor service error: {0}")]
    Service(String),

    #[error("extractor timed out after {0}s")]
    Timeout(u64),

    #[error("extractor returned malformed structure: {0}")]
    SchemaViolation(String),

    #[error("statement not recognized as a single SQL operation")]
    Unrecognized,
}

/// One strategy for turning raw SQL text into a `QueryIntent`.
///
/// Implementations must be side-effect-free per call: a failed extraction
/// leaves no partial state behind, so the caller can fall back to another
/// strategy deterministically.
#[async_trait::async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, raw_sql: &str) -> Result<QueryIntent, ExtractionFailure>;
}

/// Strip markdown fences and trailing noise from a candidate SQL string.
///
/// Text-to-SQL translators routinely wrap their output in ```sql fences;
/// everything downstream (extraction, rewriting) works on the cleaned text.
pub fn clean_sql(raw: &str) -> String {
    let mut cleaned = raw.trim();

    if let Some(rest) = cleaned.strip_prefix("```sql") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }

    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_sql_strips_fences() {
        assert_eq!(clean_sql("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(clean_sql("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(clean_sql("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn test_unparseable_intent() {
        let intent = QueryIntent::unparseable("garbled");
        assert!(intent.is_unparseable());
        assert_eq!(intent.operation, SqlOperation::Other);
        assert!(intent.tables.is_empty());
    }

    #[test]
    fn test_operation_serde_uppercase() {
        let op: SqlOperation = serde_json::from_str("\"SELECT\"").unwrap();
        assert_eq!(op, SqlOperation::Select);
        assert!(serde_json::from_str::<SqlOperation>("\"TRUNCATE\"").is_err());
    }

    #[test]
    fn test_is_write() {
        assert!(SqlOperation::Delete.is_write());
        assert!(!SqlOperation::Select.is_write());
    }
}
