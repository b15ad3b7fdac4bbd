//! Deterministic pattern-based intent extraction.
//!
//! Fallback strategy when the semantic extractor is unavailable or fails.
//! Recognizes canonical keyword positions (`SELECT ... FROM`, `UPDATE ... SET`,
//! `INSERT INTO`, `DELETE FROM`) by lexical scanning. Not a SQL grammar:
//! ambiguous or multi-statement input yields `SqlOperation::Other` with an
//! empty table set, which the evaluator denies.

use std::collections::BTreeSet;

use crate::scan::{
    find_keyword, find_top_level_keyword, split_top_level_commas, strip_string_literals,
};
use crate::{ExtractionFailure, IntentExtractor, QueryIntent, SqlOperation};

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction. The async trait impl delegates here; the
    /// strategy itself never suspends.
    pub fn extract_sync(&self, raw_sql: &str) -> Result<QueryIntent, ExtractionFailure> {
        let trimmed = raw_sql.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Err(ExtractionFailure::Unrecognized);
        }

        let masked = strip_string_literals(trimmed)
            .map_err(|_| ExtractionFailure::Unrecognized)?;

        // A semicolon still present after trimming the trailing one means
        // multiple statements. Refuse rather than guess.
        if masked.contains(';') {
            return Ok(QueryIntent::unparseable(raw_sql));
        }

        let operation = match masked
            .split_whitespace()
            .next()
            .map(|w| w.to_lowercase())
            .as_deref()
        {
            Some("select") => SqlOperation::Select,
            Some("insert") => SqlOperation::Insert,
            Some("update") => SqlOperation::Update,
            Some("delete") => SqlOperation::Delete,
            _ => return Ok(QueryIntent::unparseable(raw_sql)),
        };

        // Any depth: a table reached only through a subquery still needs
        // a permission rule.
        let mut tables = BTreeSet::new();
        for keyword in ["from", "join", "into", "update"] {
            for pos in find_keyword(&masked, keyword) {
                collect_table_names(&masked[pos + keyword.len()..], &mut tables);
            }
        }

        let columns = match operation {
            SqlOperation::Select => select_columns(&masked),
            SqlOperation::Update => set_columns(&masked),
            SqlOperation::Insert => insert_columns(&masked),
            _ => BTreeSet::new(),
        };

        let has_where_clause = !find_top_level_keyword(&masked, "where").is_empty();

        Ok(QueryIntent {
            operation,
            tables,
            columns,
            has_where_clause,
            raw_text: raw_sql.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl IntentExtractor for PatternExtractor {
    async fn extract(&self, raw_sql: &str) -> Result<QueryIntent, ExtractionFailure> {
        self.extract_sync(raw_sql)
    }
}

/// Read a comma-separated run of table names starting at `rest`
/// (the text right after FROM / JOIN / INTO / UPDATE).
fn collect_table_names(rest: &str, tables: &mut BTreeSet<String>) {
    let mut remainder = rest;
    loop {
        let trimmed = remainder.trim_start();
        let name: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return;
        }
        tables.insert(name.to_lowercase());

        // `FROM a, b` style lists: continue past a comma that directly
        // follows the name (before any alias).
        let after = trimmed[name.len()..].trim_start();
        match after.strip_prefix(',') {
            Some(next) => remainder = next,
            None => return,
        }
    }
}

/// Columns between SELECT and the top-level FROM.
fn select_columns(masked: &str) -> BTreeSet<String> {
    let select_pos = match find_top_level_keyword(masked, "select").first() {
        Some(&p) => p + "select".len(),
        None => return BTreeSet::new(),
    };
    let from_pos = match find_top_level_keyword(masked, "from").first() {
        Some(&p) if p > select_pos => p,
        _ => return BTreeSet::new(),
    };
    column_expressions(&masked[select_pos..from_pos])
}

/// Assignment targets between UPDATE's SET and WHERE (or end of statement).
fn set_columns(masked: &str) -> BTreeSet<String> {
    let set_pos = match find_top_level_keyword(masked, "set").first() {
        Some(&p) => p + "set".len(),
        None => return BTreeSet::new(),
    };
    let end = find_top_level_keyword(masked, "where")
        .first()
        .copied()
        .unwrap_or(masked.len());
    if end <= set_pos {
        return BTreeSet::new();
    }

    split_top_level_commas(&masked[set_pos..end])
        .into_iter()
        .filter_map(|assign| assign.split('=').next().map(str::trim).map(str::to_string))
        .filter_map(|lhs| bare_column_name(&lhs))
        .collect()
}

/// Column list in the parenthesized group of `INSERT INTO t (a, b, c)`.
fn insert_columns(masked: &str) -> BTreeSet<String> {
    let open = match masked.find('(') {
        Some(p) => p,
        None => return BTreeSet::new(),
    };
    // Only the list before VALUES names columns.
    if let Some(values) = find_top_level_keyword(masked, "values").first() {
        if open > *values {
            return BTreeSet::new();
        }
    }
    let close = match masked[open..].find(')') {
        Some(p) => open + p,
        None => return BTreeSet::new(),
    };

    masked[open + 1..close]
        .split(',')
        .filter_map(|c| bare_column_name(c.trim()))
        .collect()
}

/// Parse a projection/assignment list into plain column names. Wildcards and
/// function calls are skipped, the same way the evaluator treats an empty
/// column set as "all columns implied".
fn column_expressions(list: &str) -> BTreeSet<String> {
    split_top_level_commas(list)
        .into_iter()
        .filter_map(|expr| {
            let mut col = expr.trim();
            if col == "*" || col.contains('(') {
                return None;
            }
            for prefix in ["distinct ", "DISTINCT ", "Distinct "] {
                if let Some(rest) = col.strip_prefix(prefix) {
                    col = rest.trim();
                }
            }
            // Qualified `table.column` keeps the column part.
            let col = col.rsplit('.').next().unwrap_or(col);
            bare_column_name(col)
        })
        .collect()
}

fn bare_column_name(s: &str) -> Option<String> {
    let s = s.trim();
    let valid = !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| s.to_lowercase())
}
