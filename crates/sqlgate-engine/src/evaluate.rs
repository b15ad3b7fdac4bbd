//! Authorization decisions over extracted query intents.

use serde::{Deserialize, Serialize};
use sqlgate_intent::{
    find_top_level_keyword, split_top_level_commas, strip_string_literals, QueryIntent,
    SqlOperation,
};
use sqlgate_policy::{is_protected_table, Identity, PolicyStore};
use std::sync::Arc;

use crate::rewrite::statement_has_predicate;

/// Why a request was denied. Rendered as a category, never as internal rule
/// detail, so requesters cannot probe the policy structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    ProtectedTable,
    UnrecognizedQuery,
    NoRuleForTable,
    OperationNotPermitted,
    ColumnNotPermitted,
    UnscopedWrite,
    RewriteFailed,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::ProtectedTable => "protected table",
            DenyReason::UnrecognizedQuery => "unrecognized or unauthorized query shape",
            DenyReason::NoRuleForTable => "no rule for table",
            DenyReason::OperationNotPermitted => "operation not permitted",
            DenyReason::ColumnNotPermitted => "column not permitted",
            DenyReason::UnscopedWrite => "write not scoped to requester",
            DenyReason::RewriteFailed => "statement rewrite failed",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one request. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    AllowWithRewrite { predicate: String },
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn deny(reason: DenyReason) -> Self {
        Decision::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }
}

/// Decides ALLOW / DENY / ALLOW-WITH-REWRITE for an intent against the
/// policy store. Holds no per-request state; safe to share across tasks.
pub struct AuthorizationEvaluator {
    policy: Arc<PolicyStore>,
}

impl AuthorizationEvaluator {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }

    /// Evaluate one intent. Every referenced table must independently allow
    /// the operation; Deny always takes precedence over any Allow.
    pub fn evaluate(&self, identity: &Identity, intent: &QueryIntent) -> Decision {
        // Structural exclusion first: the identity table is off limits no
        // matter what the policy file says.
        if intent.tables.iter().any(|t| is_protected_table(t)) {
            return Decision::deny(DenyReason::ProtectedTable);
        }

        if intent.is_unparseable() {
            return Decision::deny(DenyReason::UnrecognizedQuery);
        }

        let mut rules = Vec::with_capacity(intent.tables.len());
        for table in &intent.tables {
            match self.policy.lookup(identity.role, table) {
                Some(rule) => rules.push(rule),
                None => {
                    tracing::debug!(role = %identity.role, table = %table, "no rule for table");
                    return Decision::deny(DenyReason::NoRuleForTable);
                }
            }
        }

        for rule in &rules {
            if !rule.allowed_operations.contains(&intent.operation) {
                tracing::debug!(
                    role = %identity.role,
                    table = %rule.table,
                    operation = %intent.operation,
                    "operation not permitted"
                );
                return Decision::deny(DenyReason::OperationNotPermitted);
            }
        }

        // Every referenced table's rule must expose every requested column.
        // Joining a wildcard-column table must not widen a restricted one:
        // extraction does not attribute columns to tables, so the most
        // restrictive rule wins. An empty column set means "all columns
        // implied" and is constrained by row scoping, not projection.
        for rule in &rules {
            for column in &intent.columns {
                if !rule.allowed_columns.permits(column) {
                    tracing::debug!(
                        role = %identity.role,
                        table = %rule.table,
                        column = %column,
                        "column not permitted"
                    );
                    return Decision::deny(DenyReason::ColumnNotPermitted);
                }
            }
        }

        // Collect scoping predicates still missing from the statement.
        // Writes are never left unscoped when conditions exist; reads get
        // the same treatment, and an already-scoped statement is not
        // double-injected.
        let mut missing = Vec::new();
        for rule in &rules {
            for template in &rule.required_conditions {
                let predicate = template.bind(identity);

                // A WHERE clause cannot scope an INSERT; the inserted
                // values themselves must satisfy the condition or the
                // write is refused.
                if intent.operation == SqlOperation::Insert {
                    if !insert_matches_scope(&intent.raw_text, &predicate) {
                        tracing::debug!(
                            role = %identity.role,
                            table = %rule.table,
                            "inserted values do not satisfy scoping condition"
                        );
                        return Decision::deny(DenyReason::UnscopedWrite);
                    }
                    continue;
                }

                match statement_has_predicate(&intent.raw_text, &predicate) {
                    Ok(true) => {}
                    Ok(false) => {
                        if !missing.contains(&predicate) {
                            missing.push(predicate);
                        }
                    }
                    Err(_) => return Decision::deny(DenyReason::RewriteFailed),
                }
            }
        }

        if missing.is_empty() {
            Decision::Allow
        } else {
            Decision::AllowWithRewrite {
                predicate: missing.join(" AND "),
            }
        }
    }
}

/// Whether an INSERT's explicit column/value pairs satisfy `predicate`,
/// which is expected to be a bound equality of the form `Column = 'value'`.
/// Anything the lexical scan cannot attribute with certainty (no explicit
/// column list, multi-row VALUES, INSERT ... SELECT, arity mismatch)
/// reports false, so the caller denies.
fn insert_matches_scope(raw_sql: &str, predicate: &str) -> bool {
    let Some((column, expected)) = predicate.split_once('=') else {
        return false;
    };
    let column = column.trim();
    let expected = unquote(expected);

    let body = raw_sql.trim().trim_end_matches(';');
    let Ok(masked) = strip_string_literals(body) else {
        return false;
    };

    let Some(&values_pos) = find_top_level_keyword(&masked, "values").first() else {
        return false;
    };
    let Some(open) = masked.find('(') else {
        return false;
    };
    // No explicit column list before VALUES: the scoping column cannot be
    // attributed to a position.
    if open > values_pos {
        return false;
    }
    let Some(close) = masked[open..].find(')').map(|p| p + open) else {
        return false;
    };
    let columns: Vec<&str> = body[open + 1..close].split(',').map(str::trim).collect();

    let Some(vopen) = masked[values_pos..].find('(').map(|p| p + values_pos) else {
        return false;
    };
    let Some(vclose) = matching_paren(&masked, vopen) else {
        return false;
    };
    // A single row only.
    if !masked[vclose + 1..].trim().is_empty() {
        return false;
    }

    let values = split_top_level_commas(&body[vopen + 1..vclose]);
    if values.len() != columns.len() {
        return false;
    }

    let Some(idx) = columns.iter().position(|c| c.eq_ignore_ascii_case(column)) else {
        return false;
    };
    unquote(values[idx]) == expected
}

/// Strip one pair of single quotes and undouble escaped quotes, leaving
/// unquoted tokens (numeric literals) untouched.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        s[1..s.len() - 1].replace("''", "'")
    } else {
        s.to_string()
    }
}

/// Offset of the paren closing the one opened at `open`.
fn matching_paren(masked: &str, open: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    for (i, c) in masked[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}
