//! Scoping-predicate injection into SQL text.
//!
//! Pure text splicing of WHERE clauses is fragile against SQL edge cases, so
//! the rewriter works on literal-masked text and refuses to rewrite when the
//! WHERE boundary is ambiguous rather than guess. A refused rewrite forces
//! the caller to deny.

use sqlgate_intent::{find_top_level_keyword, strip_string_literals};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("statement contains an unterminated string literal")]
    UnterminatedLiteral,

    #[error("could not locate an unambiguous WHERE clause boundary")]
    AmbiguousWhereBoundary,
}

/// Clauses that terminate a WHERE clause's predicate text.
const TAIL_KEYWORDS: &[&str] = &["group", "having", "order", "limit"];

/// Inject `predicate` into `raw_sql`'s WHERE clause.
///
/// No WHERE clause: appends `WHERE <predicate>` before any trailing
/// GROUP BY / HAVING / ORDER BY / LIMIT clauses. Existing WHERE clause: the
/// original predicate is parenthesized and `AND <predicate>` appended, so
/// operator precedence is preserved. Idempotent: a statement already carrying
/// an equivalent predicate is returned unchanged.
pub fn rewrite(raw_sql: &str, predicate: &str) -> Result<String, RewriteError> {
    let trimmed = raw_sql.trim();
    let (body, had_semicolon) = match trimmed.strip_suffix(';') {
        Some(b) => (b.trim_end(), true),
        None => (trimmed, false),
    };

    let masked = strip_string_literals(body).map_err(|_| RewriteError::UnterminatedLiteral)?;

    let where_positions = find_top_level_keyword(&masked, "where");
    if where_positions.len() > 1 {
        return Err(RewriteError::AmbiguousWhereBoundary);
    }

    let rewritten = match where_positions.first() {
        Some(&where_pos) => {
            let clause_start = where_pos + "where".len();
            let clause_end = tail_start(&masked, clause_start);
            let existing = body[clause_start..clause_end].trim();
            if existing.is_empty() {
                return Err(RewriteError::AmbiguousWhereBoundary);
            }

            if contains_predicate(existing, predicate) {
                return Ok(raw_sql.trim().to_string());
            }

            format!(
                "{} ({}) AND {}{}",
                body[..clause_start].trim_end(),
                existing,
                predicate,
                tail_text(body, clause_end)
            )
        }
        None => {
            let insert_at = tail_start(&masked, 0);
            format!(
                "{} WHERE {}{}",
                body[..insert_at].trim_end(),
                predicate,
                tail_text(body, insert_at)
            )
        }
    };

    Ok(if had_semicolon {
        format!("{};", rewritten)
    } else {
        rewritten
    })
}

/// Whether `clause` already carries `predicate` as a whole top-level
/// AND-conjunct, compared case- and whitespace-insensitively. A predicate
/// buried in a disjunction (`scope OR 1=1`) does not constrain the result
/// set, so it reports false and the caller injects `(orig) AND scope`.
/// Used both for rewrite idempotence and by the evaluator to avoid
/// double-injection.
pub fn contains_predicate(clause: &str, predicate: &str) -> bool {
    let Ok(masked) = strip_string_literals(clause) else {
        return false;
    };
    // Any top-level OR means no single conjunct is guaranteed to apply.
    if !find_top_level_keyword(&masked, "or").is_empty() {
        return false;
    }

    let target = squash(strip_outer_parens(predicate));

    let mut conjuncts = Vec::new();
    let mut start = 0;
    for pos in find_top_level_keyword(&masked, "and") {
        conjuncts.push(&clause[start..pos]);
        start = pos + "and".len();
    }
    conjuncts.push(&clause[start..]);

    conjuncts
        .iter()
        .any(|conjunct| squash(strip_outer_parens(conjunct)) == target)
}

/// Peel parens that wrap the whole expression as one balanced pair.
fn strip_outer_parens(s: &str) -> &str {
    let mut s = s.trim();
    while s.starts_with('(') && s.ends_with(')') {
        let inner = &s[1..s.len() - 1];
        let mut depth: i32 = 0;
        let mut wraps = true;
        for c in inner.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        wraps = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if wraps && depth == 0 {
            s = inner.trim();
        } else {
            break;
        }
    }
    s
}

/// Whether `raw_sql`'s top-level WHERE clause already carries `predicate`.
pub fn statement_has_predicate(raw_sql: &str, predicate: &str) -> Result<bool, RewriteError> {
    let body = raw_sql.trim().trim_end_matches(';');
    let masked = strip_string_literals(body).map_err(|_| RewriteError::UnterminatedLiteral)?;

    let where_positions = find_top_level_keyword(&masked, "where");
    if where_positions.len() > 1 {
        return Err(RewriteError::AmbiguousWhereBoundary);
    }

    Ok(match where_positions.first() {
        Some(&pos) => {
            let clause_start = pos + "where".len();
            let clause_end = tail_start(&masked, clause_start);
            contains_predicate(&body[clause_start..clause_end], predicate)
        }
        None => false,
    })
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Offset of the first trailing clause keyword at or after `from`, or the
/// end of the statement.
fn tail_start(masked: &str, from: usize) -> usize {
    TAIL_KEYWORDS
        .iter()
        .flat_map(|kw| find_top_level_keyword(masked, kw))
        .filter(|&p| p >= from)
        .min()
        .unwrap_or(masked.len())
}

fn tail_text(body: &str, from: usize) -> String {
    let tail = body[from..].trim_end();
    if tail.is_empty() {
        String::new()
    } else {
        format!(" {}", tail.trim_start())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_where_when_absent() {
        let sql = rewrite("SELECT * FROM Students", "StudentID = '4'").unwrap();
        assert_eq!(sql, "SELECT * FROM Students WHERE StudentID = '4'");
    }

    #[test]
    fn test_parenthesizes_existing_clause() {
        let sql = rewrite(
            "UPDATE Classes SET Room='101' WHERE ClassID=5",
            "TeacherID = '7'",
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE Classes SET Room='101' WHERE (ClassID=5) AND TeacherID = '7'"
        );
    }

    #[test]
    fn test_preserves_order_and_limit() {
        let sql = rewrite(
            "SELECT * FROM Enrollments ORDER BY ClassID LIMIT 10",
            "StudentID = '4'",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM Enrollments WHERE StudentID = '4' ORDER BY ClassID LIMIT 10"
        );

        let sql = rewrite(
            "SELECT * FROM Enrollments WHERE Status = 'active' ORDER BY ClassID",
            "StudentID = '4'",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM Enrollments WHERE (Status = 'active') AND StudentID = '4' ORDER BY ClassID"
        );
    }

    #[test]
    fn test_preserves_trailing_semicolon() {
        let sql = rewrite("SELECT * FROM Students;", "StudentID = '4'").unwrap();
        assert_eq!(sql, "SELECT * FROM Students WHERE StudentID = '4';");
    }

    #[test]
    fn test_idempotent() {
        let once = rewrite("SELECT * FROM Students", "StudentID = '4'").unwrap();
        let twice = rewrite(&once, "StudentID = '4'").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_equivalent_predicate_not_duplicated() {
        let sql = rewrite(
            "SELECT * FROM Students WHERE studentid='4'",
            "StudentID = '4'",
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM Students WHERE studentid='4'");
    }

    #[test]
    fn test_where_in_literal_ignored() {
        let sql = rewrite(
            "SELECT * FROM Courses WHERE CourseName = 'where it began'",
            "StudentID = '4'",
        )
        .unwrap();
        assert!(sql.ends_with("AND StudentID = '4'"));
    }

    #[test]
    fn test_unterminated_literal_refused() {
        assert_eq!(
            rewrite("SELECT * FROM t WHERE x = 'oops", "y = '1'"),
            Err(RewriteError::UnterminatedLiteral)
        );
    }

    #[test]
    fn test_empty_where_clause_refused() {
        assert_eq!(
            rewrite("SELECT * FROM t WHERE", "y = '1'"),
            Err(RewriteError::AmbiguousWhereBoundary)
        );
    }

    #[test]
    fn test_subquery_where_untouched() {
        let sql = rewrite(
            "SELECT * FROM Classes WHERE ClassID IN (SELECT ClassID FROM Enrollments WHERE Status = 'active')",
            "TeacherID = '7'",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM Classes WHERE (ClassID IN (SELECT ClassID FROM Enrollments WHERE Status = 'active')) AND TeacherID = '7'"
        );
    }

    #[test]
    fn test_or_disjunct_does_not_count_as_scoped() {
        // The predicate sits in a disjunction, so it constrains nothing;
        // the rewriter must still wrap the clause and inject.
        let sql = rewrite(
            "SELECT * FROM Students WHERE StudentID = '4' OR 1=1",
            "StudentID = '4'",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM Students WHERE (StudentID = '4' OR 1=1) AND StudentID = '4'"
        );

        // And the result is stable on a second pass.
        let again = rewrite(&sql, "StudentID = '4'").unwrap();
        assert_eq!(sql, again);
    }

    #[test]
    fn test_predicate_must_be_whole_conjunct() {
        // A textual substring that is not its own conjunct does not count.
        assert!(!statement_has_predicate(
            "SELECT * FROM Students WHERE StudentID = '4' OR Role = 'admin'",
            "StudentID = '4'"
        )
        .unwrap());

        // As one conjunct of a top-level AND it does.
        assert!(statement_has_predicate(
            "SELECT * FROM Students WHERE (StudentID = '4') AND Major = 'CS'",
            "StudentID = '4'"
        )
        .unwrap());
    }

    #[test]
    fn test_statement_has_predicate() {
        assert!(statement_has_predicate(
            "SELECT * FROM Students WHERE StudentID = '4'",
            "StudentID='4'"
        )
        .unwrap());
        assert!(!statement_has_predicate("SELECT * FROM Students", "StudentID='4'").unwrap());
    }
}
