//! Literal-aware lexical scanning over SQL text.
//!
//! The pattern extractor and the statement rewriter both need to find
//! keywords without being fooled by string literals (`WHERE` inside a quoted
//! value must not count) or by subqueries in parentheses. These helpers mask
//! literals and track paren depth instead of attempting a full SQL grammar.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("unterminated string literal")]
    UnterminatedLiteral,
}

/// Return a copy of `sql` with the contents of every string literal replaced
/// by spaces. Offsets are preserved, so positions found in the masked text
/// are valid in the original. Doubled quotes inside a literal are treated as
/// escapes, per standard SQL.
pub fn strip_string_literals(sql: &str) -> Result<String, ScanError> {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' || b == b'"' {
            let quote = b;
            out.push(quote);
            i += 1;
            loop {
                if i >= bytes.len() {
                    return Err(ScanError::UnterminatedLiteral);
                }
                if bytes[i] == quote {
                    // Doubled quote is an escaped quote, not a terminator.
                    if i + 1 < bytes.len() && bytes[i + 1] == quote {
                        out.push(b' ');
                        out.push(b' ');
                        i += 2;
                        continue;
                    }
                    out.push(quote);
                    i += 1;
                    break;
                }
                out.push(b' ');
                i += 1;
            }
        } else {
            out.push(b);
            i += 1;
        }
    }

    // Input was valid UTF-8 and we only replaced bytes inside literals with
    // ASCII spaces, byte-for-byte.
    Ok(String::from_utf8(out).expect("masking preserves UTF-8"))
}

/// Find every occurrence of `keyword` in `masked` that sits at paren depth
/// zero and on word boundaries. `masked` must come from
/// [`strip_string_literals`] so literals cannot match.
pub fn find_top_level_keyword(masked: &str, keyword: &str) -> Vec<usize> {
    // ASCII-only lowercasing keeps byte offsets aligned with the input.
    let lower = masked.to_ascii_lowercase();
    let needle = keyword.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let mut depth: i32 = 0;
    let mut positions = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = (depth - 1).max(0),
            _ => {
                if depth == 0 && bytes[i..].starts_with(needle.as_bytes()) {
                    let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                    let end = i + needle.len();
                    let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
                    if before_ok && after_ok {
                        positions.push(i);
                        i = end;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }

    positions
}

/// Like [`find_top_level_keyword`] but matches at any paren depth. Table
/// collection uses this so a table referenced only inside a subquery still
/// counts against the requester's rules.
pub fn find_keyword(masked: &str, keyword: &str) -> Vec<usize> {
    let lower = masked.to_ascii_lowercase();
    let needle = keyword.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let mut positions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(needle.as_bytes()) {
            let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
            let end = i + needle.len();
            let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
            if before_ok && after_ok {
                positions.push(i);
                i = end;
                continue;
            }
        }
        i += 1;
    }
    positions
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split `s` on commas outside parentheses. Commas nested in function calls
/// or subqueries stay within their piece.
pub fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Lowercase and collapse runs of whitespace to single spaces. Used for
/// order-insensitive predicate comparison, never for execution.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_literals_masks_contents() {
        let masked = strip_string_literals("SELECT * FROM t WHERE name = 'where'").unwrap();
        assert!(!masked.to_lowercase()[30..].contains("where"));
        assert_eq!(masked.len(), "SELECT * FROM t WHERE name = 'where'".len());
    }

    #[test]
    fn test_strip_literals_doubled_quote() {
        let masked = strip_string_literals("x = 'O''Brien'").unwrap();
        assert!(!masked.contains("Brien"));
    }

    #[test]
    fn test_strip_literals_unterminated() {
        assert_eq!(
            strip_string_literals("WHERE name = 'oops"),
            Err(ScanError::UnterminatedLiteral)
        );
    }

    #[test]
    fn test_find_keyword_skips_subquery() {
        let sql = "SELECT * FROM t WHERE id IN (SELECT id FROM u WHERE x = 1)";
        let masked = strip_string_literals(sql).unwrap();
        let positions = find_top_level_keyword(&masked, "where");
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0], 16);
    }

    #[test]
    fn test_find_keyword_word_boundary() {
        let masked = strip_string_literals("SELECT anywhere FROM t").unwrap();
        assert!(find_top_level_keyword(&masked, "where").is_empty());
    }

    #[test]
    fn test_normalize_sql() {
        assert_eq!(normalize_sql("  StudentID   =  5 "), "studentid = 5");
    }
}
