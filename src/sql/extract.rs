//! Pulls a single SQL statement out of generated text.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FENCE: Regex =
        Regex::new(r"(?is)```(?:sql)?\s*(.*?)\s*```").expect("fence pattern compiles");
}

/// Body of the first ```` ``` ```` fence, or the trimmed text when there is none.
pub fn extract_sql(raw: &str) -> &str {
    FENCE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| raw.trim())
}

#[derive(Clone, Copy, PartialEq)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
}

/// First non-empty statement, split on `;` outside quotes, brackets and `--`
/// comments. Returns an empty string when there is no statement at all.
pub fn first_statement(sql: &str) -> &str {
    let mut state = Lexeme::Code;
    let mut start = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match state {
            Lexeme::Code => match c {
                '\'' | '"' | '`' => state = Lexeme::Quoted(c),
                '[' => state = Lexeme::Quoted(']'),
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    chars.next();
                    state = Lexeme::LineComment;
                }
                ';' => {
                    let statement = sql[start..i].trim();
                    if !statement.is_empty() {
                        return statement;
                    }
                    start = i + 1;
                }
                _ => {}
            },
            Lexeme::Quoted(close) => {
                if c == close {
                    state = Lexeme::Code;
                }
            }
            Lexeme::LineComment => {
                if c == '\n' {
                    state = Lexeme::Code;
                }
            }
        }
    }
    sql[start..].trim()
}

/// Generated text → the one statement worth canonicalizing.
pub fn statement_from_response(raw: &str) -> &str {
    first_statement(extract_sql(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_response() {
        let raw = "Here you go:\n```sql\nSELECT * FROM t;\n```\nEnjoy.";
        assert_eq!(extract_sql(raw), "SELECT * FROM t;");
        assert_eq!(extract_sql("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(extract_sql("  SELECT 2  "), "SELECT 2");
    }

    #[test]
    fn test_first_statement_only() {
        assert_eq!(first_statement("SELECT 1; DROP TABLE t;"), "SELECT 1");
        assert_eq!(first_statement(";; SELECT 1"), "SELECT 1");
        assert_eq!(first_statement("SELECT 1"), "SELECT 1");
        assert_eq!(first_statement("  ;  "), "");
    }

    #[test]
    fn test_semicolons_inside_literals_and_comments() {
        assert_eq!(
            first_statement("SELECT 'a;b', [x;y] FROM t; SELECT 2"),
            "SELECT 'a;b', [x;y] FROM t"
        );
        assert_eq!(
            first_statement("SELECT 1 -- trailing; note\nFROM t; SELECT 2"),
            "SELECT 1 -- trailing; note\nFROM t"
        );
    }

    #[test]
    fn test_statement_from_response() {
        let raw = "```SQL\nSELECT TOP 5 * FROM incident; SELECT 1;\n```";
        assert_eq!(statement_from_response(raw), "SELECT TOP 5 * FROM incident");
    }
}
