//! Canonicalization rules.
//!
//! Rules are plain data: a pattern, a replacement and the scope the engine
//! applies them in. The built-in set targets T-SQL and the canonical table and
//! column names of the incident-management schema.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Identifier directly after FROM or JOIN, bare or quoted with `[]`,
    /// backticks or double quotes. Numbered groups refer to the pattern as
    /// matched against the unquoted identifier.
    Table,
    /// Whole statement, anchored on word boundaries unless `word_boundary`
    /// is false.
    Column,
    /// Whole statement, pattern used as written.
    Statement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizationRule {
    pub pattern: String,
    pub replacement: String,
    pub scope: RuleScope,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_word_boundary")]
    pub word_boundary: bool,
}

fn default_word_boundary() -> bool {
    true
}

impl CanonicalizationRule {
    pub fn table(pattern: &str, replacement: &str) -> Self {
        Self::new(pattern, replacement, RuleScope::Table)
    }

    pub fn column(pattern: &str, replacement: &str) -> Self {
        Self::new(pattern, replacement, RuleScope::Column)
    }

    pub fn statement(pattern: &str, replacement: &str) -> Self {
        Self::new(pattern, replacement, RuleScope::Statement)
    }

    fn new(pattern: &str, replacement: &str, scope: RuleScope) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            scope,
            case_sensitive: false,
            word_boundary: true,
        }
    }
}

pub fn default_table_rules() -> Vec<CanonicalizationRule> {
    ["response", "workflow", "incident", "user"]
        .iter()
        .map(|name| CanonicalizationRule::table(name, name))
        .collect()
}

pub fn default_column_rules() -> Vec<CanonicalizationRule> {
    [
        ("LastUpdateDate", "updated_at"),
        ("Created", "created_at"),
        ("UpdatedAt", "updated_at"),
        ("CreatedAt", "created_at"),
        ("last_login", "last_login_at"),
        ("last_updated", "updated_at"),
        ("date_created_at", "created_at"),
        ("textMME", "text_mme"),
    ]
    .iter()
    .map(|(legacy, canonical)| CanonicalizationRule::column(legacy, canonical))
    .collect()
}

const INTERVAL_UNITS: &[(&str, &str)] = &[
    ("DAYS?", "day"),
    ("WEEKS?", "week"),
    ("MONTHS?", "month"),
    ("YEARS?", "year"),
    ("HOURS?", "hour"),
    ("MINUTES?", "minute"),
];

const NOW_EXPRESSIONS: &str = r"(?:\bCURRENT_DATE|\bCURRENT_TIMESTAMP|\bNOW\(\))";

/// Portable SQL to T-SQL. Order matters: interval arithmetic has to be
/// rewritten before bare `NOW()` and `CURRENT_DATE`.
pub fn default_statement_rules() -> Vec<CanonicalizationRule> {
    let mut rules = Vec::new();

    for (unit_pattern, unit) in INTERVAL_UNITS {
        // INTERVAL '7' DAY | INTERVAL 7 DAY | INTERVAL '7 days'
        let forms = [
            format!(r"'(\d+)'\s*{}\b", unit_pattern),
            format!(r"(\d+)\s+{}\b", unit_pattern),
            format!(r"'(\d+)\s*{}'", unit_pattern),
        ];
        for form in &forms {
            rules.push(CanonicalizationRule::statement(
                &format!(r"{}\s*-\s*INTERVAL\s*{}", NOW_EXPRESSIONS, form),
                &format!("DATEADD({}, -${{1}}, GETDATE())", unit),
            ));
            rules.push(CanonicalizationRule::statement(
                &format!(r"{}\s*\+\s*INTERVAL\s*{}", NOW_EXPRESSIONS, form),
                &format!("DATEADD({}, ${{1}}, GETDATE())", unit),
            ));
        }
    }

    rules.push(CanonicalizationRule::statement(r"\bNOW\(\)", "GETDATE()"));
    rules.push(CanonicalizationRule::statement(
        r"\bCURRENT_DATE\b",
        "CAST(GETDATE() AS DATE)",
    ));

    // An existing TOP wins over trailing LIMITs.
    rules.push(CanonicalizationRule::statement(
        r"(?s)^\s*SELECT\s+(DISTINCT\s+)?(TOP\s+\d+\b.*?)(?:\s+LIMIT\s+\d+)+\s*;?\s*$",
        "SELECT ${1}${2}",
    ));
    // Only trailing LIMITs on a plain SELECT become TOP; the last one counts.
    rules.push(CanonicalizationRule::statement(
        r"(?s)^\s*SELECT\s+(DISTINCT\s+)?(.*?)(?:\s+LIMIT\s+\d+)*\s+LIMIT\s+(\d+)\s*;?\s*$",
        "SELECT ${1}TOP ${3} ${2}",
    ));

    for part in ["YEAR", "MONTH", "DAY"] {
        rules.push(CanonicalizationRule::statement(
            &format!(r"\bEXTRACT\s*\(\s*{}\s+FROM\s+([^()]+?)\s*\)", part),
            &format!("{}(${{1}})", part),
        ));
    }
    for part in ["HOUR", "MINUTE", "SECOND", "QUARTER", "WEEK"] {
        rules.push(CanonicalizationRule::statement(
            &format!(r"\bEXTRACT\s*\(\s*{}\s+FROM\s+([^()]+?)\s*\)", part),
            &format!("DATEPART({}, ${{1}})", part.to_lowercase()),
        ));
    }

    rules.push(CanonicalizationRule::statement(r"`([^`]+)`", "[${1}]"));
    rules
}

/// Table, column and statement groups, in that order.
pub fn default_rules() -> Vec<CanonicalizationRule> {
    let mut rules = default_table_rules();
    rules.extend(default_column_rules());
    rules.extend(default_statement_rules());
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_json_defaults() {
        let rule: CanonicalizationRule = serde_json::from_str(
            r#"{"pattern": "Modified", "replacement": "updated_at", "scope": "column"}"#,
        )
        .unwrap();
        assert_eq!(rule, CanonicalizationRule::column("Modified", "updated_at"));
        assert!(rule.word_boundary);
        assert!(!rule.case_sensitive);
    }

    #[test]
    fn test_default_groups_are_ordered() {
        let scopes: Vec<RuleScope> = default_rules().iter().map(|r| r.scope).collect();
        let mut sorted = scopes.clone();
        sorted.sort();
        assert_eq!(scopes, sorted);
    }
}
