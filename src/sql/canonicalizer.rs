//! SQL Canonicalizer
//!
//! One generic engine that interprets [`CanonicalizationRule`] records. Table
//! rules run first, then column rules, then statement rules, each group in
//! declaration order. The result always ends in exactly one `;`.
//!
//! `standardize` is idempotent: a pass is repeated until the text stops
//! changing, so a rule whose output exposes another rule's input is still
//! settled before the result is returned.

use crate::error::{Result, SqlRagError};
use crate::sql::rules::{default_rules, CanonicalizationRule, RuleScope};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

const MAX_PASSES: usize = 16;
const TERMINATOR: char = ';';

lazy_static! {
    static ref STANDARD: Canonicalizer =
        Canonicalizer::new(default_rules()).expect("built-in canonicalization rules compile");
}

/// Standardizes `sql` with the built-in T-SQL rule set.
pub fn standardize(sql: &str) -> String {
    STANDARD.standardize(sql)
}

#[derive(Debug, Clone)]
enum CompiledRule {
    Table {
        locator: Regex,
        identifier: Regex,
        replacement: String,
    },
    Replace {
        regex: Regex,
        replacement: String,
    },
}

impl CompiledRule {
    fn compile(rule: &CanonicalizationRule) -> Result<Self> {
        let flags = if rule.case_sensitive { "" } else { "(?i)" };
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| {
                SqlRagError::Rule(format!("Invalid pattern '{}': {}", rule.pattern, e))
            })
        };
        let p = &rule.pattern;

        Ok(match rule.scope {
            RuleScope::Table => CompiledRule::Table {
                locator: build(format!(
                    r#"{flags}\b(?:FROM|JOIN)\s+(?:\[(?:{p})\]|`(?:{p})`|"(?:{p})"|(?:{p})\b)"#
                ))?,
                identifier: build(format!("{flags}^(?:{p})$"))?,
                replacement: rule.replacement.clone(),
            },
            RuleScope::Column => CompiledRule::Replace {
                regex: if rule.word_boundary {
                    build(format!(r"{flags}\b(?:{p})\b"))?
                } else {
                    build(format!("{flags}(?:{p})"))?
                },
                replacement: rule.replacement.clone(),
            },
            RuleScope::Statement => CompiledRule::Replace {
                regex: build(format!("{flags}{p}"))?,
                replacement: rule.replacement.clone(),
            },
        })
    }

    fn apply<'t>(&self, sql: &'t str) -> Cow<'t, str> {
        match self {
            CompiledRule::Replace { regex, replacement } => {
                regex.replace_all(sql, replacement.as_str())
            }
            CompiledRule::Table {
                locator,
                identifier,
                replacement,
            } => locator.replace_all(sql, |caps: &Captures| {
                let whole = &caps[0];
                // Keyword and whitespace are kept verbatim.
                let ident_start = whole
                    .find(|c: char| c.is_whitespace())
                    .map(|ws| {
                        ws + whole[ws..]
                            .find(|c: char| !c.is_whitespace())
                            .unwrap_or(0)
                    })
                    .unwrap_or(whole.len());
                let (prefix, quoted) = whole.split_at(ident_start);
                let bare = strip_quotes(quoted);

                let mut out = prefix.to_string();
                match identifier.captures(bare) {
                    Some(inner) => inner.expand(replacement, &mut out),
                    None => out.push_str(quoted),
                }
                out
            }),
        }
    }
}

fn strip_quotes(ident: &str) -> &str {
    for (open, close) in [('[', ']'), ('`', '`'), ('"', '"')] {
        if ident.len() >= 2 && ident.starts_with(open) && ident.ends_with(close) {
            return &ident[1..ident.len() - 1];
        }
    }
    ident
}

/// Trims, drops any trailing terminators and appends exactly one.
fn finalize(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(|c: char| c == TERMINATOR || c.is_whitespace());
    let mut out = String::with_capacity(body.len() + 1);
    out.push_str(body);
    out.push(TERMINATOR);
    out
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    rules: Vec<CompiledRule>,
}

impl Canonicalizer {
    /// Compiles `rules`. Groups are ordered by scope; order inside a group
    /// is the order given.
    pub fn new(mut rules: Vec<CanonicalizationRule>) -> Result<Self> {
        rules.sort_by_key(|r| r.scope);
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Built-in rules followed by the rules in a JSON file.
    pub fn with_rules_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SqlRagError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let extra: Vec<CanonicalizationRule> = serde_json::from_str(&content).map_err(|e| {
            SqlRagError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        let mut rules = default_rules();
        rules.extend(extra);
        Self::new(rules)
    }

    fn pass(&self, sql: &str) -> String {
        let mut current = sql.to_string();
        for rule in &self.rules {
            if let Cow::Owned(rewritten) = rule.apply(&current) {
                current = rewritten;
            }
        }
        finalize(&current)
    }

    pub fn standardize(&self, sql: &str) -> String {
        let mut current = self.pass(sql);
        for passes in 1..MAX_PASSES {
            let next = self.pass(&current);
            if next == current {
                if passes > 1 {
                    debug!(passes, "Canonicalization needed extra passes");
                }
                return current;
            }
            current = next;
        }
        warn!(sql, "Canonicalization did not settle");
        current
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        STANDARD.clone()
    }
}
