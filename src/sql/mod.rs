pub mod canonicalizer;
pub mod extract;
pub mod rules;

pub use canonicalizer::{standardize, Canonicalizer};
pub use extract::{extract_sql, first_statement, statement_from_response};
pub use rules::{default_rules, CanonicalizationRule, RuleScope};
