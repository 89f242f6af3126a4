pub mod aspects;
pub mod columns;

pub use aspects::{Aspect, QueryAspects};
pub use columns::{
    ColumnRelevanceScorer, ColumnSelector, HeuristicRules, RelevanceMode, ScoringQuery,
    SelectorRule, DEFAULT_MAX_COLUMNS,
};
