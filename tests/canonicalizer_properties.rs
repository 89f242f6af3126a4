use proptest::prelude::*;
use schema_rag_sql::sql::standardize;

const VOCABULARY: &[&str] = &[
    "SELECT", "DISTINCT", "*", "FROM", "JOIN", "WHERE", "LIMIT", "5", "10", "'7'", "7", "DAY",
    "days", "'3 weeks'", "INTERVAL", "-", "+", "CURRENT_DATE", "NOW()", "CURRENT_TIMESTAMP",
    "EXTRACT(", "YEAR", "HOUR", "x", ")", "`Created`", "[Incident]", "incident", "\"USER\"",
    "Created", "LastUpdateDate", "textMME", ";", ",", "(", "'", "`", "[", "]", "\n",
];

fn sql_like() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCABULARY), 0..12).prop_map(|tokens| tokens.join(" "))
}

fn ends_with_single_terminator(sql: &str) -> bool {
    match sql.strip_suffix(';') {
        Some(body) => !body.ends_with(|c: char| c == ';' || c.is_whitespace()),
        None => false,
    }
}

proptest! {
    #[test]
    fn standardize_is_idempotent_on_sql_like_input(sql in sql_like()) {
        let once = standardize(&sql);
        prop_assert_eq!(standardize(&once), once);
    }

    #[test]
    fn trailing_limits_collapse_into_one_top(
        body in sql_like(),
        limits in prop::collection::vec(1u32..1000, 1..40),
    ) {
        let tail: String = limits.iter().map(|n| format!(" LIMIT {}", n)).collect();
        let sql = format!("SELECT {}{}", body, tail);
        let once = standardize(&sql);
        prop_assert_eq!(standardize(&once), once.clone());
        prop_assert!(once.matches("TOP ").count() <= 1, "stacked TOP in {:?}", once);
    }

    #[test]
    fn standardize_is_idempotent_on_arbitrary_text(text in ".{0,80}") {
        let once = standardize(&text);
        prop_assert_eq!(standardize(&once), once);
    }

    #[test]
    fn output_ends_with_exactly_one_terminator(text in ".{0,80}") {
        let out = standardize(&text);
        prop_assert!(ends_with_single_terminator(&out), "bad terminator in {:?}", out);
    }
}
