use pgexpr::catalog::pg_type::{INT4OID, INT8OID, TEXTOID};
use pgexpr::nodes::datum::Datum;
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};
use proptest::prelude::*;

fn with_isolated_state<T>(f: impl FnOnce() -> T) -> T {
    with_global_state_lock(|| {
        reset_global_state_for_tests();
        f()
    })
}

fn single_row(sql: &str) -> Vec<Datum> {
    let mut result = run_statement(sql)
        .unwrap_or_else(|err| panic!("{sql}: {err}"))
        .pop()
        .expect("result");
    assert_eq!(result.rows.len(), 1, "{sql}");
    result.rows.remove(0)
}

fn sql_int(value: Option<i16>) -> String {
    value.map_or_else(|| "NULL::int".to_string(), |v| format!("({v})::int"))
}

fn sql_bool(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "NULL::boolean",
    }
}

fn to_datum(value: Option<bool>) -> Datum {
    value.map_or(Datum::Null, Datum::Bool)
}

fn int_expr_strategy() -> impl Strategy<Value = String> {
    let leaf = any::<i8>().prop_map(|value| format!("({value})"));
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} + {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} - {b})")),
            inner.clone().prop_map(|expr| format!("abs({expr})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("CASE WHEN {a} > {b} THEN {a} ELSE {b} END")),
            inner.clone().prop_map(|expr| format!("COALESCE(NULL, {expr})")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn declared_type_matches_evaluated_value(expr in int_expr_strategy()) {
        with_isolated_state(|| {
            let result = run_statement(&format!("SELECT {expr}, ({expr})::bigint, ({expr})::text"))
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(result.column_types, vec![INT4OID, INT8OID, TEXTOID]);
            let row = &result.rows[0];
            assert!(matches!(row[0], Datum::Int4(_)));
            assert!(matches!(row[1], Datum::Int8(_)));
            assert!(matches!(row[2], Datum::Text(_)));
        });
    }

    #[test]
    fn strict_functions_propagate_null(value in any::<i16>(), text in "[a-z]{0,8}") {
        with_isolated_state(|| {
            let row = single_row(&format!(
                "SELECT ({value})::int + NULL::int, abs(NULL::int), NULL::int * ({value})::int, \
                 length(NULL::text), textcat('{text}', NULL::text), mod(({value})::int, NULL::int)"
            ));
            assert!(row.iter().all(Datum::is_null), "{row:?}");
        });
    }

    #[test]
    fn boolean_logic_is_three_valued(x in proptest::option::of(any::<bool>())) {
        with_isolated_state(|| {
            let x_sql = sql_bool(x);
            let row = single_row(&format!(
                "SELECT {x_sql} AND NULL, {x_sql} OR NULL, NOT NULL::boolean"
            ));
            let and = match x {
                Some(false) => Some(false),
                _ => None,
            };
            let or = match x {
                Some(true) => Some(true),
                _ => None,
            };
            assert_eq!(row, vec![to_datum(and), to_datum(or), Datum::Null]);
        });
    }

    #[test]
    fn qualification_drops_only_false_rows(values in proptest::collection::vec(proptest::option::of(-5i16..5), 1..8)) {
        with_isolated_state(|| {
            let list = values
                .iter()
                .map(|v| format!("({})", sql_int(*v)))
                .collect::<Vec<_>>()
                .join(", ");
            let result = run_statement(&format!(
                "SELECT x FROM (VALUES {list}) v(x) WHERE x > 0 OR x IS NULL"
            ))
            .unwrap()
            .pop()
            .unwrap();
            let expected = values.iter().filter(|v| v.is_none_or(|v| v > 0)).count();
            assert_eq!(result.rows.len(), expected);
            // A null clause alone does not let a row through.
            let nulls_only = run_statement(&format!("SELECT x FROM (VALUES {list}) v(x) WHERE x > NULL"))
                .unwrap()
                .pop()
                .unwrap();
            assert!(nulls_only.rows.is_empty());
        });
    }

    #[test]
    fn row_comparison_distributes(
        a in proptest::collection::vec(proptest::option::of(-2i16..2), 3),
        b in proptest::collection::vec(proptest::option::of(-2i16..2), 3),
    ) {
        with_isolated_state(|| {
            let row_a = a.iter().map(|v| sql_int(*v)).collect::<Vec<_>>().join(", ");
            let row_b = b.iter().map(|v| sql_int(*v)).collect::<Vec<_>>().join(", ");
            let eq_terms = a
                .iter()
                .zip(&b)
                .map(|(x, y)| format!("{} = {}", sql_int(*x), sql_int(*y)))
                .collect::<Vec<_>>()
                .join(" AND ");
            let ne_terms = a
                .iter()
                .zip(&b)
                .map(|(x, y)| format!("{} <> {}", sql_int(*x), sql_int(*y)))
                .collect::<Vec<_>>()
                .join(" OR ");
            let row = single_row(&format!(
                "SELECT ROW({row_a}) = ROW({row_b}), {eq_terms}, ROW({row_a}) <> ROW({row_b}), {ne_terms}"
            ));
            assert_eq!(row[0], row[1]);
            assert_eq!(row[2], row[3]);
        });
    }

    #[test]
    fn binary_compatible_round_trip(text in "[a-zA-Z0-9 ]{0,16}") {
        with_isolated_state(|| {
            let row = single_row(&format!("SELECT '{text}'::text::varchar::text, '{text}'::varchar::text::varchar"));
            assert_eq!(row, vec![Datum::text(text.clone()), Datum::text(text.clone())]);
        });
    }

    #[test]
    fn cast_to_own_type_is_identity(value in any::<i32>(), text in "[a-z]{0,10}") {
        with_isolated_state(|| {
            let row = single_row(&format!(
                "SELECT ({value})::int4::int4, '{text}'::text::text, ({value})::int8::int8"
            ));
            assert_eq!(row, vec![Datum::Int4(value), Datum::text(text.clone()), Datum::Int8(i64::from(value))]);
        });
    }
}
