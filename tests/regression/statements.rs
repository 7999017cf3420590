use pgexpr::nodes::datum::Datum;
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};
use pgexpr::QueryResult;

fn with_fresh_engine<T>(f: impl FnOnce() -> T) -> T {
    with_global_state_lock(|| {
        reset_global_state_for_tests();
        f()
    })
}

fn query(sql: &str) -> QueryResult {
    let mut results = run_statement(sql).unwrap_or_else(|err| panic!("{sql}: {err}"));
    results.pop().expect("at least one result")
}

#[test]
fn update_assigns_a_column_list_from_a_sub_select() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE s (id int, qty int, note text);
             INSERT INTO s VALUES (1, 10, 'a'), (3, 30, 'c');",
        )
        .unwrap();
        let update = query("UPDATE s SET (qty, note) = (SELECT 1, 'x') WHERE id = 3");
        assert_eq!(update.command_tag, "UPDATE 1");
        let result = query("SELECT qty, note FROM s WHERE id = 3");
        assert_eq!(result.rows, vec![vec![Datum::Int4(1), Datum::text("x")]]);
        let untouched = query("SELECT qty, note FROM s WHERE id = 1");
        assert_eq!(untouched.rows, vec![vec![Datum::Int4(10), Datum::text("a")]]);
    });
}

#[test]
fn update_column_list_from_an_empty_sub_select_stores_nulls() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE s (id int, qty int, note text);
             INSERT INTO s VALUES (3, 30, 'c');",
        )
        .unwrap();
        query("UPDATE s SET (qty, note) = (SELECT 1, 'x' WHERE false) WHERE id = 3");
        let result = query("SELECT qty, note FROM s WHERE id = 3");
        assert_eq!(result.rows, vec![vec![Datum::Null, Datum::Null]]);
    });
}

#[test]
fn sub_links_stop_reading_once_decided() {
    with_fresh_engine(|| {
        let result = query(
            "SELECT EXISTS (SELECT 1 / (g - 3) FROM generate_series(1, 5) g WHERE g > 1),
                    -1 = ANY (SELECT 1 / (g - 3) FROM generate_series(1, 5) g WHERE g > 1),
                    0 = ALL (SELECT 1 / (g - 3) FROM generate_series(1, 5) g WHERE g > 1)",
        );
        assert_eq!(
            result.rows,
            vec![vec![Datum::Bool(true), Datum::Bool(true), Datum::Bool(false)]]
        );
    });
}

#[test]
fn variadic_array_is_spread_into_concat() {
    with_fresh_engine(|| {
        let result = query(
            "SELECT concat_ws(',', VARIADIC ARRAY['a', 'b']), concat(VARIADIC ARRAY[1, NULL, 3]),
                    concat_ws(',', VARIADIC NULL::text[])",
        );
        assert_eq!(result.rows, vec![vec![Datum::text("a,b"), Datum::text("13"), Datum::Null]]);
    });
}
