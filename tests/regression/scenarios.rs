use pgexpr::catalog::catalog_snapshot;
use pgexpr::catalog::pg_type::{INT4OID, TEXTOID};
use pgexpr::nodes::datum::Datum;
use pgexpr::nodes::parsenodes::CmdType;
use pgexpr::nodes::primnodes::Expr;
use pgexpr::parser::{parse_analyze, raw_parser};
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};
use pgexpr::{QueryResult, SqlState};

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

fn sorted_rows(sql: &str) -> Vec<Vec<Datum>> {
    let mut rows = query(sql).rows;
    rows.sort_by_key(|row| match row.first() {
        Some(Datum::Int4(v)) => *v,
        _ => i32::MIN,
    });
    rows
}

#[test]
fn s1_integer_addition() {
    with_fresh_engine(|| {
        let result = query("SELECT 1 + 2;");
        assert_eq!(result.rows, vec![vec![Datum::Int4(3)]]);
        assert_eq!(result.column_types, vec![INT4OID]);
        assert_eq!(result.command_tag, "SELECT 1");
    });
}

#[test]
fn s2_null_tests() {
    with_fresh_engine(|| {
        let result = query("SELECT NULL IS NULL, NULL IS NOT NULL;");
        assert_eq!(result.rows, vec![vec![Datum::Bool(true), Datum::Bool(false)]]);
    });
}

#[test]
fn s3_three_valued_logic() {
    with_fresh_engine(|| {
        let result = query("SELECT NULL OR true, NULL AND false, NOT NULL;");
        assert_eq!(result.rows, vec![vec![Datum::Bool(true), Datum::Bool(false), Datum::Null]]);
    });
}

#[test]
fn s4_row_comparisons() {
    with_fresh_engine(|| {
        let result = query("SELECT (1,2) = (1,2), (1,2) <> (1,3), (1,null) = (1,null);");
        assert_eq!(result.rows, vec![vec![Datum::Bool(true), Datum::Bool(true), Datum::Null]]);
    });
}

#[test]
fn s5_concurrent_refresh_applies_inserts_and_deletes() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE t (a int UNIQUE, b int);
             INSERT INTO t VALUES (1, 10), (2, 20);
             CREATE MATERIALIZED VIEW m AS SELECT a, b FROM t;
             CREATE UNIQUE INDEX ON m (a);",
        )
        .unwrap();

        run_statement("INSERT INTO t VALUES (3, 30)").unwrap();
        let refresh = query("REFRESH MATERIALIZED VIEW CONCURRENTLY m");
        assert_eq!(refresh.command_tag, "REFRESH MATERIALIZED VIEW");
        assert_eq!(
            sorted_rows("SELECT a, b FROM m"),
            vec![
                vec![Datum::Int4(1), Datum::Int4(10)],
                vec![Datum::Int4(2), Datum::Int4(20)],
                vec![Datum::Int4(3), Datum::Int4(30)],
            ]
        );

        run_statement("DELETE FROM t WHERE a = 1").unwrap();
        query("REFRESH MATERIALIZED VIEW CONCURRENTLY m");
        assert_eq!(
            sorted_rows("SELECT a, b FROM m"),
            vec![vec![Datum::Int4(2), Datum::Int4(20)], vec![Datum::Int4(3), Datum::Int4(30)]]
        );
    });
}

#[test]
fn s6_case_yields_text() {
    with_fresh_engine(|| {
        let result = query("SELECT CASE WHEN 1=1 THEN 'a' WHEN 1=2 THEN 'b' ELSE 'c' END;");
        assert_eq!(result.rows, vec![vec![Datum::text("a")]]);
        assert_eq!(result.column_types, vec![TEXTOID]);
    });
}

#[test]
fn s7_in_list_becomes_scalar_array_op() {
    with_fresh_engine(|| {
        let sql = "SELECT x FROM (VALUES (1),(2),(3)) v(x) WHERE x IN (2,3);";
        assert_eq!(sorted_rows(sql), vec![vec![Datum::Int4(2)], vec![Datum::Int4(3)]]);

        let catalog = catalog_snapshot();
        let raw = raw_parser(sql).unwrap().remove(0);
        let analyzed = parse_analyze(&catalog, &raw, sql, &[]).unwrap();
        assert_eq!(analyzed.command_type, CmdType::Select);
        match &analyzed.jointree.quals {
            Some(Expr::ScalarArrayOpExpr(saop)) => assert!(saop.use_or),
            other => panic!("expected ScalarArrayOpExpr, got {other:?}"),
        }
    });
}

#[test]
fn s8_sql_function_call() {
    with_fresh_engine(|| {
        run_statement("CREATE FUNCTION addone(int) RETURNS int AS $$ SELECT $1 + 1 $$ LANGUAGE SQL;").unwrap();
        let result = query("SELECT addone(41);");
        assert_eq!(result.rows, vec![vec![Datum::Int4(42)]]);
    });
}

#[test]
fn errors_carry_sqlstate_and_position() {
    with_fresh_engine(|| {
        let err = run_statement("SELECT nosuchcol FROM (VALUES (1)) v(x)").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedColumn);
        assert_eq!(err.position, Some(7));

        let err = run_statement("SELECT 1 / 0").unwrap_err();
        assert_eq!(err.code(), "22012");
    });
}
