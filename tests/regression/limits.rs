use pgexpr::catalog::pg_type::{FLOAT8OID, NUMERICOID};
use pgexpr::nodes::datum::Datum;
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};
use pgexpr::{PgResult, QueryResult};

fn with_fresh_engine<T>(f: impl FnOnce() -> T) -> T {
    with_global_state_lock(|| {
        reset_global_state_for_tests();
        f()
    })
}

/// Run `sql` on a thread with a fixed stack, so a runaway recursion shows
/// up as an error instead of taking down the harness.
fn run_on_small_stack(sql: String, stack_bytes: usize) -> PgResult<Vec<QueryResult>> {
    std::thread::Builder::new()
        .stack_size(stack_bytes)
        .spawn(move || run_statement(&sql))
        .expect("spawn worker")
        .join()
        .expect("worker must not overflow its stack")
}

#[test]
fn deeply_nested_parentheses_are_refused() {
    with_fresh_engine(|| {
        run_statement("SET max_expr_depth = 100000").unwrap();
        let depth = 10_000;
        let sql = format!("SELECT {}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = run_on_small_stack(sql, 2 * 1024 * 1024).unwrap_err();
        assert_eq!(err.code(), "54001");
        assert!(err.hint.as_deref().unwrap_or_default().contains("max_stack_depth"));
    });
}

#[test]
fn long_operator_chain_fails_cleanly() {
    with_fresh_engine(|| {
        let sql = format!("SELECT 1{}", " + 1".repeat(100_000));
        let err = run_on_small_stack(sql, 2 * 1024 * 1024).unwrap_err();
        assert_eq!(err.code(), "54001");
    });
}

#[test]
fn short_operator_chain_still_evaluates() {
    with_fresh_engine(|| {
        let sql = format!("SELECT 1{}", " + 1".repeat(40));
        let mut results = run_on_small_stack(sql, 16 * 1024 * 1024).unwrap();
        let result = results.pop().unwrap();
        assert_eq!(result.rows, vec![vec![Datum::Int4(41)]]);
    });
}

#[test]
fn decimal_literals_outside_numeric() {
    with_fresh_engine(|| {
        let mut results = run_statement("SELECT 1e30, 1.5e-40, 1e308::float8, 2.5").unwrap();
        let result = results.pop().unwrap();
        assert_eq!(result.column_types, vec![FLOAT8OID, FLOAT8OID, FLOAT8OID, NUMERICOID]);
        assert_eq!(
            result.rows[0][..3],
            [Datum::Float8(1e30), Datum::Float8(1.5e-40), Datum::Float8(1e308)]
        );

        let err = run_statement("SELECT 12345678901234567890123456789.5::numeric").unwrap_err();
        assert_eq!(err.code(), "22003");
        assert_eq!(err.position, Some(7));
        let err = run_statement("SELECT 1e400").unwrap_err();
        assert_eq!(err.code(), "22003");
    });
}
