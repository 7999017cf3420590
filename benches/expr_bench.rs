use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use pgexpr::catalog::catalog_snapshot;
use pgexpr::parser::{parse_analyze, raw_parser};
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement};

fn assert_ok(sql: &str) {
    if let Err(err) = run_statement(sql) {
        panic!("benchmark query failed: {sql}: {err}");
    }
}

fn bench_analyze_expression(c: &mut Criterion) {
    reset_global_state_for_tests();
    let sql = "SELECT CASE WHEN x % 2 = 0 THEN x * 3 ELSE abs(x - 7) END, x IN (1, 2, 3), (x, 1) = (1, x) \
               FROM (VALUES (1), (2), (3)) v(x)";
    let raw = raw_parser(sql).unwrap().remove(0);
    c.bench_function("analyze_expression", |b| {
        b.iter(|| {
            let catalog = catalog_snapshot();
            parse_analyze(&catalog, &raw, sql, &[]).unwrap()
        })
    });
}

fn bench_evaluate_select(c: &mut Criterion) {
    reset_global_state_for_tests();
    c.bench_function("evaluate_select", |b| {
        b.iter(|| assert_ok("SELECT sum(g * 2 + 1) FROM generate_series(1, 1000) g WHERE g % 3 <> 0"))
    });
}

fn bench_sql_function_call(c: &mut Criterion) {
    reset_global_state_for_tests();
    assert_ok("CREATE FUNCTION addone(int) RETURNS int AS $$ SELECT $1 + 1 $$ LANGUAGE SQL");
    c.bench_function("sql_function_call", |b| {
        b.iter(|| assert_ok("SELECT addone(g) FROM generate_series(1, 100) g"))
    });
}

fn bench_concurrent_refresh(c: &mut Criterion) {
    c.bench_function("concurrent_refresh", |b| {
        b.iter_batched(
            || {
                reset_global_state_for_tests();
                assert_ok(
                    "CREATE TABLE t (a int UNIQUE, b int);
                     INSERT INTO t SELECT g, g * 10 FROM generate_series(1, 200) g;
                     CREATE MATERIALIZED VIEW m AS SELECT a, b FROM t;
                     CREATE UNIQUE INDEX ON m (a);
                     UPDATE t SET b = b + 1 WHERE a % 10 = 0;
                     DELETE FROM t WHERE a % 25 = 0;",
                );
            },
            |()| assert_ok("REFRESH MATERIALIZED VIEW CONCURRENTLY m"),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_analyze_expression,
    bench_evaluate_select,
    bench_sql_function_call,
    bench_concurrent_refresh
);
criterion_main!(benches);
