use pgexpr::catalog::{PG_PUBLIC_NAMESPACE, catalog_snapshot};
use pgexpr::nodes::datum::Datum;
use pgexpr::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

fn with_fresh_engine<T>(f: impl FnOnce() -> T) -> T {
    with_global_state_lock(|| {
        reset_global_state_for_tests();
        f()
    })
}

fn rows(sql: &str) -> Vec<Vec<Datum>> {
    run_statement(sql)
        .unwrap_or_else(|err| panic!("{sql}: {err}"))
        .pop()
        .expect("result")
        .rows
}

fn setup_orders() {
    run_statement(
        "CREATE TABLE orders (id int PRIMARY KEY, customer text, amount int);
         INSERT INTO orders VALUES (1, 'ann', 10), (2, 'bob', 5), (3, 'ann', 7);
         CREATE MATERIALIZED VIEW totals AS
             SELECT customer, sum(amount) AS total FROM orders GROUP BY customer;
         CREATE UNIQUE INDEX totals_customer ON totals (customer);",
    )
    .unwrap();
}

#[test]
fn concurrent_refresh_matches_the_defining_query() {
    with_fresh_engine(|| {
        setup_orders();
        run_statement(
            "UPDATE orders SET amount = amount + 1 WHERE customer = 'bob';
             INSERT INTO orders VALUES (4, 'cy', 3);
             DELETE FROM orders WHERE id = 3;",
        )
        .unwrap();
        run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY totals").unwrap();

        let from_view = rows("SELECT customer, total FROM totals ORDER BY customer");
        let from_query = rows("SELECT customer, sum(amount) FROM orders GROUP BY customer ORDER BY customer");
        assert_eq!(from_view, from_query);
        assert_eq!(from_view.len(), 3);
    });
}

#[test]
fn plain_refresh_swaps_the_heap() {
    with_fresh_engine(|| {
        setup_orders();
        let before = catalog_snapshot()
            .relation_in_namespace(PG_PUBLIC_NAMESPACE, "totals")
            .map(|rel| rel.relfilenode)
            .unwrap();
        run_statement("INSERT INTO orders VALUES (9, 'dee', 1)").unwrap();
        let result = run_statement("REFRESH MATERIALIZED VIEW totals").unwrap().pop().unwrap();
        assert_eq!(result.command_tag, "REFRESH MATERIALIZED VIEW");
        let after = catalog_snapshot()
            .relation_in_namespace(PG_PUBLIC_NAMESPACE, "totals")
            .map(|rel| rel.relfilenode)
            .unwrap();
        assert_ne!(before, after);
        assert_eq!(rows("SELECT count(*) FROM totals"), vec![vec![Datum::Int8(3)]]);
    });
}

#[test]
fn failed_refresh_leaves_the_view_untouched() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE src (k int, v int);
             INSERT INTO src VALUES (1, 1), (2, 2);
             CREATE MATERIALIZED VIEW mv AS SELECT k, v FROM src;
             CREATE UNIQUE INDEX ON mv (k);",
        )
        .unwrap();
        let before = catalog_snapshot()
            .relation_in_namespace(PG_PUBLIC_NAMESPACE, "mv")
            .map(|rel| (rel.relfilenode, rel.populated))
            .unwrap();

        // Duplicate keys break the unique index on rebuild.
        run_statement("INSERT INTO src VALUES (1, 5)").unwrap();
        let err = run_statement("REFRESH MATERIALIZED VIEW mv").unwrap_err();
        assert_eq!(err.code(), "23505");
        // Identical rows without nulls are rejected by the concurrent path.
        run_statement("DELETE FROM src WHERE v = 5; INSERT INTO src VALUES (2, 2)").unwrap();
        let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY mv").unwrap_err();
        assert_eq!(err.code(), "21000");

        let after = catalog_snapshot()
            .relation_in_namespace(PG_PUBLIC_NAMESPACE, "mv")
            .map(|rel| (rel.relfilenode, rel.populated))
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(rows("SELECT count(*) FROM mv"), vec![vec![Datum::Int8(2)]]);
        // The temporary diff tables are gone again.
        let catalog = catalog_snapshot();
        assert!(!catalog.relations().any(|rel| rel.name.starts_with("pg_temp_")));
    });
}

#[test]
fn with_no_data_and_concurrent_refresh_preconditions() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE base (k int);
             INSERT INTO base VALUES (1);
             CREATE MATERIALIZED VIEW lazy AS SELECT k FROM base WITH NO DATA;",
        )
        .unwrap();
        assert_eq!(run_statement("SELECT * FROM lazy").unwrap_err().code(), "55000");
        assert_eq!(
            run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY lazy").unwrap_err().code(),
            "55000"
        );
        assert_eq!(
            run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY lazy WITH NO DATA")
                .unwrap_err()
                .code(),
            "42601"
        );
        run_statement("REFRESH MATERIALIZED VIEW lazy").unwrap();
        assert_eq!(rows("SELECT k FROM lazy"), vec![vec![Datum::Int4(1)]]);

        // Populated, but without a usable unique index.
        let err = run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY lazy").unwrap_err();
        assert_eq!(err.code(), "55000");
        assert!(err.hint.is_some());

        run_statement("REFRESH MATERIALIZED VIEW lazy WITH NO DATA").unwrap();
        assert_eq!(run_statement("SELECT * FROM lazy").unwrap_err().code(), "55000");
    });
}

#[test]
fn rows_with_nulls_are_matched_by_identity() {
    with_fresh_engine(|| {
        run_statement(
            "CREATE TABLE n (k int, v int);
             INSERT INTO n VALUES (1, NULL), (2, 2);
             CREATE MATERIALIZED VIEW nv AS SELECT k, v FROM n;
             CREATE UNIQUE INDEX ON nv (k);",
        )
        .unwrap();
        run_statement("UPDATE n SET v = 3 WHERE k = 2").unwrap();
        run_statement("REFRESH MATERIALIZED VIEW CONCURRENTLY nv").unwrap();
        assert_eq!(
            rows("SELECT k, v FROM nv ORDER BY k"),
            vec![vec![Datum::Int4(1), Datum::Null], vec![Datum::Int4(2), Datum::Int4(3)]]
        );
        assert_eq!(run_statement("INSERT INTO nv VALUES (5, 5)").unwrap_err().code(), "42809");
    });
}
