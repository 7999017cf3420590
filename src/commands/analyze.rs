//! ANALYZE: record live row counts.

use tracing::debug;

use crate::catalog::{catalog_snapshot, with_catalog_write};
use crate::nodes::parsenodes::RangeVar;
use crate::storage::heap::heap_live_tuples;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::open_relation;

/// With no targets, every table and populated materialized view is analyzed.
pub fn execute_analyze(targets: &[RangeVar]) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let relids = if targets.is_empty() {
        catalog
            .relations()
            .filter(|rel| rel.is_scannable() && rel.populated)
            .map(|rel| rel.oid)
            .collect::<Vec<_>>()
    } else {
        targets
            .iter()
            .map(|rv| {
                let rel = open_relation(&catalog, rv)?;
                if !rel.is_scannable() {
                    return Err(PgError::new(
                        SqlState::WrongObjectType,
                        format!("cannot analyze \"{}\"", rel.name),
                    ));
                }
                Ok(rel.oid)
            })
            .collect::<PgResult<Vec<_>>>()?
    };

    let mut counts = Vec::with_capacity(relids.len());
    for relid in relids {
        let Some(rel) = catalog.relation(relid) else { continue };
        let reltuples = heap_live_tuples(rel.relfilenode)?.len() as u64;
        debug!(relation = %rel.name, reltuples, "analyzed");
        counts.push((relid, reltuples));
    }
    with_catalog_write(|c| {
        for (relid, reltuples) in counts {
            if let Some(rel) = c.relation_mut(relid) {
                rel.reltuples = Some(reltuples);
            }
        }
    });
    Ok(QueryResult::command("ANALYZE"))
}

#[cfg(test)]
mod tests {
    use crate::catalog::{PG_PUBLIC_NAMESPACE, catalog_snapshot};
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn analyze_records_row_counts() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE an1 (a int)").unwrap();
            run_statement("INSERT INTO an1 SELECT g FROM generate_series(1, 5) g").unwrap();
            run_statement("DELETE FROM an1 WHERE a > 3").unwrap();
            run_statement("ANALYZE an1").unwrap();
            let catalog = catalog_snapshot();
            let rel = catalog.relation_in_namespace(PG_PUBLIC_NAMESPACE, "an1").unwrap();
            assert_eq!(rel.reltuples, Some(3));
            assert_eq!(run_statement("ANALYZE missing").unwrap_err().code(), "42P01");
        });
    }
}
