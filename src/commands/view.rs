//! CREATE VIEW.

use tracing::debug;

use crate::catalog::namespace::creation_namespace;
use crate::catalog::table::{Persistence, RelKind};
use crate::catalog::{catalog_snapshot, with_catalog_write};
use crate::nodes::parsenodes::{CreateTableAsStmt, RawStmt};
use crate::parser::parse_analyze;
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::create_table::query_output_desc;

/// Store the analyzed query; references to the view expand to it.
pub fn execute_create_view(stmt: &CreateTableAsStmt, source_text: &str) -> PgResult<QueryResult> {
    let catalog = catalog_snapshot();
    let into = &stmt.into;
    let namespace = creation_namespace(&catalog, into.rel.schemaname.as_deref(), into.temp)?;
    if catalog.relation_in_namespace(namespace, &into.rel.relname).is_some() {
        return Err(PgError::new(
            SqlState::DuplicateTable,
            format!("relation \"{}\" already exists", into.rel.relname),
        ));
    }
    let query_source = if stmt.query_text.is_empty() { source_text } else { stmt.query_text.as_str() };
    let query = parse_analyze(&catalog, &RawStmt::Select((*stmt.query).clone()), query_source, &[])?;
    let desc = query_output_desc(&catalog, &query, &into.col_names)?;
    let persistence = if into.temp { Persistence::Temp } else { Persistence::Permanent };
    let relid = with_catalog_write(|c| {
        let relid = c.create_relation(&into.rel.relname, namespace, RelKind::View, persistence, desc)?;
        if let Some(rel) = c.relation_mut(relid) {
            rel.view_query = Some(Box::new(query));
        }
        Ok::<_, PgError>(relid)
    })?;
    debug!(view = %into.rel.relname, relid, "created view");
    Ok(QueryResult::command("CREATE VIEW"))
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn views_expand_to_their_query() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE vt (a int)").unwrap();
            run_statement("CREATE VIEW vv (doubled) AS SELECT a * 2 FROM vt").unwrap();
            run_statement("INSERT INTO vt VALUES (4)").unwrap();
            let result = run_statement("SELECT doubled FROM vv").unwrap().pop().unwrap();
            assert_eq!(result.columns, vec!["doubled".to_string()]);
            assert_eq!(result.rows, vec![vec![Datum::Int4(8)]]);
            assert_eq!(run_statement("INSERT INTO vv VALUES (1)").unwrap_err().code(), "42809");
        });
    }
}
