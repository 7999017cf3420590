//! ALTER TABLE ... ADD COLUMN / DROP COLUMN.

use tracing::{debug, info};

use crate::catalog::table::{RelKind, Relation};
use crate::catalog::{catalog_snapshot, with_catalog_write};
use crate::executor::exec_expr::exec_eval_expr;
use crate::executor::exec_utils::{EState, ExprContext};
use crate::nodes::datum::Datum;
use crate::nodes::parsenodes::{AlterTableCmd, AlterTableStmt, ColumnDef};
use crate::storage::heap::{heap_live_tuples, heap_rewrite};
use crate::tcop::engine::QueryResult;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::create_table::{column_attribute, transform_column_default};
use super::open_relation;

fn add_column(rel: &Relation, column: &ColumnDef, source_text: &str) -> PgResult<()> {
    if rel.desc.attnum_by_name(&column.colname).is_some() {
        return Err(PgError::new(
            SqlState::DuplicateColumn,
            format!("column \"{}\" of relation \"{}\" already exists", column.colname, rel.name),
        ));
    }
    if column.primary_key || column.unique {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            "ADD COLUMN cannot define a key; use CREATE UNIQUE INDEX afterwards",
        ));
    }
    let catalog = catalog_snapshot();
    let attr = column_attribute(&catalog, column)?;
    let default = column
        .raw_default
        .as_ref()
        .map(|raw| transform_column_default(&catalog, &attr, raw, source_text))
        .transpose()?;

    // One evaluation per existing row, so volatile defaults differ per row.
    let nrows = heap_live_tuples(rel.relfilenode)?.len();
    let mut fill = Vec::with_capacity(nrows);
    let mut estate = EState::standalone(catalog.clone());
    for _ in 0..nrows {
        fill.push(match &default {
            Some(expr) => exec_eval_expr(expr, &ExprContext::default(), &mut estate)?,
            None => Datum::Null,
        });
    }
    if attr.not_null && fill.iter().any(Datum::is_null) {
        return Err(PgError::new(
            SqlState::NotNullViolation,
            format!("column \"{}\" of relation \"{}\" contains null values", attr.name, rel.name),
        ));
    }

    let mut values = fill.into_iter();
    heap_rewrite(rel.relfilenode, |row, live| {
        let value = if live { values.next() } else { None };
        row.push(value.unwrap_or(Datum::Null));
    })?;
    let relid = rel.oid;
    with_catalog_write(|c| {
        if let Some(rel) = c.relation_mut(relid) {
            rel.desc.attrs.push(attr);
            let attno = rel.desc.attrs.len() as i16;
            if let Some(expr) = default {
                rel.defaults.insert(attno, expr);
            }
        }
    });
    debug!(relation = %rel.name, column = %column.colname, "added column");
    Ok(())
}

fn drop_column(rel: &Relation, name: &str, missing_ok: bool) -> PgResult<()> {
    let Some(attno) = rel.desc.attnum_by_name(name) else {
        if missing_ok {
            info!("column \"{name}\" of relation \"{}\" does not exist, skipping", rel.name);
            return Ok(());
        }
        return Err(PgError::new(
            SqlState::UndefinedColumn,
            format!("column \"{name}\" of relation \"{}\" does not exist", rel.name),
        ));
    };
    let relid = rel.oid;
    with_catalog_write(|c| {
        if let Some(rel) = c.relation_mut(relid) {
            if let Some(attr) = rel.desc.attr_mut(attno) {
                attr.dropped = true;
                attr.not_null = false;
            }
            rel.defaults.remove(&attno);
            rel.indexes.retain(|index| !index.keys.contains(&attno));
        }
    });
    heap_rewrite(rel.relfilenode, |row, _| {
        if let Some(value) = row.get_mut(attno as usize - 1) {
            *value = Datum::Null;
        }
    })?;
    debug!(relation = %rel.name, column = %name, "dropped column");
    Ok(())
}

pub fn execute_alter_table(stmt: &AlterTableStmt, source_text: &str) -> PgResult<QueryResult> {
    for cmd in &stmt.cmds {
        // Each subcommand sees the effects of the previous one.
        let catalog = catalog_snapshot();
        let rel = open_relation(&catalog, &stmt.relation)?;
        if rel.kind != RelKind::Table {
            return Err(PgError::new(
                SqlState::WrongObjectType,
                format!("\"{}\" is not a table", rel.name),
            ));
        }
        match cmd {
            AlterTableCmd::AddColumn(column) => add_column(rel, column, source_text)?,
            AlterTableCmd::DropColumn { name, missing_ok } => drop_column(rel, name, *missing_ok)?,
        }
    }
    Ok(QueryResult::command("ALTER TABLE"))
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn add_and_drop_columns() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE at1 (a int)").unwrap();
            run_statement("INSERT INTO at1 VALUES (1), (2)").unwrap();
            run_statement("ALTER TABLE at1 ADD COLUMN b int DEFAULT 7").unwrap();
            let rows = run_statement("SELECT a, b FROM at1 ORDER BY a").unwrap().pop().unwrap().rows;
            assert_eq!(rows, vec![vec![Datum::Int4(1), Datum::Int4(7)], vec![Datum::Int4(2), Datum::Int4(7)]]);
            assert_eq!(run_statement("ALTER TABLE at1 ADD COLUMN b int").unwrap_err().code(), "42701");
            assert_eq!(run_statement("ALTER TABLE at1 ADD COLUMN c int NOT NULL").unwrap_err().code(), "23502");

            run_statement("ALTER TABLE at1 DROP COLUMN a").unwrap();
            let result = run_statement("SELECT * FROM at1").unwrap().pop().unwrap();
            assert_eq!(result.columns, vec!["b".to_string()]);
            assert_eq!(run_statement("SELECT a FROM at1").unwrap_err().code(), "42703");
        });
    }
}
