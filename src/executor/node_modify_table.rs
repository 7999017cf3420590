//! INSERT, UPDATE and DELETE.
//!
//! The source plan produces one row per tuple to write. For INSERT and
//! UPDATE the leading columns are the new row in attribute order; UPDATE and
//! DELETE also carry the target tuple's ctid. Writes use the statement's
//! command id, so the statement's own scans never see them.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::oid::Oid;
use crate::catalog::table::Relation;
use crate::commands::matview::matview_maintenance_active;
use crate::nodes::datum::{Datum, ItemPointer};
use crate::nodes::parsenodes::CmdType;
use crate::nodes::plannodes::{AttrNumber, Plan};
use crate::nodes::primnodes::TargetEntry;
use crate::storage::heap::{heap_delete, heap_fetch, heap_insert, heap_update};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_indexing::{check_unique_constraints, exec_constraints};
use super::exec_proc_node::exec_outer_plan;
use super::exec_utils::{EState, ExprContext, exec_project};
use super::tuptable::TupleTableSlot;

/// What a ModifyTable node writes and where.
#[derive(Debug, Clone, Copy)]
pub struct ModifyTarget<'a> {
    pub operation: CmdType,
    pub relid: Oid,
    pub target_cols: &'a [AttrNumber],
    pub ctid_col: Option<AttrNumber>,
    pub returning: &'a [TargetEntry],
}

fn check_modifiable(rel: &Relation) -> PgResult<()> {
    if rel.is_matview() && !matview_maintenance_active() {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("cannot change materialized view \"{}\"", rel.name),
        ));
    }
    Ok(())
}

/// The full new tuple: source columns placed at their target attributes,
/// everything else null.
fn form_new_tuple(rel: &Relation, target: &ModifyTarget<'_>, row: &TupleTableSlot) -> Vec<Datum> {
    let mut values = vec![Datum::Null; rel.desc.attrs.len()];
    for (&attno, value) in target.target_cols.iter().zip(&row.values) {
        if let Some(slot) = usize::try_from(attno - 1).ok().and_then(|idx| values.get_mut(idx)) {
            *slot = value.clone();
        }
    }
    values
}

fn source_ctid(target: &ModifyTarget<'_>, row: &TupleTableSlot) -> PgResult<ItemPointer> {
    let col = target
        .ctid_col
        .ok_or_else(|| elog("ModifyTable node has no ctid column"))?;
    match row.get_attr(col)? {
        Datum::Tid(tid) => Ok(tid),
        other => Err(elog(format!("ctid column holds {other:?}"))),
    }
}

fn project_returning(
    target: &ModifyTarget<'_>,
    stored: &TupleTableSlot,
    source: &TupleTableSlot,
    estate: &mut EState,
    out: &mut Vec<TupleTableSlot>,
) -> PgResult<()> {
    if target.returning.is_empty() {
        return Ok(());
    }
    let ctx = ExprContext::default().with_scan(stored).with_outer(source);
    out.push(exec_project(target.returning, &ctx, estate)?);
    Ok(())
}

pub fn exec_modify_table(
    plan: &Plan,
    target: ModifyTarget<'_>,
    estate: &mut EState,
) -> PgResult<Vec<TupleTableSlot>> {
    let catalog = Arc::clone(&estate.catalog);
    let rel = catalog
        .relation(target.relid)
        .ok_or_else(|| elog(format!("relation {} does not exist", target.relid)))?;
    check_modifiable(rel)?;

    let source = exec_outer_plan(plan, estate)?;
    let cid = estate.command_id;
    let mut returned = Vec::new();
    for row in &source {
        check_for_interrupts()?;
        match target.operation {
            CmdType::Insert => {
                let mut slot = TupleTableSlot::new(form_new_tuple(rel, &target, row));
                slot.tableoid = rel.oid;
                exec_constraints(rel, &slot, estate)?;
                check_unique_constraints(rel, &slot, estate)?;
                let tid = heap_insert(rel.relfilenode, slot.values.clone(), cid)?;
                slot.tid = Some(tid);
                trace!(relation = %rel.name, ?tid, "inserted tuple");
                estate.processed += 1;
                project_returning(&target, &slot, row, estate, &mut returned)?;
            }
            CmdType::Update => {
                let old = source_ctid(&target, row)?;
                let mut slot = TupleTableSlot::from_heap(form_new_tuple(rel, &target, row), old, rel.oid);
                exec_constraints(rel, &slot, estate)?;
                check_unique_constraints(rel, &slot, estate)?;
                let Some(new) = heap_update(rel.relfilenode, old, slot.values.clone(), cid)? else {
                    trace!(relation = %rel.name, tid = ?old, "tuple already updated by this command");
                    continue;
                };
                slot.tid = Some(new);
                estate.processed += 1;
                project_returning(&target, &slot, row, estate, &mut returned)?;
            }
            CmdType::Delete => {
                let tid = source_ctid(&target, row)?;
                let Some(values) = heap_fetch(rel.relfilenode, tid, estate.snapshot)? else {
                    continue;
                };
                if !heap_delete(rel.relfilenode, tid, cid)? {
                    continue;
                }
                estate.processed += 1;
                let slot = TupleTableSlot::from_heap(values, tid, rel.oid);
                project_returning(&target, &slot, row, estate, &mut returned)?;
            }
            other => return Err(elog(format!("unexpected ModifyTable operation {other:?}"))),
        }
    }
    debug!(
        operation = ?target.operation,
        relation = %rel.name,
        processed = estate.processed,
        "ModifyTable finished"
    );
    Ok(returned)
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn insert_update_delete_with_returning() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE mt (id int, v text)").unwrap();
            let inserted = run_statement("INSERT INTO mt VALUES (1, 'a'), (2, 'b') RETURNING id")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(inserted.rows_affected, 2);
            assert_eq!(inserted.rows, vec![vec![Datum::Int4(1)], vec![Datum::Int4(2)]]);

            let updated = run_statement("UPDATE mt SET v = v || '!' WHERE id = 2 RETURNING v")
                .unwrap()
                .pop()
                .unwrap();
            assert_eq!(updated.command_tag, "UPDATE 1");
            assert_eq!(updated.rows, vec![vec![Datum::text("b!")]]);

            let deleted = run_statement("DELETE FROM mt WHERE id = 1").unwrap().pop().unwrap();
            assert_eq!(deleted.command_tag, "DELETE 1");
            let rest = run_statement("SELECT id, v FROM mt").unwrap().pop().unwrap();
            assert_eq!(rest.rows, vec![vec![Datum::Int4(2), Datum::text("b!")]]);
        });
    }

    #[test]
    fn constraints_are_enforced() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE ct (id int PRIMARY KEY, n int NOT NULL CHECK (n > 0))").unwrap();
            run_statement("INSERT INTO ct VALUES (1, 1)").unwrap();
            assert_eq!(run_statement("INSERT INTO ct VALUES (1, 2)").unwrap_err().code(), "23505");
            assert_eq!(run_statement("INSERT INTO ct VALUES (2, NULL)").unwrap_err().code(), "23502");
            assert_eq!(run_statement("INSERT INTO ct VALUES (2, 0)").unwrap_err().code(), "23514");
            // an update may keep its own key
            run_statement("UPDATE ct SET n = 5 WHERE id = 1").unwrap();
        });
    }

    #[test]
    fn materialized_views_reject_dml() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE MATERIALIZED VIEW mv AS SELECT 1 AS x").unwrap();
            let err = run_statement("DELETE FROM mv").unwrap_err();
            assert_eq!(err.code(), "42809");
        });
    }
}
