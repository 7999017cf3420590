//! Scan nodes: Result, SeqScan, SubqueryScan, FunctionScan, ValuesScan and
//! CteScan.
//!
//! Every scan produces candidate rows in its scan slot, filters them with
//! the node's qual and projects the target list over them.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::oid::Oid;
use crate::nodes::datum::Datum;
use crate::nodes::plannodes::Plan;
use crate::nodes::primnodes::Expr;
use crate::storage::heap::heap_beginscan;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::{exec_eval_expr, exec_eval_set_function};
use super::exec_proc_node::{RowSink, exec_outer_plan_each, exec_proc_node};
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};
use super::tuptable::TupleTableSlot;

/// Filter and project one scan tuple.
fn scan_row(plan: &Plan, scan: &TupleTableSlot, estate: &mut EState) -> PgResult<Option<TupleTableSlot>> {
    let ctx = ExprContext::default().with_scan(scan);
    if !exec_qual(&plan.qual, &ctx, estate, false)? {
        return Ok(None);
    }
    exec_project(&plan.targetlist, &ctx, estate).map(Some)
}

fn scan_rows(
    plan: &Plan,
    rows: impl IntoIterator<Item = TupleTableSlot>,
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    for (n, row) in rows.into_iter().enumerate() {
        if n % 1024 == 0 {
            check_for_interrupts()?;
        }
        if let Some(projected) = scan_row(plan, &row, estate)?
            && !sink(projected, estate)?
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Result: one row (or one per input row) when the constant qual holds.
pub fn exec_result(
    plan: &Plan,
    resconstantqual: Option<&Expr>,
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    if let Some(qual) = resconstantqual
        && !exec_qual(std::slice::from_ref(qual), &ExprContext::default(), estate, false)?
    {
        trace!("Result gated off by constant qual");
        return Ok(true);
    }
    if plan.lefttree.is_none() {
        let empty = TupleTableSlot::default();
        return scan_rows(plan, [empty], estate, sink);
    }
    exec_outer_plan_each(plan, estate, &mut |row, estate| {
        let ctx = ExprContext::default().with_outer(&row);
        if !exec_qual(&plan.qual, &ctx, estate, false)? {
            return Ok(true);
        }
        let projected = exec_project(&plan.targetlist, &ctx, estate)?;
        sink(projected, estate)
    })
}

pub fn exec_seq_scan(plan: &Plan, relid: Oid, estate: &mut EState, sink: &mut RowSink<'_>) -> PgResult<bool> {
    let (relfilenode, populated, name) = {
        let rel = estate
            .catalog
            .relation(relid)
            .ok_or_else(|| elog(format!("could not open relation with OID {relid}")))?;
        (rel.relfilenode, rel.populated, rel.name.clone())
    };
    if !populated {
        return Err(PgError::new(
            SqlState::ObjectNotInPrerequisiteState,
            format!("materialized view \"{name}\" has not been populated"),
        )
        .with_hint("Use the REFRESH MATERIALIZED VIEW command."));
    }
    let scan = heap_beginscan(relfilenode, estate.snapshot)?;
    trace!(relation = %name, relfilenode, "sequential scan");
    let rows = scan.map(|(tid, values)| TupleTableSlot::from_heap(values, tid, relid));
    scan_rows(plan, rows, estate, sink)
}

pub fn exec_subquery_scan(plan: &Plan, estate: &mut EState, sink: &mut RowSink<'_>) -> PgResult<bool> {
    exec_outer_plan_each(plan, estate, &mut |row, estate| match scan_row(plan, &row, estate)? {
        Some(projected) => sink(projected, estate),
        None => Ok(true),
    })
}

/// What a FunctionScan's function returns and how it becomes columns.
pub struct FunctionScanShape<'a> {
    pub function: &'a Expr,
    pub ordinality: bool,
    pub returns_composite: bool,
    pub ncols: usize,
}

/// FunctionScan. The function runs to completion first; its rows are then
/// filtered and projected one at a time. A composite result is spread over
/// `ncols` columns (a null result becomes a row of nulls); WITH ORDINALITY
/// appends a bigint counter.
pub fn exec_function_scan(
    plan: &Plan,
    shape: FunctionScanShape<'_>,
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    let ncols = shape.ncols;
    let results = exec_eval_set_function(shape.function, &ExprContext::default(), estate)?;
    let mut rows = Vec::with_capacity(results.len());
    for (idx, value) in results.into_iter().enumerate() {
        let mut values = if shape.returns_composite {
            match value {
                Datum::Null => vec![Datum::Null; ncols],
                Datum::Record(record) => {
                    let mut values = Arc::unwrap_or_clone(record).values;
                    if values.len() != ncols {
                        return Err(PgError::new(
                            SqlState::DatatypeMismatch,
                            "function return row and query-specified return row do not match",
                        )
                        .with_detail(format!(
                            "Returned row contains {} attributes, but query expects {ncols}.",
                            values.len()
                        )));
                    }
                    values.truncate(ncols);
                    values
                }
                other => return Err(elog(format!("function returning composite produced {other:?}"))),
            }
        } else {
            vec![value]
        };
        if shape.ordinality {
            values.push(Datum::Int8(idx as i64 + 1));
        }
        rows.push(TupleTableSlot::new(values));
    }
    scan_rows(plan, rows, estate, sink)
}

pub fn exec_values_scan(
    plan: &Plan,
    values_lists: &[Vec<Expr>],
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    let ctx = ExprContext::default();
    for list in values_lists {
        let values = list
            .iter()
            .map(|expr| exec_eval_expr(expr, &ctx, estate))
            .collect::<PgResult<Vec<_>>>()?;
        if let Some(projected) = scan_row(plan, &TupleTableSlot::new(values), estate)?
            && !sink(projected, estate)?
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// CteScan: the CTE's plan runs once per statement; every reference reads
/// the same materialized rows.
pub fn exec_cte_scan(plan: &Plan, plan_id: usize, estate: &mut EState, sink: &mut RowSink<'_>) -> PgResult<bool> {
    let rows = match estate.cte_cache.get(&plan_id) {
        Some(rows) => Arc::clone(rows),
        None => {
            let subplans = Arc::clone(&estate.subplans);
            let cte_plan = subplans
                .get(plan_id)
                .ok_or_else(|| elog(format!("no plan for CTE {plan_id}")))?;
            let rows = Arc::new(exec_proc_node(cte_plan, estate)?);
            estate.cte_cache.insert(plan_id, Arc::clone(&rows));
            rows
        }
    };
    scan_rows(plan, rows.iter().cloned(), estate, sink)
}
