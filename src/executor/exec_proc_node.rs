//! Dispatch of plan nodes to their executors.
//!
//! Nodes push their output rows one at a time into a [`RowSink`]. A sink
//! that returns `false` stops the node, and every node below it, before the
//! next row is produced. Scans, joins, projections and LIMIT stream; Sort,
//! Agg, WindowAgg, SetOp, table functions and ModifyTable read their whole
//! input first. InitPlans attached to a node are registered on entry and run
//! lazily, the first time one of their output params is read.

use tracing::trace;

use crate::nodes::plannodes::{Plan, PlanKind};
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::{StackDepthGuard, check_for_interrupts};

use super::exec_utils::EState;
use super::tuptable::TupleTableSlot;
use super::{
    node_agg, node_limit, node_modify_table, node_nestloop, node_project_set, node_scan, node_setop, node_sort,
    node_tablefunc, node_window_agg,
};

/// Consumer of a node's output. Returns `false` once it wants no more rows.
pub type RowSink<'s> = dyn FnMut(TupleTableSlot, &mut EState) -> PgResult<bool> + 's;

/// Run `plan`, handing every output row to `sink` as soon as it exists.
/// Returns `false` when the sink stopped the node early.
pub fn exec_proc_node_each(plan: &Plan, estate: &mut EState, sink: &mut RowSink<'_>) -> PgResult<bool> {
    check_for_interrupts()?;
    let _depth = StackDepthGuard::enter()?;
    register_init_plans(plan, estate)?;
    let completed = match &plan.kind {
        PlanKind::Result { resconstantqual } => {
            node_scan::exec_result(plan, resconstantqual.as_ref(), estate, sink)?
        }
        PlanKind::SeqScan { relid } => node_scan::exec_seq_scan(plan, *relid, estate, sink)?,
        PlanKind::SubqueryScan => node_scan::exec_subquery_scan(plan, estate, sink)?,
        PlanKind::FunctionScan {
            function,
            ordinality,
            returns_composite,
            ncols,
        } => node_scan::exec_function_scan(
            plan,
            node_scan::FunctionScanShape {
                function,
                ordinality: *ordinality,
                returns_composite: *returns_composite,
                ncols: *ncols,
            },
            estate,
            sink,
        )?,
        PlanKind::ValuesScan { values_lists } => node_scan::exec_values_scan(plan, values_lists, estate, sink)?,
        PlanKind::CteScan { plan_id } => node_scan::exec_cte_scan(plan, *plan_id, estate, sink)?,
        PlanKind::NestLoop {
            jointype,
            joinqual,
            nest_params,
        } => node_nestloop::exec_nestloop(plan, *jointype, joinqual, nest_params, estate, sink)?,
        PlanKind::ProjectSet { srfs, srf_params } => {
            node_project_set::exec_project_set(plan, srfs, srf_params, estate, sink)?
        }
        PlanKind::Limit { offset, count } => {
            node_limit::exec_limit(plan, offset.as_ref(), count.as_ref(), estate, sink)?
        }
        PlanKind::TableFuncScan { tablefunc } => {
            let rows = node_tablefunc::exec_table_func_scan(plan, tablefunc, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::Agg {
            strategy,
            group_exprs,
            aggs,
            ..
        } => {
            let rows = node_agg::exec_agg(plan, *strategy, group_exprs, aggs, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::WindowAgg { clauses, wfuncs } => {
            let rows = node_window_agg::exec_window_agg(plan, clauses, wfuncs, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::Sort { keys } => {
            let rows = node_sort::exec_sort(plan, keys, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::Unique { cols } => {
            let rows = node_sort::exec_unique(plan, cols, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::SetOp { op, all } => {
            let rows = node_setop::exec_setop(plan, *op, *all, estate)?;
            emit_rows(rows, estate, sink)?
        }
        PlanKind::ModifyTable {
            operation,
            relid,
            target_cols,
            ctid_col,
            returning,
        } => {
            let rows = node_modify_table::exec_modify_table(
                plan,
                node_modify_table::ModifyTarget {
                    operation: *operation,
                    relid: *relid,
                    target_cols,
                    ctid_col: *ctid_col,
                    returning,
                },
                estate,
            )?;
            emit_rows(rows, estate, sink)?
        }
    };
    trace!(node = plan.node_name(), completed, "plan node finished");
    Ok(completed)
}

/// Run `plan` to completion and return its output rows.
pub fn exec_proc_node(plan: &Plan, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let mut rows = Vec::new();
    exec_proc_node_each(plan, estate, &mut |row, _| {
        rows.push(row);
        Ok(true)
    })?;
    Ok(rows)
}

fn outer_child(plan: &Plan) -> PgResult<&Plan> {
    plan.lefttree
        .as_deref()
        .ok_or_else(|| elog(format!("{} node has no input plan", plan.node_name())))
}

/// All rows of a node's left (outer) child.
pub(crate) fn exec_outer_plan(plan: &Plan, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    exec_proc_node(outer_child(plan)?, estate)
}

/// Stream the rows of a node's left (outer) child into `sink`.
pub(crate) fn exec_outer_plan_each(plan: &Plan, estate: &mut EState, sink: &mut RowSink<'_>) -> PgResult<bool> {
    exec_proc_node_each(outer_child(plan)?, estate, sink)
}

/// Hand already materialized rows to `sink`.
pub(crate) fn emit_rows(
    rows: impl IntoIterator<Item = TupleTableSlot>,
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    for row in rows {
        if !sink(row, estate)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn register_init_plans(plan: &Plan, estate: &mut EState) -> PgResult<()> {
    for initplan in &plan.init_plan {
        for &paramid in &initplan.set_param {
            let slot = estate.param_slot(paramid)?;
            slot.pending = Some(initplan.clone());
        }
        trace!(plan_id = initplan.plan_id, params = ?initplan.set_param, "registered InitPlan");
    }
    Ok(())
}
