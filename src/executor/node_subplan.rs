//! Execution of sub-selects appearing in expressions.
//!
//! A SubPlan runs every time its expression is evaluated, after the outer
//! values it depends on are copied into its correlation params. An InitPlan
//! runs at most once per registration and stores its result in PARAM_EXEC
//! slots, which is how uncorrelated scalar sub-selects are evaluated.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::oid::INVALID_OID;
use crate::nodes::datum::{ArrayValue, Datum};
use crate::nodes::primnodes::{SubLinkType, SubPlan};
use crate::utils::adt::arrayfuncs::construct_from_subarrays;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

use super::exec_expr::exec_eval_expr;
use super::exec_proc_node::exec_proc_node_each;
use super::exec_utils::{EState, ExprContext, visible_values};
use super::tuptable::TupleTableSlot;

fn more_than_one_row() -> PgError {
    PgError::new(
        SqlState::CardinalityViolation,
        "more than one row returned by a subquery used as an expression",
    )
}

/// Feed the visible columns of sub-plan `plan_id`'s rows to `consume` until
/// it returns `false`. The sub-plan stops as soon as that happens, so rows
/// after the deciding one are never computed. Output of a `cacheable`
/// sub-plan that ran to the end is kept and replayed on later calls.
fn scan_subplan(
    plan_id: usize,
    cacheable: bool,
    estate: &mut EState,
    consume: &mut dyn FnMut(&TupleTableSlot, &mut EState) -> PgResult<bool>,
) -> PgResult<()> {
    if cacheable && let Some(rows) = estate.subplan_cache.get(&plan_id).cloned() {
        for row in rows.iter() {
            if !consume(row, estate)? {
                break;
            }
        }
        return Ok(());
    }
    let plans = Arc::clone(&estate.subplans);
    let plan = plans
        .get(plan_id)
        .ok_or_else(|| elog(format!("no sub-plan with id {plan_id}")))?;
    let mut kept = Vec::new();
    let completed = exec_proc_node_each(plan, estate, &mut |slot, estate| {
        let row = TupleTableSlot::new(visible_values(&plan.targetlist, &slot));
        let more = consume(&row, estate)?;
        if cacheable {
            kept.push(row);
        }
        Ok(more)
    })?;
    if cacheable && completed {
        estate.subplan_cache.insert(plan_id, Arc::new(kept));
    }
    Ok(())
}

/// At most one row of a sub-plan; a second row is an error.
fn single_row(plan_id: usize, cacheable: bool, estate: &mut EState) -> PgResult<Option<TupleTableSlot>> {
    let mut found: Option<TupleTableSlot> = None;
    let mut extra = false;
    scan_subplan(plan_id, cacheable, estate, &mut |row, _| {
        if found.is_some() {
            extra = true;
            return Ok(false);
        }
        found = Some(row.clone());
        Ok(true)
    })?;
    if extra {
        return Err(more_than_one_row());
    }
    Ok(found)
}

/// Whether a sub-plan produces any row; stops at the first one.
fn any_row(plan_id: usize, cacheable: bool, estate: &mut EState) -> PgResult<bool> {
    let mut found = false;
    scan_subplan(plan_id, cacheable, estate, &mut |_, _| {
        found = true;
        Ok(false)
    })?;
    Ok(found)
}

fn all_rows(plan_id: usize, cacheable: bool, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let mut rows = Vec::new();
    scan_subplan(plan_id, cacheable, estate, &mut |row, _| {
        rows.push(row.clone());
        Ok(true)
    })?;
    Ok(rows)
}

fn first_column(row: &TupleTableSlot) -> Datum {
    row.values.first().cloned().unwrap_or(Datum::Null)
}

fn collect_array(subplan: &SubPlan, rows: &[TupleTableSlot], estate: &EState) -> PgResult<Datum> {
    let values: Vec<Datum> = rows.iter().map(first_column).collect();
    if estate.catalog.is_array_type(subplan.first_col_type) {
        let elemtype = estate
            .catalog
            .element_type_of(subplan.first_col_type)
            .unwrap_or(INVALID_OID);
        if values.is_empty() {
            return Ok(Datum::array(ArrayValue::empty(elemtype)));
        }
        return construct_from_subarrays(elemtype, &values).map(Datum::array);
    }
    Ok(Datum::array(ArrayValue::from_vec(subplan.first_col_type, values)))
}

fn set_row_params(paramids: &[i32], row: Option<&TupleTableSlot>, estate: &mut EState) -> PgResult<()> {
    for (idx, &paramid) in paramids.iter().enumerate() {
        let value = row.and_then(|r| r.values.get(idx)).cloned().unwrap_or(Datum::Null);
        estate.set_param(paramid, value)?;
    }
    Ok(())
}

/// Evaluate a SubPlan expression.
pub fn exec_sub_plan(subplan: &SubPlan, ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<Datum> {
    for (&paramid, arg) in subplan.par_param.iter().zip(&subplan.args) {
        let value = exec_eval_expr(arg, ctx, estate)?;
        estate.set_param(paramid, value)?;
    }
    let plan_id = subplan.plan_id;
    let cacheable = !subplan.is_correlated() && estate.subplan(plan_id)?.ext_param.is_empty();
    trace!(plan = %subplan.plan_name, kind = ?subplan.sub_link_type, "running sub-plan");

    match subplan.sub_link_type {
        SubLinkType::Exists => any_row(plan_id, cacheable, estate).map(Datum::Bool),
        SubLinkType::Expr => Ok(single_row(plan_id, cacheable, estate)?.map_or(Datum::Null, |row| first_column(&row))),
        SubLinkType::Array => {
            let rows = all_rows(plan_id, cacheable, estate)?;
            collect_array(subplan, &rows, estate)
        }
        SubLinkType::RowCompare => {
            let Some(row) = single_row(plan_id, cacheable, estate)? else {
                return Ok(Datum::Null);
            };
            set_row_params(&subplan.param_ids, Some(&row), estate)?;
            let testexpr = subplan
                .testexpr
                .as_ref()
                .ok_or_else(|| elog("row comparison sub-plan has no test expression"))?;
            exec_eval_expr(testexpr, ctx, estate)
        }
        SubLinkType::Any | SubLinkType::All => {
            let is_any = subplan.sub_link_type == SubLinkType::Any;
            let testexpr = subplan
                .testexpr
                .as_ref()
                .ok_or_else(|| elog("ANY/ALL sub-plan has no test expression"))?;
            let mut found_null = false;
            let mut decided = false;
            scan_subplan(plan_id, cacheable, estate, &mut |row, estate| {
                set_row_params(&subplan.param_ids, Some(row), estate)?;
                match exec_eval_expr(testexpr, ctx, estate)? {
                    Datum::Bool(v) if v == is_any => {
                        decided = true;
                        Ok(false)
                    }
                    Datum::Bool(_) => Ok(true),
                    Datum::Null => {
                        found_null = true;
                        Ok(true)
                    }
                    other => Err(elog(format!("ANY/ALL test returned non-boolean {other:?}"))),
                }
            })?;
            Ok(if decided {
                Datum::Bool(is_any)
            } else if found_null {
                Datum::Null
            } else {
                Datum::Bool(!is_any)
            })
        }
        SubLinkType::MultiExpr => {
            let row = single_row(plan_id, cacheable, estate)?;
            set_row_params(&subplan.set_param, row.as_ref(), estate)?;
            Ok(Datum::Null)
        }
    }
}

/// Run an InitPlan and store its output in the params it sets.
pub fn exec_set_param_plan(initplan: &SubPlan, estate: &mut EState) -> PgResult<()> {
    debug!(plan = %initplan.plan_name, params = ?initplan.set_param, "running InitPlan");
    let plan_id = initplan.plan_id;
    match initplan.sub_link_type {
        SubLinkType::Exists => {
            let paramid = initplan
                .set_param
                .first()
                .copied()
                .ok_or_else(|| elog("EXISTS InitPlan sets no parameter"))?;
            let found = any_row(plan_id, false, estate)?;
            estate.set_param(paramid, Datum::Bool(found))
        }
        SubLinkType::Array => {
            let rows = all_rows(plan_id, false, estate)?;
            let value = collect_array(initplan, &rows, estate)?;
            let paramid = initplan
                .set_param
                .first()
                .copied()
                .ok_or_else(|| elog("ARRAY InitPlan sets no parameter"))?;
            estate.set_param(paramid, value)
        }
        SubLinkType::Expr | SubLinkType::RowCompare | SubLinkType::MultiExpr => {
            let row = single_row(plan_id, false, estate)?;
            set_row_params(&initplan.set_param, row.as_ref(), estate)
        }
        SubLinkType::Any | SubLinkType::All => Err(elog("ANY/ALL sub-select cannot be an InitPlan")),
    }
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn scalar(sql: &str) -> Datum {
        run_statement(sql).unwrap().pop().unwrap().rows.remove(0).remove(0)
    }

    #[test]
    fn exists_stops_at_the_first_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            // the second row would divide by zero
            assert_eq!(
                scalar("SELECT EXISTS (SELECT 1 / (x - 2) FROM generate_series(1, 3) x)"),
                Datum::Bool(true)
            );
        });
    }

    #[test]
    fn any_and_all_stop_at_the_deciding_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            assert_eq!(
                scalar("SELECT 1 = ANY (SELECT 1 / (2 - x) FROM generate_series(1, 2) x)"),
                Datum::Bool(true)
            );
            assert_eq!(
                scalar("SELECT 1 <> ALL (SELECT 1 / (2 - x) FROM generate_series(1, 2) x)"),
                Datum::Bool(false)
            );
            // undecided until the end: the failing row is reached
            let err = run_statement("SELECT 5 = ANY (SELECT 1 / (2 - x) FROM generate_series(1, 2) x)").unwrap_err();
            assert_eq!(err.code(), "22012");
        });
    }

    #[test]
    fn correlated_any_with_nulls_is_unknown() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let rows = run_statement(
                "SELECT v.a, v.a = ANY (SELECT w.b FROM (VALUES (1), (NULL::int)) w(b) WHERE w.b IS NULL OR w.b <= v.a) \
                 FROM (VALUES (1), (3)) v(a) ORDER BY v.a",
            )
            .unwrap()
            .pop()
            .unwrap()
            .rows;
            assert_eq!(
                rows,
                vec![vec![Datum::Int4(1), Datum::Bool(true)], vec![Datum::Int4(3), Datum::Null]]
            );
        });
    }

    #[test]
    fn scalar_sub_select_rejects_a_second_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("SELECT (SELECT x FROM generate_series(1, 2) x)").unwrap_err();
            assert_eq!(err.code(), "21000");
            assert_eq!(scalar("SELECT (SELECT x FROM generate_series(1, 0) x)"), Datum::Null);
        });
    }

    #[test]
    fn limit_stops_its_input() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let rows = run_statement("SELECT 1 / (2 - x) FROM generate_series(1, 3) x LIMIT 1")
                .unwrap()
                .pop()
                .unwrap()
                .rows;
            assert_eq!(rows, vec![vec![Datum::Int4(1)]]);
        });
    }
}
