//! Nested-loop join, including LEFT, RIGHT and FULL outer joins.
//!
//! Outer rows stream through. The inner side is materialized once unless it
//! depends on the outer row through LATERAL parameters, in which case it is
//! re-run for every outer row after those parameters are set.

use crate::nodes::parsenodes::JoinType;
use crate::nodes::plannodes::Plan;
use crate::nodes::primnodes::Expr;
use crate::utils::elog::{PgResult, elog};
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::exec_eval_expr;
use super::exec_proc_node::{RowSink, exec_outer_plan_each, exec_proc_node};
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};
use super::tuptable::TupleTableSlot;

pub fn exec_nestloop(
    plan: &Plan,
    jointype: JoinType,
    joinqual: &[Expr],
    nest_params: &[(i32, Expr)],
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    let inner_plan = plan
        .righttree
        .as_deref()
        .ok_or_else(|| elog("Nested Loop node has no inner plan"))?;
    let outer_width = plan.lefttree.as_ref().map_or(0, |p| p.targetlist.len());
    let inner_width = inner_plan.targetlist.len();

    let rescan_per_row = !nest_params.is_empty();
    let mut inner_rows = if rescan_per_row {
        Vec::new()
    } else {
        exec_proc_node(inner_plan, estate)?
    };
    let mut inner_matched = vec![false; inner_rows.len()];

    let completed = exec_outer_plan_each(plan, estate, &mut |outer, estate| {
        check_for_interrupts()?;
        if rescan_per_row {
            let outer_ctx = ExprContext::default().with_outer(&outer);
            for (paramid, expr) in nest_params {
                let value = exec_eval_expr(expr, &outer_ctx, estate)?;
                estate.set_param(*paramid, value)?;
            }
            inner_rows = exec_proc_node(inner_plan, estate)?;
        }

        let mut matched = false;
        for (idx, inner) in inner_rows.iter().enumerate() {
            let ctx = ExprContext::default().with_outer(&outer).with_inner(inner);
            if !exec_qual(joinqual, &ctx, estate, false)? {
                continue;
            }
            matched = true;
            if let Some(flag) = inner_matched.get_mut(idx) {
                *flag = true;
            }
            if exec_qual(&plan.qual, &ctx, estate, false)? {
                let joined = exec_project(&plan.targetlist, &ctx, estate)?;
                if !sink(joined, estate)? {
                    return Ok(false);
                }
            }
        }

        if !matched && matches!(jointype, JoinType::Left | JoinType::Full) {
            let nulls = TupleTableSlot::all_nulls(inner_width);
            let ctx = ExprContext::default().with_outer(&outer).with_inner(&nulls);
            if exec_qual(&plan.qual, &ctx, estate, false)? {
                let joined = exec_project(&plan.targetlist, &ctx, estate)?;
                return sink(joined, estate);
            }
        }
        Ok(true)
    })?;
    if !completed {
        return Ok(false);
    }

    if matches!(jointype, JoinType::Right | JoinType::Full) {
        let nulls = TupleTableSlot::all_nulls(outer_width);
        for (inner, matched) in inner_rows.iter().zip(&inner_matched) {
            if *matched {
                continue;
            }
            let ctx = ExprContext::default().with_outer(&nulls).with_inner(inner);
            if exec_qual(&plan.qual, &ctx, estate, false)? {
                let joined = exec_project(&plan.targetlist, &ctx, estate)?;
                if !sink(joined, estate)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn rows(sql: &str) -> Vec<Vec<Datum>> {
        run_statement(sql).unwrap().pop().unwrap().rows
    }

    #[test]
    fn full_join_keeps_unmatched_rows_of_both_sides() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows(
                "SELECT l.x, r.y FROM (VALUES (1), (2)) l(x) FULL JOIN (VALUES (2), (3)) r(y) ON l.x = r.y",
            );
            assert_eq!(
                out,
                vec![
                    vec![Datum::Int4(1), Datum::Null],
                    vec![Datum::Int4(2), Datum::Int4(2)],
                    vec![Datum::Null, Datum::Int4(3)],
                ]
            );
        });
    }

    #[test]
    fn lateral_subquery_sees_the_outer_row() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let out = rows("SELECT l.x, s.y FROM (VALUES (1), (2)) l(x), LATERAL (SELECT l.x * 10 AS y) s");
            assert_eq!(
                out,
                vec![
                    vec![Datum::Int4(1), Datum::Int4(10)],
                    vec![Datum::Int4(2), Datum::Int4(20)],
                ]
            );
        });
    }
}
