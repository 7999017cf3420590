//! ProjectSet: set-returning functions in the target list.
//!
//! Every function of the node is run to completion for an input row; the
//! row is emitted as many times as the longest result, with shorter results
//! padded by nulls.

use crate::nodes::datum::Datum;
use crate::nodes::plannodes::Plan;
use crate::nodes::primnodes::Expr;
use crate::utils::elog::PgResult;
use crate::utils::interrupt::check_for_interrupts;

use super::exec_expr::exec_eval_set_function;
use super::exec_proc_node::{RowSink, exec_outer_plan_each};
use super::exec_utils::{EState, ExprContext, exec_project, exec_qual};

pub fn exec_project_set(
    plan: &Plan,
    srfs: &[Expr],
    srf_params: &[i32],
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    exec_outer_plan_each(plan, estate, &mut |row, estate| {
        check_for_interrupts()?;
        let ctx = ExprContext::default().with_outer(&row);
        let sets = srfs
            .iter()
            .map(|srf| exec_eval_set_function(srf, &ctx, estate))
            .collect::<PgResult<Vec<_>>>()?;
        let nrows = sets.iter().map(Vec::len).max().unwrap_or(0);
        for idx in 0..nrows {
            for (set, &paramid) in sets.iter().zip(srf_params) {
                estate.set_param(paramid, set.get(idx).cloned().unwrap_or(Datum::Null))?;
            }
            if exec_qual(&plan.qual, &ctx, estate, false)? {
                let projected = exec_project(&plan.targetlist, &ctx, estate)?;
                if !sink(projected, estate)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn shorter_sets_are_padded_with_nulls() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let rows = run_statement("SELECT unnest(ARRAY[1, 2, 3]), unnest(ARRAY['a', 'b'])")
                .unwrap()
                .pop()
                .unwrap()
                .rows;
            assert_eq!(
                rows,
                vec![
                    vec![Datum::Int4(1), Datum::text("a")],
                    vec![Datum::Int4(2), Datum::text("b")],
                    vec![Datum::Int4(3), Datum::Null],
                ]
            );
        });
    }
}
