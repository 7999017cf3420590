//! LIMIT / OFFSET.

use crate::nodes::plannodes::Plan;
use crate::nodes::primnodes::Expr;
use crate::utils::adt::int_arithmetic::int_arg;
use crate::utils::elog::{PgError, PgResult, SqlState};

use super::exec_expr::exec_eval_expr;
use super::exec_proc_node::{RowSink, exec_outer_plan_each};
use super::exec_utils::{EState, ExprContext};

/// Evaluate a LIMIT or OFFSET expression; null means "no limit" / zero.
fn bound_value(expr: Option<&Expr>, estate: &mut EState) -> PgResult<Option<i64>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let value = exec_eval_expr(expr, &ExprContext::default(), estate)?;
    if value.is_null() {
        return Ok(None);
    }
    int_arg(&value).map(Some)
}

/// Skips `OFFSET` rows, then passes on at most `LIMIT` rows and stops its
/// input as soon as the last one is delivered.
pub fn exec_limit(
    plan: &Plan,
    offset: Option<&Expr>,
    count: Option<&Expr>,
    estate: &mut EState,
    sink: &mut RowSink<'_>,
) -> PgResult<bool> {
    let offset = bound_value(offset, estate)?.unwrap_or(0);
    if offset < 0 {
        return Err(PgError::new(
            SqlState::InvalidRowCountInResultOffsetClause,
            "OFFSET must not be negative",
        ));
    }
    let count = bound_value(count, estate)?;
    if count.is_some_and(|count| count < 0) {
        return Err(PgError::new(
            SqlState::InvalidRowCountInLimitClause,
            "LIMIT must not be negative",
        ));
    }
    let mut remaining = count;
    if remaining == Some(0) {
        return Ok(true);
    }
    let mut skip = offset;
    let completed = exec_outer_plan_each(plan, estate, &mut |row, estate| {
        if skip > 0 {
            skip -= 1;
            return Ok(true);
        }
        if !sink(row, estate)? {
            return Ok(false);
        }
        Ok(match remaining.as_mut() {
            Some(left) => {
                *left -= 1;
                *left > 0
            }
            None => true,
        })
    })?;
    // Reaching the limit is a normal end of this node's output.
    Ok(completed || remaining == Some(0))
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    #[test]
    fn offset_then_limit() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let rows = run_statement("SELECT x FROM (VALUES (1), (2), (3), (4)) v(x) ORDER BY x LIMIT 2 OFFSET 1")
                .unwrap()
                .pop()
                .unwrap()
                .rows;
            assert_eq!(rows, vec![vec![Datum::Int4(2)], vec![Datum::Int4(3)]]);
        });
    }

    #[test]
    fn negative_bounds_are_rejected() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let err = run_statement("SELECT 1 LIMIT -1").unwrap_err();
            assert_eq!(err.code(), "2201W");
            let err = run_statement("SELECT 1 OFFSET -1").unwrap_err();
            assert_eq!(err.code(), "2201X");
        });
    }
}
