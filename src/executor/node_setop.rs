//! UNION, INTERSECT and EXCEPT, with and without ALL.
//!
//! Rows are compared as whole tuples; two nulls in the same column count as
//! equal. Output keeps the order in which rows were first seen.

use std::collections::HashMap;

use crate::nodes::datum::{KeyDatum, row_group_key};
use crate::nodes::parsenodes::SetOperation;
use crate::nodes::plannodes::Plan;
use crate::utils::elog::{PgResult, elog};

use super::exec_proc_node::exec_proc_node;
use super::exec_utils::{EState, ExprContext, exec_project};
use super::tuptable::TupleTableSlot;

fn project_child(plan: &Plan, child: Option<&Plan>, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let child = child.ok_or_else(|| elog("SetOp node is missing an input"))?;
    let rows = exec_proc_node(child, estate)?;
    rows.iter()
        .map(|row| exec_project(&plan.targetlist, &ExprContext::default().with_outer(row), estate))
        .collect()
}

/// Distinct rows in first-seen order, each with its number of occurrences.
fn count_rows(rows: Vec<TupleTableSlot>) -> (Vec<(Vec<KeyDatum>, TupleTableSlot)>, HashMap<Vec<KeyDatum>, usize>) {
    let mut order = Vec::new();
    let mut counts: HashMap<Vec<KeyDatum>, usize> = HashMap::new();
    for row in rows {
        let key = row_group_key(&row.values);
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push((key, row));
        }
        *count += 1;
    }
    (order, counts)
}

pub fn exec_setop(plan: &Plan, op: SetOperation, all: bool, estate: &mut EState) -> PgResult<Vec<TupleTableSlot>> {
    let left = project_child(plan, plan.lefttree.as_deref(), estate)?;
    let right = project_child(plan, plan.righttree.as_deref(), estate)?;

    if op == SetOperation::Union && all {
        let mut out = left;
        out.extend(right);
        return Ok(out);
    }

    let (left_rows, left_counts) = count_rows(left);
    let mut out = Vec::new();
    match op {
        SetOperation::Union => {
            let mut combined = left_rows;
            let (right_rows, _) = count_rows(right);
            combined.extend(right_rows.into_iter().filter(|(key, _)| !left_counts.contains_key(key)));
            out.extend(combined.into_iter().map(|(_, row)| row));
        }
        SetOperation::Intersect | SetOperation::Except => {
            let (_, right_counts) = count_rows(right);
            for (key, row) in left_rows {
                let nleft = left_counts.get(&key).copied().unwrap_or(0);
                let nright = right_counts.get(&key).copied().unwrap_or(0);
                let copies = match (op, all) {
                    (SetOperation::Intersect, true) => nleft.min(nright),
                    (SetOperation::Intersect, false) => usize::from(nright > 0),
                    (_, true) => nleft.saturating_sub(nright),
                    (_, false) => usize::from(nright == 0),
                };
                out.extend(std::iter::repeat_n(row, copies));
            }
        }
        SetOperation::None => return Err(elog("SetOp node without a set operation")),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::nodes::datum::Datum;
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn ints(sql: &str) -> Vec<i32> {
        run_statement(sql)
            .unwrap()
            .pop()
            .unwrap()
            .rows
            .into_iter()
            .map(|row| match row[0] {
                Datum::Int4(v) => v,
                ref other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn set_operations_follow_all_semantics() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            assert_eq!(ints("SELECT 1 UNION SELECT 2 UNION SELECT 1"), vec![1, 2]);
            assert_eq!(ints("SELECT 1 UNION ALL SELECT 1"), vec![1, 1]);
            assert_eq!(
                ints("SELECT x FROM (VALUES (1), (1), (2)) a(x) INTERSECT ALL SELECT y FROM (VALUES (1), (1), (1)) b(y)"),
                vec![1, 1]
            );
            assert_eq!(
                ints("SELECT x FROM (VALUES (1), (1), (2)) a(x) EXCEPT ALL SELECT y FROM (VALUES (1)) b(y)"),
                vec![1, 2]
            );
            assert_eq!(
                ints("SELECT x FROM (VALUES (1), (1), (2)) a(x) EXCEPT SELECT y FROM (VALUES (1)) b(y)"),
                vec![2]
            );
        });
    }
}
