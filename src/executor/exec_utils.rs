//! Executor state shared by every node of one statement, and the
//! per-evaluation expression context.

use std::collections::HashMap;
use std::sync::Arc;

use crate::access::xact::{CommandId, current_command_id};
use crate::catalog::Catalog;
use crate::nodes::datum::Datum;
use crate::nodes::params::ParamListInfo;
use crate::nodes::plannodes::{Plan, PlannedStmt};
use crate::nodes::primnodes::{Expr, SubLinkType, SubPlan, TargetEntry};
use crate::storage::heap::Snapshot;
use crate::utils::elog::{PgResult, elog};

use super::exec_expr::exec_eval_expr;
use super::tuptable::TupleTableSlot;

/// One PARAM_EXEC slot. `pending` holds the InitPlan that computes the value
/// when it has not run yet.
#[derive(Debug, Clone, Default)]
pub struct ParamExecData {
    pub value: Datum,
    pub pending: Option<SubPlan>,
}

/// Per-statement executor state.
#[derive(Debug)]
pub struct EState {
    pub catalog: Arc<Catalog>,
    pub snapshot: Snapshot,
    /// Command id stamped on tuples this statement writes.
    pub command_id: CommandId,
    pub subplans: Arc<Vec<Plan>>,
    pub params: ParamListInfo,
    pub param_exec: Vec<ParamExecData>,
    /// Materialized output of uncorrelated sub-plans, by plan id.
    pub subplan_cache: HashMap<usize, Arc<Vec<TupleTableSlot>>>,
    /// Materialized output of CTEs, by plan id.
    pub cte_cache: HashMap<usize, Arc<Vec<TupleTableSlot>>>,
    pub processed: u64,
}

impl EState {
    pub fn new(catalog: Arc<Catalog>, stmt: &PlannedStmt, params: ParamListInfo) -> Self {
        Self {
            catalog,
            snapshot: Snapshot::current(),
            command_id: current_command_id(),
            subplans: Arc::new(stmt.subplans.clone()),
            params,
            param_exec: vec![ParamExecData::default(); stmt.param_exec_types.len()],
            subplan_cache: HashMap::new(),
            cte_cache: HashMap::new(),
            processed: 0,
        }
    }

    /// State for evaluating catalog expressions (index keys, constraints)
    /// outside of any plan.
    pub fn standalone(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            snapshot: Snapshot::current(),
            command_id: current_command_id(),
            subplans: Arc::new(Vec::new()),
            params: ParamListInfo::default(),
            param_exec: Vec::new(),
            subplan_cache: HashMap::new(),
            cte_cache: HashMap::new(),
            processed: 0,
        }
    }

    pub fn param_slot(&mut self, paramid: i32) -> PgResult<&mut ParamExecData> {
        usize::try_from(paramid)
            .ok()
            .and_then(|idx| self.param_exec.get_mut(idx))
            .ok_or_else(|| elog(format!("no PARAM_EXEC slot {paramid}")))
    }

    pub fn set_param(&mut self, paramid: i32, value: Datum) -> PgResult<()> {
        let slot = self.param_slot(paramid)?;
        slot.value = value;
        slot.pending = None;
        Ok(())
    }

    pub fn subplan(&self, plan_id: usize) -> PgResult<&Plan> {
        self.subplans
            .get(plan_id)
            .ok_or_else(|| elog(format!("no sub-plan with id {plan_id}")))
    }
}

/// Inputs visible to one expression evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprContext<'a> {
    pub scan: Option<&'a TupleTableSlot>,
    pub outer: Option<&'a TupleTableSlot>,
    pub inner: Option<&'a TupleTableSlot>,
    /// Finished aggregate values of the current group, by `aggno`.
    pub agg_values: &'a [Datum],
    /// Window function results for the current row, by `wfuncno`.
    pub window_values: &'a [Datum],
    pub case_value: Option<&'a Datum>,
    pub domain_value: Option<&'a Datum>,
}

impl<'a> ExprContext<'a> {
    pub fn with_scan(mut self, slot: &'a TupleTableSlot) -> Self {
        self.scan = Some(slot);
        self
    }

    pub fn with_outer(mut self, slot: &'a TupleTableSlot) -> Self {
        self.outer = Some(slot);
        self
    }

    pub fn with_inner(mut self, slot: &'a TupleTableSlot) -> Self {
        self.inner = Some(slot);
        self
    }

    pub fn with_aggs(mut self, values: &'a [Datum]) -> Self {
        self.agg_values = values;
        self
    }

    pub fn with_window(mut self, values: &'a [Datum]) -> Self {
        self.window_values = values;
        self
    }

    pub fn with_case_value(mut self, value: &'a Datum) -> Self {
        self.case_value = Some(value);
        self
    }

    pub fn with_domain_value(mut self, value: &'a Datum) -> Self {
        self.domain_value = Some(value);
        self
    }
}

/// Test a conjunctive qualification. A clause evaluating to false fails the
/// qual. A null clause fails it only when `result_for_null` is false: WHERE
/// and join clauses pass false, constraint checks pass true.
pub fn exec_qual(
    quals: &[Expr],
    ctx: &ExprContext<'_>,
    estate: &mut EState,
    result_for_null: bool,
) -> PgResult<bool> {
    for qual in quals {
        match exec_eval_expr(qual, ctx, estate)? {
            Datum::Bool(true) => {}
            Datum::Null if result_for_null => {}
            Datum::Bool(false) | Datum::Null => return Ok(false),
            other => return Err(elog(format!("qualification returned non-boolean {other:?}"))),
        }
    }
    Ok(true)
}

/// Compute a node's target list into a new slot. Multiple-assignment
/// sub-selects run first since other columns read the params they set.
pub fn exec_project(tlist: &[TargetEntry], ctx: &ExprContext<'_>, estate: &mut EState) -> PgResult<TupleTableSlot> {
    let is_multiexpr =
        |tle: &TargetEntry| matches!(&tle.expr, Expr::SubPlan(sp) if sp.sub_link_type == SubLinkType::MultiExpr);
    for tle in tlist.iter().filter(|tle| is_multiexpr(tle)) {
        exec_eval_expr(&tle.expr, ctx, estate)?;
    }
    let mut values = Vec::with_capacity(tlist.len());
    for tle in tlist {
        if is_multiexpr(tle) {
            values.push(Datum::Null);
        } else {
            values.push(exec_eval_expr(&tle.expr, ctx, estate)?);
        }
    }
    Ok(TupleTableSlot::new(values))
}

/// Values of the non-junk columns of a projected row.
pub fn visible_values(tlist: &[TargetEntry], slot: &TupleTableSlot) -> Vec<Datum> {
    tlist
        .iter()
        .zip(&slot.values)
        .filter(|(tle, _)| !tle.resjunk)
        .map(|(_, value)| value.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::makefuncs::make_bool_const;

    fn estate() -> EState {
        let stmt = PlannedStmt {
            command_type: crate::nodes::parsenodes::CmdType::Select,
            can_set_tag: true,
            plan_tree: None,
            subplans: Vec::new(),
            param_exec_types: Vec::new(),
            utility_stmt: None,
        };
        EState::new(Arc::new(Catalog::default()), &stmt, ParamListInfo::default())
    }

    #[test]
    fn null_clause_outcome_depends_on_caller() {
        let mut estate = estate();
        let ctx = ExprContext::default();
        let quals = vec![make_bool_const(Some(true)), make_bool_const(None)];
        assert!(!exec_qual(&quals, &ctx, &mut estate, false).unwrap());
        assert!(exec_qual(&quals, &ctx, &mut estate, true).unwrap());
        let failing = vec![make_bool_const(None), make_bool_const(Some(false))];
        assert!(!exec_qual(&failing, &ctx, &mut estate, true).unwrap());
    }

    #[test]
    fn unknown_exec_param_is_an_error() {
        let mut estate = estate();
        assert!(estate.set_param(3, Datum::Int4(1)).is_err());
    }
}
