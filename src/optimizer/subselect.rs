//! Sub-selects in expressions, and references across query levels.
//!
//! A SubLink is planned as a separate plan and replaced by a SubPlan node
//! (evaluated per use) or, when it does not depend on the outer query, by an
//! InitPlan whose outputs land in PARAM_EXEC slots the first time they are
//! read. Vars and aggregates of an outer query level become PARAM_EXEC
//! params that the enclosing SubPlan sets from its `args` before running.

use tracing::debug;

use crate::catalog::oid::INVALID_OID;
use crate::catalog::pg_type::{BOOLOID, RECORDOID};
use crate::nodes::makefuncs::{make_null_const, make_param};
use crate::nodes::node_funcs::{
    expr_collation, expr_type, expr_typmod, expression_tree_mutator, mutate_query_exprs,
};
use crate::nodes::parsenodes::{CmdType, Query, RangeTblEntry, RteKind};
use crate::nodes::primnodes::{Expr, ParamKind, RowExpr, SubLink, SubLinkType, SubPlan, CoercionForm, Location};
use crate::optimizer::planner::{PlanParam, PlannerGlobal};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

impl PlannerGlobal<'_> {
    /// Replace every SubLink in `expr` with a SubPlan or InitPlan output.
    pub(crate) fn process_sublinks(&mut self, expr: Expr) -> PgResult<Expr> {
        match expr {
            Expr::SubLink(mut sublink) => {
                sublink.testexpr = sublink
                    .testexpr
                    .take()
                    .map(|test| self.process_sublinks(test))
                    .transpose()?;
                self.make_subplan(*sublink)
            }
            other => expression_tree_mutator(other, &mut |child| self.process_sublinks(child)),
        }
    }

    fn make_subplan(&mut self, sublink: SubLink) -> PgResult<Expr> {
        let SubLink {
            sub_link_type,
            sub_link_id,
            testexpr,
            subselect,
            result_type,
            ..
        } = sublink;

        let (first_col_type, first_col_typmod, first_col_collation) = subselect
            .visible_targets()
            .next()
            .map_or((INVALID_OID, -1, INVALID_OID), |tle| {
                (expr_type(&tle.expr), expr_typmod(&tle.expr), expr_collation(&tle.expr))
            });
        let column_types: Vec<(u32, i32, u32)> = subselect
            .visible_targets()
            .map(|tle| (expr_type(&tle.expr), expr_typmod(&tle.expr), expr_collation(&tle.expr)))
            .collect();

        let depth = self.levels.len().checked_sub(1).ok_or_else(|| elog("no active planner level"))?;
        let saved = std::mem::take(&mut self.levels[depth].plan_params);
        let planned = self.subquery_planner(*subselect);
        let plan_params = std::mem::replace(&mut self.levels[depth].plan_params, saved);
        let plan = planned?;
        let plan_id = self.add_subplan(plan);

        let needs_column_params = matches!(
            sub_link_type,
            SubLinkType::Any | SubLinkType::All | SubLinkType::RowCompare | SubLinkType::MultiExpr
        );
        let param_ids: Vec<i32> = if needs_column_params {
            column_types
                .iter()
                .map(|&(typid, typmod, _)| self.new_param(typid, typmod))
                .collect()
        } else {
            Vec::new()
        };
        let testexpr = match testexpr {
            Some(test) if sub_link_type != SubLinkType::MultiExpr => {
                Some(convert_testexpr(test, &param_ids, &column_types)?)
            }
            _ => None,
        };
        if sub_link_type == SubLinkType::MultiExpr {
            let slot = usize::try_from(sub_link_id - 1).map_err(|_| elog("invalid MULTIEXPR sub-link id"))?;
            let level = &mut self.levels[depth];
            if level.multiexpr_params.len() <= slot {
                level.multiexpr_params.resize(slot + 1, Vec::new());
            }
            level.multiexpr_params[slot] = param_ids.clone();
        }

        let mut subplan = SubPlan {
            sub_link_type,
            testexpr: None,
            param_ids: Vec::new(),
            plan_id,
            plan_name: String::new(),
            first_col_type,
            first_col_typmod,
            first_col_collation,
            result_type,
            set_param: Vec::new(),
            par_param: Vec::new(),
            args: Vec::new(),
        };

        let init_plan_kind = matches!(
            sub_link_type,
            SubLinkType::Exists
                | SubLinkType::Expr
                | SubLinkType::Array
                | SubLinkType::RowCompare
                | SubLinkType::MultiExpr
        );
        if plan_params.is_empty() && init_plan_kind {
            let replacement = match sub_link_type {
                SubLinkType::Exists => {
                    let prm = self.new_param(BOOLOID, -1);
                    subplan.set_param = vec![prm];
                    make_param(ParamKind::Exec, prm, BOOLOID, -1, INVALID_OID)
                }
                SubLinkType::Expr => {
                    let prm = self.new_param(first_col_type, first_col_typmod);
                    subplan.set_param = vec![prm];
                    make_param(ParamKind::Exec, prm, first_col_type, first_col_typmod, first_col_collation)
                }
                SubLinkType::Array => {
                    let prm = self.new_param(result_type, -1);
                    subplan.set_param = vec![prm];
                    make_param(ParamKind::Exec, prm, result_type, -1, first_col_collation)
                }
                SubLinkType::RowCompare => {
                    subplan.set_param = param_ids;
                    testexpr.ok_or_else(|| elog("ROWCOMPARE sub-link without a test expression"))?
                }
                _ => {
                    subplan.set_param = param_ids;
                    make_null_const(RECORDOID, -1, INVALID_OID)
                }
            };
            subplan.plan_name = format!("InitPlan {}", plan_id + 1);
            debug!(plan = %subplan.plan_name, kind = ?sub_link_type, params = ?subplan.set_param, "created InitPlan");
            self.levels[depth].init_plans.push(subplan);
            return Ok(replacement);
        }

        subplan.plan_name = format!("SubPlan {}", plan_id + 1);
        if sub_link_type == SubLinkType::MultiExpr {
            subplan.set_param = param_ids;
        } else {
            subplan.param_ids = param_ids;
        }
        subplan.testexpr = testexpr;
        for PlanParam { paramid, item } in plan_params {
            subplan.par_param.push(paramid);
            subplan.args.push(item);
        }
        debug!(
            plan = %subplan.plan_name,
            kind = ?sub_link_type,
            correlated = subplan.is_correlated(),
            "created SubPlan"
        );
        Ok(Expr::SubPlan(Box::new(subplan)))
    }

    /// Turn references to enclosing query levels into PARAM_EXEC params.
    pub(crate) fn replace_correlation_vars(&mut self, expr: Expr) -> PgResult<Expr> {
        match expr {
            Expr::Var(var) if var.varlevelsup > 0 => {
                let levelsup = var.varlevelsup;
                let (typid, typmod, collation) = (var.vartype, var.vartypmod, var.varcollid);
                let mut item = var;
                item.varlevelsup = 0;
                self.outer_param(levelsup, Expr::Var(item), typid, typmod, collation)
            }
            Expr::Aggref(agg) if agg.agglevelsup > 0 => {
                let levelsup = agg.agglevelsup;
                let (typid, collation) = (agg.aggtype, agg.aggcollid);
                let item = lower_sublevels(Expr::Aggref(agg), levelsup, 0)?;
                self.outer_param(levelsup, item, typid, -1, collation)
            }
            Expr::GroupingFunc(g) if g.agglevelsup > 0 => {
                let levelsup = g.agglevelsup;
                let item = lower_sublevels(Expr::GroupingFunc(g), levelsup, 0)?;
                self.outer_param(levelsup, item, crate::catalog::pg_type::INT4OID, -1, INVALID_OID)
            }
            other => expression_tree_mutator(other, &mut |child| self.replace_correlation_vars(child)),
        }
    }

    /// Register `item` (already rewritten to be level-0 at its owner) on the
    /// level `levelsup` above the current one and return its param.
    fn outer_param(
        &mut self,
        levelsup: u32,
        item: Expr,
        typid: u32,
        typmod: i32,
        collation: u32,
    ) -> PgResult<Expr> {
        let depth = self.levels.len().checked_sub(1).ok_or_else(|| elog("no active planner level"))?;
        let target = depth
            .checked_sub(levelsup as usize)
            .ok_or_else(|| elog(format!("outer reference {levelsup} levels up has no owning query")))?;
        let item = flatten_join_alias_vars(&self.levels[target].rtable, item)?;
        let existing = self.levels[target]
            .plan_params
            .iter()
            .find(|param| param.item == item)
            .map(|param| param.paramid);
        let paramid = match existing {
            Some(id) => id,
            None => {
                let id = self.new_param(typid, typmod);
                self.levels[target].plan_params.push(PlanParam { paramid: id, item });
                id
            }
        };
        for level in &mut self.levels[target + 1..] {
            if !level.ext_params.contains(&paramid) {
                level.ext_params.push(paramid);
            }
        }
        Ok(make_param(ParamKind::Exec, paramid, typid, typmod, collation))
    }

    /// Replace same-level Vars of other range-table entries (LATERAL
    /// references) with params the enclosing nested loop will set.
    pub(crate) fn replace_lateral_vars(&mut self, rtindex: u32, expr: Expr) -> PgResult<Expr> {
        match expr {
            Expr::Var(var) if var.varlevelsup == 0 && var.varno != rtindex => {
                let (typid, typmod, collation) = (var.vartype, var.vartypmod, var.varcollid);
                let item = Expr::Var(var);
                let level = self.levels.last().ok_or_else(|| elog("no active planner level"))?;
                let existing = level
                    .lateral_params
                    .iter()
                    .find(|param| param.item == item)
                    .map(|param| param.paramid);
                let paramid = match existing {
                    Some(id) => id,
                    None => {
                        let id = self.new_param(typid, typmod);
                        self.level_mut()?.lateral_params.push(PlanParam { paramid: id, item });
                        id
                    }
                };
                Ok(make_param(ParamKind::Exec, paramid, typid, typmod, collation))
            }
            other => expression_tree_mutator(other, &mut |child| self.replace_lateral_vars(rtindex, child)),
        }
    }
}

/// Replace the PARAM_SUBLINK placeholders of a test expression with the
/// PARAM_EXEC slots the sub-select's current row is stored in.
fn convert_testexpr(expr: Expr, param_ids: &[i32], columns: &[(u32, i32, u32)]) -> PgResult<Expr> {
    match expr {
        Expr::Param(param) if param.paramkind == ParamKind::Sublink => {
            let idx = usize::try_from(param.paramid - 1)
                .ok()
                .filter(|idx| *idx < param_ids.len())
                .ok_or_else(|| elog(format!("sub-link parameter {} out of range", param.paramid)))?;
            let (typid, typmod, collation) = columns[idx];
            Ok(make_param(ParamKind::Exec, param_ids[idx], typid, typmod, collation))
        }
        other => expression_tree_mutator(other, &mut |child| convert_testexpr(child, param_ids, columns)),
    }
}

/// Point the MULTIEXPR params of an UPDATE target list at the PARAM_EXEC
/// slots their sub-select fills. `ids[sub_link_id - 1][column - 1]`.
pub(crate) fn replace_multiexpr_params(expr: Expr, ids: &[Vec<i32>]) -> PgResult<Expr> {
    match expr {
        Expr::Param(param) if param.paramkind == ParamKind::Multiexpr => {
            let sub_link = (param.paramid >> 16) as usize;
            let column = (param.paramid & 0xFFFF) as usize;
            let paramid = sub_link
                .checked_sub(1)
                .and_then(|idx| ids.get(idx))
                .and_then(|cols| column.checked_sub(1).and_then(|c| cols.get(c)))
                .copied()
                .ok_or_else(|| elog(format!("unexpected MULTIEXPR parameter {}", param.paramid)))?;
            Ok(make_param(
                ParamKind::Exec,
                paramid,
                param.paramtype,
                param.paramtypmod,
                param.paramcollid,
            ))
        }
        other => expression_tree_mutator(other, &mut |child| replace_multiexpr_params(child, ids)),
    }
}

/// Expand Vars that name a join's output column into the expression the
/// join computes for it, so only base-relation Vars remain.
pub(crate) fn flatten_join_alias_vars(rtable: &[RangeTblEntry], expr: Expr) -> PgResult<Expr> {
    match expr {
        Expr::Var(var) if var.varlevelsup == 0 => {
            let rte = (var.varno as usize).checked_sub(1).and_then(|idx| rtable.get(idx));
            let Some(RangeTblEntry {
                kind: RteKind::Join { joinaliasvars, .. },
                eref,
                ..
            }) = rte
            else {
                return Ok(Expr::Var(var));
            };
            if var.varattno == 0 {
                let args = joinaliasvars
                    .iter()
                    .map(|alias| flatten_join_alias_vars(rtable, alias.clone()))
                    .collect::<PgResult<Vec<_>>>()?;
                return Ok(Expr::RowExpr(Box::new(RowExpr {
                    args,
                    row_typeid: RECORDOID,
                    row_format: CoercionForm::ImplicitCast,
                    colnames: eref.colnames.clone(),
                    location: Location(None),
                })));
            }
            let alias = usize::try_from(var.varattno)
                .ok()
                .and_then(|attno| attno.checked_sub(1))
                .and_then(|idx| joinaliasvars.get(idx))
                .ok_or_else(|| {
                    PgError::new(
                        SqlState::InternalError,
                        format!("invalid join column {} of range table entry {}", var.varattno, var.varno),
                    )
                })?;
            flatten_join_alias_vars(rtable, alias.clone())
        }
        other => expression_tree_mutator(other, &mut |child| flatten_join_alias_vars(rtable, child)),
    }
}

/// Subtract `delta` from the level of every reference at or above
/// `min_sublevels_up`, descending into sub-selects.
fn lower_sublevels(expr: Expr, delta: u32, min_sublevels_up: u32) -> PgResult<Expr> {
    match expr {
        Expr::Var(mut var) => {
            if var.varlevelsup >= min_sublevels_up + delta {
                var.varlevelsup -= delta;
            }
            Ok(Expr::Var(var))
        }
        Expr::Aggref(mut agg) => {
            if agg.agglevelsup >= min_sublevels_up + delta {
                agg.agglevelsup -= delta;
            }
            expression_tree_mutator(Expr::Aggref(agg), &mut |e| lower_sublevels(e, delta, min_sublevels_up))
        }
        Expr::GroupingFunc(mut g) => {
            if g.agglevelsup >= min_sublevels_up + delta {
                g.agglevelsup -= delta;
            }
            expression_tree_mutator(Expr::GroupingFunc(g), &mut |e| lower_sublevels(e, delta, min_sublevels_up))
        }
        Expr::SubLink(mut sublink) => {
            let mut sub = std::mem::replace(&mut *sublink.subselect, Query::new(CmdType::Select));
            mutate_query_exprs(&mut sub, &mut |e| lower_sublevels(e, delta, min_sublevels_up + 1))?;
            *sublink.subselect = sub;
            expression_tree_mutator(Expr::SubLink(sublink), &mut |e| lower_sublevels(e, delta, min_sublevels_up))
        }
        other => expression_tree_mutator(other, &mut |e| lower_sublevels(e, delta, min_sublevels_up)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;
    use crate::nodes::makefuncs::make_var;

    #[test]
    fn sublink_params_map_to_exec_slots() {
        let test = make_param(ParamKind::Sublink, 2, INT4OID, -1, INVALID_OID);
        let columns = [(INT4OID, -1, INVALID_OID), (INT4OID, -1, INVALID_OID)];
        let converted = convert_testexpr(test, &[7, 8], &columns).unwrap();
        assert!(matches!(converted, Expr::Param(p) if p.paramkind == ParamKind::Exec && p.paramid == 8));
        let bad = make_param(ParamKind::Sublink, 3, INT4OID, -1, INVALID_OID);
        assert!(convert_testexpr(bad, &[7, 8], &columns).is_err());
    }

    #[test]
    fn multiexpr_params_follow_sub_link_and_column() {
        let param = make_param(ParamKind::Multiexpr, (2 << 16) | 1, INT4OID, -1, INVALID_OID);
        let ids = vec![vec![3, 4], vec![5]];
        let replaced = replace_multiexpr_params(param, &ids).unwrap();
        assert!(matches!(replaced, Expr::Param(p) if p.paramid == 5));
    }

    #[test]
    fn outer_aggregate_levels_drop() {
        let var = make_var(1, 1, INT4OID, -1, INVALID_OID, 2);
        let lowered = lower_sublevels(var, 2, 0).unwrap();
        assert!(matches!(lowered, Expr::Var(v) if v.varlevelsup == 0));
    }
}
