//! Query → plan.
//!
//! Each query level is planned bottom-up: the FROM tree becomes scans joined
//! by nested loops, then aggregation, window functions, set-returning
//! functions in the target list, ORDER BY, DISTINCT, LIMIT and finally the
//! ModifyTable node for INSERT/UPDATE/DELETE. Every node's expressions are
//! first built in terms of range-table Vars and then rewritten by
//! [`setrefs`](super::setrefs) to read the node's inputs by position.

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::Catalog;
use crate::nodes::makefuncs::{make_ands_explicit, make_ands_implicit, make_param, make_null_const, make_var};
use crate::nodes::node_funcs::{
    contain_window_function, expr_collation, expr_type, expr_typmod, expression_returns_set,
    expression_tree_mutator, expression_tree_walker, mutate_query_exprs, pull_vars,
};
use crate::nodes::parsenodes::{
    CmdType, JoinTreeNode, JoinType, Query, RangeTblEntry, RteKind, SetOpTree, SortGroupClause,
};
use crate::nodes::plannodes::{
    AggStrategy, AttrNumber, ParamExecType, Plan, PlanKind, PlannedStmt, SortExpr, SortKey,
    WindowPlanClause,
};
use crate::nodes::primnodes::{
    Aggref, Expr, INNER_VAR, Index, OUTER_VAR, ParamKind, SubPlan, TargetEntry, Var, WindowFunc,
};
use crate::optimizer::preptlist::{preprocess_targetlist, result_relation_oid};
use crate::optimizer::setrefs::{FixOptions, fix_join_expr, fix_upper_expr, forwarding_tlist, passthrough_tlist};
use crate::optimizer::subselect::{flatten_join_alias_vars, replace_multiexpr_params};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::interrupt::{StackDepthGuard, check_for_interrupts};

/// A value an inner plan reads from a PARAM_EXEC slot that its parent sets.
#[derive(Debug, Clone)]
pub(crate) struct PlanParam {
    pub paramid: i32,
    /// Expression at the owning level, evaluated to fill the slot.
    pub item: Expr,
}

/// Per-query-level planner state, stacked as sub-selects are planned.
#[derive(Debug, Default)]
pub(crate) struct PlannerLevel {
    pub rtable: Vec<RangeTblEntry>,
    /// Outer references from sub-selects of this level, passed as SubPlan args.
    pub plan_params: Vec<PlanParam>,
    /// References from LATERAL items to other FROM items of this level.
    pub lateral_params: Vec<PlanParam>,
    /// PARAM_EXEC ids owned by enclosing levels that this level reads.
    pub ext_params: Vec<i32>,
    pub cte_plan_ids: Vec<(String, usize)>,
    pub init_plans: Vec<SubPlan>,
    /// Output params of each UPDATE multiple-assignment sub-select.
    pub multiexpr_params: Vec<Vec<i32>>,
}

pub(crate) struct PlannerGlobal<'c> {
    pub catalog: &'c Catalog,
    pub subplans: Vec<Plan>,
    pub param_exec_types: Vec<ParamExecType>,
    pub levels: Vec<PlannerLevel>,
}

/// Plan an analyzed query.
pub fn planner(catalog: &Catalog, query: &Query) -> PgResult<PlannedStmt> {
    if query.command_type == CmdType::Utility {
        let stmt = query
            .utility_stmt
            .as_deref()
            .cloned()
            .ok_or_else(|| elog("utility query without a statement"))?;
        return Ok(PlannedStmt::utility(stmt));
    }
    let mut global = PlannerGlobal::new(catalog);
    let plan = global.subquery_planner(query.clone())?;
    debug!(
        command = ?query.command_type,
        top = plan.node_name(),
        subplans = global.subplans.len(),
        exec_params = global.param_exec_types.len(),
        "planned statement"
    );
    Ok(PlannedStmt {
        command_type: query.command_type,
        can_set_tag: query.can_set_tag,
        plan_tree: Some(plan),
        subplans: global.subplans,
        param_exec_types: global.param_exec_types,
        utility_stmt: None,
    })
}

/// How the expressions a node evaluates are rewritten against its inputs.
#[derive(Debug, Clone)]
enum Fixer {
    /// Scan nodes read their own Vars from the scan tuple.
    Scan,
    Join { outer: Vec<Expr>, inner: Vec<Expr> },
    Upper { input: Vec<Expr>, options: FixOptions },
}

/// A partially built plan together with what it outputs.
struct RelPlan {
    plan: Plan,
    /// Output columns in range-table terms.
    exprs: Vec<Expr>,
    relids: Vec<Index>,
    /// LATERAL params this subtree needs set from outside it.
    lateral_ids: Vec<i32>,
    fixer: Fixer,
}

impl RelPlan {
    fn scan(plan: Plan, exprs: Vec<Expr>) -> Self {
        Self {
            plan,
            exprs,
            relids: Vec::new(),
            lateral_ids: Vec::new(),
            fixer: Fixer::Scan,
        }
    }

    fn upper(plan: Plan, child: &RelPlan, options: FixOptions) -> Self {
        Self {
            plan,
            exprs: Vec::new(),
            relids: child.relids.clone(),
            lateral_ids: Vec::new(),
            fixer: Fixer::Upper {
                input: child.exprs.clone(),
                options,
            },
        }
    }

    fn fix(&self, expr: Expr) -> PgResult<Expr> {
        match &self.fixer {
            Fixer::Scan => Ok(expr),
            Fixer::Join { outer, inner } => fix_join_expr(expr, outer, inner),
            Fixer::Upper { input, options } => fix_upper_expr(expr, input, *options),
        }
    }

    /// Make the node compute `tlist`.
    fn set_output(&mut self, tlist: Vec<TargetEntry>) -> PgResult<()> {
        let mut exprs = Vec::with_capacity(tlist.len());
        let mut fixed = Vec::with_capacity(tlist.len());
        for (idx, tle) in tlist.into_iter().enumerate() {
            exprs.push(tle.expr.clone());
            fixed.push(TargetEntry {
                expr: self.fix(tle.expr)?,
                resno: (idx + 1) as i16,
                ..tle
            });
        }
        self.plan.targetlist = fixed;
        self.exprs = exprs;
        Ok(())
    }

    /// Stack a node that passes rows through unchanged.
    fn pass_through(self, kind: PlanKind) -> Self {
        let tlist = passthrough_tlist(&self.plan.targetlist);
        Self {
            plan: Plan::new(kind, tlist).with_left(self.plan),
            ..self
        }
    }
}

fn exprs_as_tlist(exprs: &[Expr]) -> Vec<TargetEntry> {
    exprs
        .iter()
        .enumerate()
        .map(|(idx, expr)| TargetEntry::new(expr.clone(), (idx + 1) as i16, None, false))
        .collect()
}

/// Scan node for one FROM item, before its output columns are known.
struct BaseScan {
    kind: PlanKind,
    child: Option<Plan>,
    lateral_ids: Vec<i32>,
}

impl<'c> PlannerGlobal<'c> {
    pub(crate) fn new(catalog: &'c Catalog) -> Self {
        Self {
            catalog,
            subplans: Vec::new(),
            param_exec_types: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Allocate a PARAM_EXEC slot.
    pub(crate) fn new_param(&mut self, typid: u32, typmod: i32) -> i32 {
        self.param_exec_types.push(ParamExecType { typid, typmod });
        (self.param_exec_types.len() - 1) as i32
    }

    pub(crate) fn add_subplan(&mut self, plan: Plan) -> usize {
        self.subplans.push(plan);
        self.subplans.len() - 1
    }

    pub(crate) fn level(&self) -> PgResult<&PlannerLevel> {
        self.levels.last().ok_or_else(|| elog("no active planner level"))
    }

    pub(crate) fn level_mut(&mut self) -> PgResult<&mut PlannerLevel> {
        self.levels.last_mut().ok_or_else(|| elog("no active planner level"))
    }

    /// Plan one query level, including everything below it.
    pub(crate) fn subquery_planner(&mut self, query: Query) -> PgResult<Plan> {
        check_for_interrupts()?;
        let _depth = StackDepthGuard::enter()?;
        self.levels.push(PlannerLevel {
            rtable: query.rtable.clone(),
            ..PlannerLevel::default()
        });
        let planned = self.plan_level(query);
        let level = self.levels.pop().ok_or_else(|| elog("planner level stack underflow"))?;
        let mut plan = planned?;
        plan.init_plan.extend(level.init_plans);
        let mut ext = level.ext_params;
        ext.sort_unstable();
        ext.dedup();
        plan.ext_param = ext;
        Ok(plan)
    }

    fn plan_level(&mut self, mut query: Query) -> PgResult<Plan> {
        for cte in &query.cte_list {
            let plan = self.subquery_planner((*cte.query).clone())?;
            let plan_id = self.add_subplan(plan);
            debug!(cte = %cte.ctename, plan_id, "planned common table expression");
            self.level_mut()?.cte_plan_ids.push((cte.ctename.clone(), plan_id));
        }

        if matches!(query.command_type, CmdType::Insert | CmdType::Update | CmdType::Delete) {
            preprocess_targetlist(self.catalog, &mut query)?;
        }

        let rtable = query.rtable.clone();
        mutate_query_exprs(&mut query, &mut |expr| flatten_join_alias_vars(&rtable, expr))?;
        mutate_query_exprs(&mut query, &mut |expr| self.process_sublinks(expr))?;
        mutate_query_exprs(&mut query, &mut |expr| self.replace_correlation_vars(expr))?;

        if query.command_type == CmdType::Update {
            let ids = self.level()?.multiexpr_params.clone();
            if !ids.is_empty() {
                for tle in &mut query.target_list {
                    let expr = std::mem::replace(&mut tle.expr, make_null_const(0, -1, 0));
                    tle.expr = replace_multiexpr_params(expr, &ids)?;
                }
            }
        }

        number_aggregates(&mut query)?;
        number_window_funcs(&mut query)?;
        self.grouping_planner(&query)
    }

    fn grouping_planner(&mut self, query: &Query) -> PgResult<Plan> {
        let tlist = query.target_list.clone();
        let has_agg = query.has_aggs || !query.group_clause.is_empty() || query.having_qual.is_some();
        let has_window = tlist.iter().any(|tle| contain_window_function(&tle.expr));
        let has_srf = tlist.iter().any(|tle| expression_returns_set(&tle.expr));

        let mut rel = match &query.set_operations {
            Some(_) => self.plan_set_operations(query)?,
            None => self.plan_jointree(query)?,
        };

        if !has_agg && !has_window && !has_srf {
            rel.set_output(tlist.clone())?;
        }
        if has_agg {
            let last = !has_window && !has_srf;
            rel = self.make_agg(query, rel, last.then_some(&tlist))?;
        }
        if has_window {
            rel = self.make_window_agg(query, rel, (!has_srf).then_some(&tlist))?;
        }
        if has_srf {
            rel = self.make_project_set(rel, &tlist)?;
        }

        if !query.sort_clause.is_empty() {
            let keys = query
                .sort_clause
                .iter()
                .map(|sgc| sort_key(&tlist, sgc))
                .collect::<PgResult<Vec<_>>>()?;
            rel = rel.pass_through(PlanKind::Sort { keys });
        }
        if !query.distinct_clause.is_empty() {
            let cols = query
                .distinct_clause
                .iter()
                .map(|sgc| tle_position(&tlist, sgc.tle_sort_group_ref))
                .collect::<PgResult<Vec<_>>>()?;
            rel = rel.pass_through(PlanKind::Unique { cols });
        }
        if query.limit_offset.is_some() || query.limit_count.is_some() {
            rel = rel.pass_through(PlanKind::Limit {
                offset: query.limit_offset.clone(),
                count: query.limit_count.clone(),
            });
        }

        match query.command_type {
            CmdType::Insert | CmdType::Update | CmdType::Delete => self.make_modify_table(query, rel),
            _ => Ok(rel.plan),
        }
    }

    // -- FROM clause ---------------------------------------------------------

    fn plan_jointree(&mut self, query: &Query) -> PgResult<RelPlan> {
        let mut leaves = Vec::new();
        for node in &query.jointree.fromlist {
            collect_leaves(node, &mut leaves);
        }
        let mut scans: HashMap<Index, BaseScan> = HashMap::new();
        for rtindex in leaves {
            let scan = self.prepare_scan(query, rtindex)?;
            scans.insert(rtindex, scan);
        }
        let needed = needed_vars(query, &self.level()?.lateral_params);

        let mut joined: Option<RelPlan> = None;
        for node in &query.jointree.fromlist {
            let item = self.build_join_node(node, &mut scans, &needed)?;
            joined = Some(match joined {
                None => item,
                Some(outer) => self.make_nestloop(JoinType::Inner, outer, item, Vec::new())?,
            });
        }

        let quals = make_ands_implicit(query.jointree.quals.clone());
        let rel = match joined {
            Some(mut rel) => {
                for qual in quals {
                    let fixed = rel.fix(qual)?;
                    rel.plan.qual.push(fixed);
                }
                rel
            }
            None => RelPlan::scan(
                Plan::new(
                    PlanKind::Result {
                        resconstantqual: make_ands_explicit(quals),
                    },
                    Vec::new(),
                ),
                Vec::new(),
            ),
        };
        if !rel.lateral_ids.is_empty() {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                "LATERAL reference to a FROM item that is not on its left",
            ));
        }
        debug!(top = rel.plan.node_name(), relids = ?rel.relids, "planned join tree");
        Ok(rel)
    }

    fn prepare_scan(&mut self, query: &Query, rtindex: Index) -> PgResult<BaseScan> {
        let rte = query
            .rte(rtindex)
            .ok_or_else(|| elog(format!("invalid range table index {rtindex}")))?;
        let mut scan = BaseScan {
            kind: PlanKind::SubqueryScan,
            child: None,
            lateral_ids: Vec::new(),
        };
        match &rte.kind {
            RteKind::Relation { relid, .. } => scan.kind = PlanKind::SeqScan { relid: *relid },
            RteKind::Subquery { subquery } => {
                let saved = std::mem::take(&mut self.level_mut()?.plan_params);
                let planned = self.subquery_planner((**subquery).clone());
                let lateral = std::mem::replace(&mut self.level_mut()?.plan_params, saved);
                scan.child = Some(planned?);
                scan.lateral_ids = lateral.iter().map(|param| param.paramid).collect();
                self.level_mut()?.lateral_params.extend(lateral);
            }
            RteKind::Function {
                function,
                ordinality,
                columns,
                returns_composite,
            } => {
                let function = self.replace_lateral_vars(rtindex, function.clone())?;
                scan.lateral_ids = self.lateral_ids_in(&[&function])?;
                scan.kind = PlanKind::FunctionScan {
                    function,
                    ordinality: *ordinality,
                    returns_composite: *returns_composite,
                    ncols: columns.len() - usize::from(*ordinality),
                };
            }
            RteKind::TableFunc { tablefunc, .. } => {
                let mut tablefunc = tablefunc.clone();
                let context_item = std::mem::replace(&mut tablefunc.context_item, make_null_const(0, -1, 0));
                tablefunc.context_item = self.replace_lateral_vars(rtindex, context_item)?;
                tablefunc.passing_values = std::mem::take(&mut tablefunc.passing_values)
                    .into_iter()
                    .map(|value| self.replace_lateral_vars(rtindex, value))
                    .collect::<PgResult<_>>()?;
                let mut used: Vec<&Expr> = vec![&tablefunc.context_item];
                used.extend(&tablefunc.passing_values);
                scan.lateral_ids = self.lateral_ids_in(&used)?;
                scan.kind = PlanKind::TableFuncScan { tablefunc };
            }
            RteKind::Values { values_lists, .. } => {
                let values_lists = values_lists
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|expr| self.replace_lateral_vars(rtindex, expr.clone()))
                            .collect::<PgResult<Vec<_>>>()
                    })
                    .collect::<PgResult<Vec<_>>>()?;
                let used: Vec<&Expr> = values_lists.iter().flatten().collect();
                scan.lateral_ids = self.lateral_ids_in(&used)?;
                scan.kind = PlanKind::ValuesScan { values_lists };
            }
            RteKind::Cte { ctename, ctelevelsup, .. } => {
                let owner = self
                    .levels
                    .len()
                    .checked_sub(1 + *ctelevelsup as usize)
                    .and_then(|idx| self.levels.get(idx))
                    .ok_or_else(|| elog(format!("bad levelsup for CTE \"{ctename}\"")))?;
                let plan_id = owner
                    .cte_plan_ids
                    .iter()
                    .find(|(name, _)| name == ctename)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| elog(format!("could not find plan for CTE \"{ctename}\"")))?;
                scan.kind = PlanKind::CteScan { plan_id };
            }
            RteKind::Result => scan.kind = PlanKind::Result { resconstantqual: None },
            RteKind::Join { .. } => return Err(elog("join range table entry used as a scan")),
        }
        Ok(scan)
    }

    /// LATERAL param ids appearing in `exprs`.
    fn lateral_ids_in(&self, exprs: &[&Expr]) -> PgResult<Vec<i32>> {
        let level = self.level()?;
        let mut ids = Vec::new();
        for expr in exprs {
            collect_exec_params(expr, &mut ids);
        }
        ids.retain(|id| level.lateral_params.iter().any(|param| param.paramid == *id));
        Ok(ids)
    }

    fn build_join_node(
        &mut self,
        node: &JoinTreeNode,
        scans: &mut HashMap<Index, BaseScan>,
        needed: &[Var],
    ) -> PgResult<RelPlan> {
        match node {
            JoinTreeNode::RangeTblRef(rtindex) => {
                let scan = scans
                    .remove(rtindex)
                    .ok_or_else(|| elog(format!("range table entry {rtindex} scanned twice")))?;
                let exprs: Vec<Expr> = needed
                    .iter()
                    .filter(|var| var.varno == *rtindex)
                    .cloned()
                    .map(Expr::Var)
                    .collect();
                let mut plan = Plan::new(scan.kind, exprs_as_tlist(&exprs));
                plan.lefttree = scan.child.map(Box::new);
                Ok(RelPlan {
                    relids: vec![*rtindex],
                    lateral_ids: scan.lateral_ids,
                    ..RelPlan::scan(plan, exprs)
                })
            }
            JoinTreeNode::Join(join) => {
                let outer = self.build_join_node(&join.larg, scans, needed)?;
                let inner = self.build_join_node(&join.rarg, scans, needed)?;
                self.make_nestloop(join.jointype, outer, inner, make_ands_implicit(join.quals.clone()))
            }
        }
    }

    fn make_nestloop(
        &mut self,
        jointype: JoinType,
        outer: RelPlan,
        inner: RelPlan,
        quals: Vec<Expr>,
    ) -> PgResult<RelPlan> {
        let level = self.level()?;
        let mut nest_params = Vec::new();
        let mut lateral_ids = outer.lateral_ids.clone();
        for id in &inner.lateral_ids {
            let item = level
                .lateral_params
                .iter()
                .find(|param| param.paramid == *id)
                .map(|param| param.item.clone())
                .ok_or_else(|| elog(format!("unknown LATERAL parameter {id}")))?;
            let mut vars = Vec::new();
            pull_vars(&item, &mut vars);
            if vars.iter().all(|var| outer.relids.contains(&var.varno)) {
                nest_params.push((*id, fix_join_expr(item, &outer.exprs, &[])?));
            } else if !lateral_ids.contains(id) {
                lateral_ids.push(*id);
            }
        }
        if !nest_params.is_empty() && matches!(jointype, JoinType::Right | JoinType::Full) {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                "FULL and RIGHT JOIN cannot reference a LATERAL item",
            ));
        }
        let joinqual = quals
            .into_iter()
            .map(|qual| fix_join_expr(qual, &outer.exprs, &inner.exprs))
            .collect::<PgResult<Vec<_>>>()?;

        let mut tlist = forwarding_tlist(OUTER_VAR, &outer.exprs);
        let offset = tlist.len();
        tlist.extend(forwarding_tlist(INNER_VAR, &inner.exprs).into_iter().map(|mut tle| {
            tle.resno += offset as i16;
            tle
        }));
        let mut exprs = outer.exprs.clone();
        exprs.extend(inner.exprs.iter().cloned());
        let mut relids = outer.relids.clone();
        relids.extend(&inner.relids);

        let plan = Plan::new(
            PlanKind::NestLoop {
                jointype,
                joinqual,
                nest_params,
            },
            tlist,
        )
        .with_left(outer.plan)
        .with_right(inner.plan);
        Ok(RelPlan {
            plan,
            exprs,
            relids,
            lateral_ids,
            fixer: Fixer::Join {
                outer: outer.exprs,
                inner: inner.exprs,
            },
        })
    }

    // -- set operations ------------------------------------------------------

    fn plan_set_operations(&mut self, query: &Query) -> PgResult<RelPlan> {
        let setop = query
            .set_operations
            .as_deref()
            .ok_or_else(|| elog("query has no set operation"))?;
        let plan = self.plan_setop_tree(query, &SetOpTree::Node(Box::new(setop.clone())))?;
        let exprs: Vec<Expr> = query.visible_targets().map(|tle| tle.expr.clone()).collect();
        let mut rel = RelPlan::scan(plan, exprs.clone());
        rel.fixer = Fixer::Upper {
            input: exprs,
            options: FixOptions::default(),
        };
        Ok(rel)
    }

    fn plan_setop_tree(&mut self, query: &Query, tree: &SetOpTree) -> PgResult<Plan> {
        match tree {
            SetOpTree::Leaf(rtindex) => match query.rte(*rtindex).map(|rte| &rte.kind) {
                Some(RteKind::Subquery { subquery }) => self.subquery_planner((**subquery).clone()),
                _ => Err(elog("set operation leaf is not a subquery")),
            },
            SetOpTree::Node(node) => {
                let left = self.plan_setop_tree(query, &node.larg)?;
                let right = self.plan_setop_tree(query, &node.rarg)?;
                let columns: Vec<Expr> = (0..node.columns.len())
                    .map(|col| {
                        make_var(
                            OUTER_VAR,
                            (col + 1) as i16,
                            node.columns.coltypes[col],
                            node.columns.coltypmods[col],
                            node.columns.colcollations[col],
                            0,
                        )
                    })
                    .collect();
                Ok(Plan::new(
                    PlanKind::SetOp {
                        op: node.op,
                        all: node.all,
                    },
                    exprs_as_tlist(&columns),
                )
                .with_left(left)
                .with_right(right))
            }
        }
    }

    // -- upper stages --------------------------------------------------------

    fn make_agg(&mut self, query: &Query, child: RelPlan, last: Option<&Vec<TargetEntry>>) -> PgResult<RelPlan> {
        let mut group_exprs = Vec::with_capacity(query.group_clause.len());
        let mut group_base = Vec::with_capacity(query.group_clause.len());
        let mut group_refs = Vec::with_capacity(query.group_clause.len());
        for sgc in &query.group_clause {
            let expr = tle_expr(&query.target_list, sgc.tle_sort_group_ref)?.clone();
            group_exprs.push(fix_upper_expr(expr.clone(), &child.exprs, FixOptions::default())?);
            group_base.push(expr);
            group_refs.push(sgc.tle_sort_group_ref);
        }
        let options = FixOptions {
            keep_aggs: true,
            ..FixOptions::default()
        };
        let collected = collect_aggrefs(query);
        let aggs = collected
            .iter()
            .map(|agg| match fix_upper_expr(Expr::Aggref(Box::new(agg.clone())), &child.exprs, options)? {
                Expr::Aggref(fixed) => Ok(*fixed),
                _ => Err(elog("aggregate lost during reference fixing")),
            })
            .collect::<PgResult<Vec<_>>>()?;
        let strategy = if query.group_clause.is_empty() {
            AggStrategy::Plain
        } else {
            AggStrategy::Hashed
        };
        debug!(?strategy, groups = group_exprs.len(), aggregates = aggs.len(), "planned aggregation");

        let kind = PlanKind::Agg {
            strategy,
            group_exprs,
            group_refs,
            aggs,
        };
        let mut rel = RelPlan::upper(Plan::new(kind, Vec::new()), &child, options);
        for qual in make_ands_implicit(query.having_qual.clone()) {
            let fixed = rel.fix(qual)?;
            rel.plan.qual.push(fixed);
        }
        rel.plan = rel.plan.with_left(child.plan);
        match last {
            Some(tlist) => rel.set_output(tlist.clone())?,
            None => {
                let mut exprs = group_base;
                exprs.extend(collected.into_iter().map(|agg| Expr::Aggref(Box::new(agg))));
                for tle in &query.target_list {
                    collect_grouping_funcs(&tle.expr, &mut exprs);
                }
                rel.set_output(exprs_as_tlist(&exprs))?;
            }
        }
        Ok(rel)
    }

    fn make_window_agg(
        &mut self,
        query: &Query,
        child: RelPlan,
        last: Option<&Vec<TargetEntry>>,
    ) -> PgResult<RelPlan> {
        let options = FixOptions {
            keep_window_funcs: true,
            ..FixOptions::default()
        };
        let plain = FixOptions::default();
        let mut clauses = Vec::with_capacity(query.window_clause.len());
        for wc in &query.window_clause {
            let partition = wc
                .partition_clause
                .iter()
                .map(|sgc| {
                    let expr = tle_expr(&query.target_list, sgc.tle_sort_group_ref)?.clone();
                    fix_upper_expr(expr, &child.exprs, plain)
                })
                .collect::<PgResult<Vec<_>>>()?;
            let order = wc
                .order_clause
                .iter()
                .map(|sgc| {
                    let expr = tle_expr(&query.target_list, sgc.tle_sort_group_ref)?.clone();
                    Ok(SortExpr {
                        collation: expr_collation(&expr),
                        expr: fix_upper_expr(expr, &child.exprs, plain)?,
                        sortop: sgc.sortop,
                        descending: sgc.descending,
                        nulls_first: sgc.nulls_first,
                    })
                })
                .collect::<PgResult<Vec<_>>>()?;
            let start_offset = wc
                .start_offset
                .clone()
                .map(|expr| fix_upper_expr(expr, &child.exprs, plain))
                .transpose()?;
            let end_offset = wc
                .end_offset
                .clone()
                .map(|expr| fix_upper_expr(expr, &child.exprs, plain))
                .transpose()?;
            clauses.push(WindowPlanClause {
                winref: wc.winref,
                partition,
                order,
                frame: wc.frame_options.clone(),
                start_offset,
                end_offset,
            });
        }
        let collected = collect_window_funcs(query);
        let wfuncs = collected
            .iter()
            .map(
                |wfunc| match fix_upper_expr(Expr::WindowFunc(Box::new(wfunc.clone())), &child.exprs, options)? {
                    Expr::WindowFunc(fixed) => Ok(*fixed),
                    _ => Err(elog("window function lost during reference fixing")),
                },
            )
            .collect::<PgResult<Vec<_>>>()?;
        debug!(clauses = clauses.len(), functions = wfuncs.len(), "planned window aggregation");

        let mut rel = RelPlan::upper(
            Plan::new(PlanKind::WindowAgg { clauses, wfuncs }, Vec::new()),
            &child,
            options,
        );
        rel.plan = rel.plan.with_left(child.plan);
        match last {
            Some(tlist) => rel.set_output(tlist.clone())?,
            None => {
                let mut exprs = child.exprs.clone();
                exprs.extend(collected.into_iter().map(|wfunc| Expr::WindowFunc(Box::new(wfunc))));
                rel.set_output(exprs_as_tlist(&exprs))?;
            }
        }
        Ok(rel)
    }

    /// One ProjectSet node per nesting depth of set-returning calls; the
    /// innermost calls are expanded first and read back through params.
    fn make_project_set(&mut self, mut child: RelPlan, tlist: &[TargetEntry]) -> PgResult<RelPlan> {
        let mut tlist = tlist.to_vec();
        loop {
            let mut srfs: Vec<Expr> = Vec::new();
            for tle in &tlist {
                collect_innermost_srfs(&tle.expr, &mut srfs);
            }
            if srfs.is_empty() {
                return Err(elog("set-returning target list without a set-returning call"));
            }
            let params: Vec<Expr> = srfs
                .iter()
                .map(|srf| {
                    let (typid, typmod, collation) = (expr_type(srf), expr_typmod(srf), expr_collation(srf));
                    let id = self.new_param(typid, typmod);
                    make_param(ParamKind::Exec, id, typid, typmod, collation)
                })
                .collect();
            for tle in &mut tlist {
                let expr = std::mem::replace(&mut tle.expr, make_null_const(0, -1, 0));
                tle.expr = replace_srfs(expr, &srfs, &params)?;
            }
            let srf_params = params
                .iter()
                .map(|param| match param {
                    Expr::Param(p) => p.paramid,
                    _ => -1,
                })
                .collect();
            let fixed_srfs = srfs
                .into_iter()
                .map(|srf| fix_upper_expr(srf, &child.exprs, FixOptions::default()))
                .collect::<PgResult<Vec<_>>>()?;
            let kind = PlanKind::ProjectSet {
                srfs: fixed_srfs,
                srf_params,
            };
            let mut rel = RelPlan::upper(Plan::new(kind, Vec::new()), &child, FixOptions::default());
            let done = !tlist.iter().any(|tle| expression_returns_set(&tle.expr));
            if done {
                rel.set_output(std::mem::take(&mut tlist))?;
            } else {
                let mut exprs = child.exprs.clone();
                exprs.extend(params);
                rel.set_output(exprs_as_tlist(&exprs))?;
            }
            rel.plan = rel.plan.with_left(child.plan);
            debug!(done, "planned set-returning projection");
            if done {
                return Ok(rel);
            }
            child = rel;
        }
    }

    fn make_modify_table(&mut self, query: &Query, source: RelPlan) -> PgResult<Plan> {
        let rtindex = query.result_relation;
        let relid = result_relation_oid(query)?;
        let natts = self
            .catalog
            .relation(relid)
            .map(|rel| rel.desc.natts())
            .ok_or_else(|| elog(format!("relation {relid} does not exist")))?;
        let (target_cols, ctid_col): (Vec<AttrNumber>, Option<AttrNumber>) = match query.command_type {
            CmdType::Insert => ((1..=natts as AttrNumber).collect(), None),
            CmdType::Update => ((1..=natts as AttrNumber).collect(), Some(natts as AttrNumber + 1)),
            _ => (Vec::new(), Some(1)),
        };
        // RETURNING reads the target row itself; only Vars of other
        // relations come from the source row.
        let outer: Vec<Expr> = source
            .exprs
            .iter()
            .map(|expr| match expr {
                Expr::Var(var) if var.varno != rtindex => expr.clone(),
                _ => make_null_const(0, -1, 0),
            })
            .collect();
        let options = FixOptions {
            scan_varno: Some(rtindex),
            ..FixOptions::default()
        };
        let returning = query
            .returning_list
            .iter()
            .map(|tle| {
                Ok(TargetEntry {
                    expr: fix_upper_expr(tle.expr.clone(), &outer, options)?,
                    ..tle.clone()
                })
            })
            .collect::<PgResult<Vec<_>>>()?;
        debug!(operation = ?query.command_type, relid, returning = returning.len(), "planned ModifyTable");
        Ok(Plan::new(
            PlanKind::ModifyTable {
                operation: query.command_type,
                relid,
                target_cols,
                ctid_col,
                returning,
            },
            Vec::new(),
        )
        .with_left(source.plan))
    }
}

fn collect_leaves(node: &JoinTreeNode, out: &mut Vec<Index>) {
    match node {
        JoinTreeNode::RangeTblRef(rtindex) => out.push(*rtindex),
        JoinTreeNode::Join(join) => {
            collect_leaves(&join.larg, out);
            collect_leaves(&join.rarg, out);
        }
    }
}

fn collect_join_quals<'a>(node: &'a JoinTreeNode, out: &mut Vec<&'a Expr>) {
    if let JoinTreeNode::Join(join) = node {
        out.extend(join.quals.as_ref());
        collect_join_quals(&join.larg, out);
        collect_join_quals(&join.rarg, out);
    }
}

/// Level-0 Vars the FROM tree has to deliver to the nodes above it.
fn needed_vars(query: &Query, lateral: &[PlanParam]) -> Vec<Var> {
    let mut exprs: Vec<&Expr> = query.target_list.iter().map(|tle| &tle.expr).collect();
    exprs.extend(query.jointree.quals.as_ref());
    for node in &query.jointree.fromlist {
        collect_join_quals(node, &mut exprs);
    }
    exprs.extend(query.having_qual.as_ref());
    exprs.extend(lateral.iter().map(|param| &param.item));
    let mut vars = Vec::new();
    for expr in exprs {
        pull_vars(expr, &mut vars);
    }
    vars
}

fn collect_exec_params(expr: &Expr, out: &mut Vec<i32>) {
    if let Expr::Param(param) = expr
        && param.paramkind == ParamKind::Exec
        && !out.contains(&param.paramid)
    {
        out.push(param.paramid);
    }
    expression_tree_walker(expr, &mut |child| {
        collect_exec_params(child, out);
        false
    });
}

fn tle_position(tlist: &[TargetEntry], sortgroupref: u32) -> PgResult<AttrNumber> {
    tlist
        .iter()
        .position(|tle| tle.ressortgroupref == sortgroupref)
        .map(|idx| (idx + 1) as AttrNumber)
        .ok_or_else(|| elog(format!("ORDER/GROUP BY reference {sortgroupref} not found in target list")))
}

fn tle_expr(tlist: &[TargetEntry], sortgroupref: u32) -> PgResult<&Expr> {
    let pos = tle_position(tlist, sortgroupref)?;
    Ok(&tlist[(pos - 1) as usize].expr)
}

fn sort_key(tlist: &[TargetEntry], sgc: &SortGroupClause) -> PgResult<SortKey> {
    let col = tle_position(tlist, sgc.tle_sort_group_ref)?;
    Ok(SortKey {
        col,
        sortop: sgc.sortop,
        collation: expr_collation(&tlist[(col - 1) as usize].expr),
        descending: sgc.descending,
        nulls_first: sgc.nulls_first,
    })
}

/// Give every distinct level-0 aggregate call its slot number.
fn number_aggregates(query: &mut Query) -> PgResult<()> {
    let mut seen: Vec<Aggref> = Vec::new();
    for tle in &mut query.target_list {
        let expr = std::mem::replace(&mut tle.expr, make_null_const(0, -1, 0));
        tle.expr = assign_aggno(expr, &mut seen)?;
    }
    if let Some(having) = query.having_qual.take() {
        query.having_qual = Some(assign_aggno(having, &mut seen)?);
    }
    Ok(())
}

fn assign_aggno(expr: Expr, seen: &mut Vec<Aggref>) -> PgResult<Expr> {
    match expr {
        Expr::Aggref(mut agg) if agg.agglevelsup == 0 => {
            agg.aggno = -1;
            let slot = match seen.iter().position(|known| *known == *agg) {
                Some(slot) => slot,
                None => {
                    seen.push((*agg).clone());
                    seen.len() - 1
                }
            };
            agg.aggno = slot as i32;
            Ok(Expr::Aggref(agg))
        }
        other => expression_tree_mutator(other, &mut |child| assign_aggno(child, seen)),
    }
}

fn collect_aggrefs(query: &Query) -> Vec<Aggref> {
    fn walk(expr: &Expr, out: &mut Vec<Aggref>) {
        if let Expr::Aggref(agg) = expr
            && agg.agglevelsup == 0
        {
            if !out.iter().any(|known| known.aggno == agg.aggno) {
                out.push((**agg).clone());
            }
            return;
        }
        expression_tree_walker(expr, &mut |child| {
            walk(child, out);
            false
        });
    }
    let mut out = Vec::new();
    for tle in &query.target_list {
        walk(&tle.expr, &mut out);
    }
    if let Some(having) = &query.having_qual {
        walk(having, &mut out);
    }
    out.sort_by_key(|agg| agg.aggno);
    out
}

fn collect_grouping_funcs(expr: &Expr, out: &mut Vec<Expr>) {
    if let Expr::GroupingFunc(g) = expr
        && g.agglevelsup == 0
    {
        if !out.contains(expr) {
            out.push(expr.clone());
        }
        return;
    }
    expression_tree_walker(expr, &mut |child| {
        collect_grouping_funcs(child, out);
        false
    });
}

fn number_window_funcs(query: &mut Query) -> PgResult<()> {
    let mut seen: Vec<WindowFunc> = Vec::new();
    for tle in &mut query.target_list {
        let expr = std::mem::replace(&mut tle.expr, make_null_const(0, -1, 0));
        tle.expr = assign_wfuncno(expr, &mut seen)?;
    }
    Ok(())
}

fn assign_wfuncno(expr: Expr, seen: &mut Vec<WindowFunc>) -> PgResult<Expr> {
    match expr {
        Expr::WindowFunc(mut wfunc) => {
            wfunc.wfuncno = -1;
            let slot = match seen.iter().position(|known| *known == *wfunc) {
                Some(slot) => slot,
                None => {
                    seen.push((*wfunc).clone());
                    seen.len() - 1
                }
            };
            wfunc.wfuncno = slot as i32;
            Ok(Expr::WindowFunc(wfunc))
        }
        other => expression_tree_mutator(other, &mut |child| assign_wfuncno(child, seen)),
    }
}

fn collect_window_funcs(query: &Query) -> Vec<WindowFunc> {
    fn walk(expr: &Expr, out: &mut Vec<WindowFunc>) {
        if let Expr::WindowFunc(wfunc) = expr {
            if !out.iter().any(|known| known.wfuncno == wfunc.wfuncno) {
                out.push((**wfunc).clone());
            }
            return;
        }
        expression_tree_walker(expr, &mut |child| {
            walk(child, out);
            false
        });
    }
    let mut out = Vec::new();
    for tle in &query.target_list {
        walk(&tle.expr, &mut out);
    }
    out.sort_by_key(|wfunc| wfunc.wfuncno);
    out
}

fn is_srf_call(expr: &Expr) -> bool {
    match expr {
        Expr::FuncExpr(func) => func.funcretset,
        Expr::OpExpr(op) => op.opretset,
        _ => false,
    }
}

/// Set-returning calls none of whose arguments return sets.
fn collect_innermost_srfs(expr: &Expr, out: &mut Vec<Expr>) {
    if matches!(expr, Expr::Aggref(_) | Expr::WindowFunc(_) | Expr::SubPlan(_)) {
        return;
    }
    let mut nested = false;
    expression_tree_walker(expr, &mut |child| {
        if expression_returns_set(child) {
            nested = true;
            collect_innermost_srfs(child, out);
        }
        false
    });
    if !nested && is_srf_call(expr) && !out.contains(expr) {
        out.push(expr.clone());
    }
}

fn replace_srfs(expr: Expr, srfs: &[Expr], params: &[Expr]) -> PgResult<Expr> {
    if let Some(idx) = srfs.iter().position(|srf| *srf == expr) {
        return Ok(params[idx].clone());
    }
    if matches!(expr, Expr::Aggref(_) | Expr::WindowFunc(_) | Expr::SubPlan(_)) {
        return Ok(expr);
    }
    expression_tree_mutator(expr, &mut |child| replace_srfs(child, srfs, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_analyze, raw_parser};
    use crate::tcop::engine::{reset_global_state_for_tests, run_statement, with_global_state_lock};

    fn plan(sql: &str) -> PlannedStmt {
        let catalog = crate::catalog::catalog_snapshot();
        let stmts = raw_parser(sql).unwrap();
        let query = parse_analyze(&catalog, &stmts[0], sql, &[]).unwrap();
        planner(&catalog, &query).unwrap()
    }

    fn top(stmt: &PlannedStmt) -> &Plan {
        stmt.plan_tree.as_ref().unwrap()
    }

    #[test]
    fn constant_select_is_a_result_node() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let stmt = plan("SELECT 1 + 2");
            assert!(matches!(top(&stmt).kind, PlanKind::Result { .. }));
            assert_eq!(stmt.result_columns().len(), 1);
        });
    }

    #[test]
    fn join_becomes_nested_loop_with_positional_vars() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE a (x int, y int)").unwrap();
            run_statement("CREATE TABLE b (x int, z int)").unwrap();
            let stmt = plan("SELECT a.y, b.z FROM a JOIN b ON a.x = b.x");
            let plan = top(&stmt);
            let PlanKind::NestLoop { joinqual, .. } = &plan.kind else {
                panic!("expected a nested loop, got {}", plan.node_name());
            };
            assert_eq!(joinqual.len(), 1);
            assert!(matches!(&plan.targetlist[0].expr, Expr::Var(v) if v.varno == OUTER_VAR));
            assert!(matches!(&plan.targetlist[1].expr, Expr::Var(v) if v.varno == INNER_VAR));
        });
    }

    #[test]
    fn uncorrelated_scalar_sublink_becomes_init_plan() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE a (x int)").unwrap();
            let stmt = plan("SELECT (SELECT max(x) FROM a)");
            let plan = top(&stmt);
            assert_eq!(plan.init_plan.len(), 1);
            assert_eq!(plan.init_plan[0].plan_name, format!("InitPlan {}", plan.init_plan[0].plan_id + 1));
            assert!(matches!(&plan.targetlist[0].expr, Expr::Param(p) if p.paramkind == ParamKind::Exec));
        });
    }

    #[test]
    fn correlated_sublink_passes_outer_var() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE a (x int)").unwrap();
            run_statement("CREATE TABLE b (x int)").unwrap();
            let stmt = plan("SELECT x FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b.x = a.x)");
            let plan = top(&stmt);
            let Expr::SubPlan(subplan) = &plan.qual[0] else {
                panic!("expected a SubPlan qual");
            };
            assert_eq!(subplan.par_param.len(), 1);
            assert!(matches!(&subplan.args[0], Expr::Var(v) if v.varno == 1 && v.varattno == 1));
            let inner = &stmt.subplans[subplan.plan_id];
            assert_eq!(inner.ext_param, subplan.par_param);
        });
    }

    #[test]
    fn grouped_query_stacks_agg_sort_and_limit() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE a (x int, y int)").unwrap();
            let stmt = plan("SELECT x, sum(y) FROM a GROUP BY x ORDER BY 2 DESC LIMIT 1");
            let limit = top(&stmt);
            assert!(matches!(limit.kind, PlanKind::Limit { .. }));
            let sort = limit.lefttree.as_deref().unwrap();
            assert!(matches!(&sort.kind, PlanKind::Sort { keys } if keys[0].col == 2 && keys[0].descending));
            let agg = sort.lefttree.as_deref().unwrap();
            let PlanKind::Agg { strategy, aggs, .. } = &agg.kind else {
                panic!("expected an Agg node");
            };
            assert_eq!(*strategy, AggStrategy::Hashed);
            assert_eq!(aggs.len(), 1);
            assert_eq!(aggs[0].aggno, 0);
        });
    }

    #[test]
    fn nested_set_returning_calls_need_two_project_sets() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            let stmt = plan("SELECT generate_series(1, generate_series(1, 3))");
            let outer = top(&stmt);
            assert!(matches!(outer.kind, PlanKind::ProjectSet { .. }));
            let inner = outer.lefttree.as_deref().unwrap();
            assert!(matches!(inner.kind, PlanKind::ProjectSet { .. }));
        });
    }

    #[test]
    fn update_returning_reads_new_row_through_scan_vars() {
        with_global_state_lock(|| {
            reset_global_state_for_tests();
            run_statement("CREATE TABLE a (x int, y int)").unwrap();
            let stmt = plan("UPDATE a SET x = x + 1 RETURNING x + 1");
            let PlanKind::ModifyTable { returning, ctid_col, target_cols, .. } = &top(&stmt).kind else {
                panic!("expected ModifyTable");
            };
            assert_eq!(*ctid_col, Some(3));
            assert_eq!(target_cols, &vec![1, 2]);
            let Expr::OpExpr(op) = &returning[0].expr else {
                panic!("expected an operator");
            };
            assert!(matches!(&op.args[0], Expr::Var(v) if v.varno == 1));
        });
    }
}
