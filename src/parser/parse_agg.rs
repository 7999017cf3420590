//! Aggregate, GROUPING and window function placement.
//!
//! Calls are checked as they are built: an aggregate belongs to the
//! innermost query level whose variables it references, and that level's
//! current clause decides whether it may appear there. Once a query's
//! clauses are all transformed, [`parse_check_aggregates`] verifies that
//! every column outside an aggregate is grouped.

use tracing::{debug, trace};

use crate::catalog::Catalog;
use crate::catalog::oid::INVALID_OID;
use crate::catalog::pg_proc::AggKind;
use crate::nodes::node_funcs::{
    contain_window_function, expr_location, expr_type, expression_tree_mutator, expression_tree_walker,
    mutate_query_exprs, query_exprs,
};
use crate::nodes::parsenodes::{Query, RawExpr, RteKind, SortBy, WindowDef};
use crate::nodes::primnodes::{Aggref, Expr, GroupingFunc, TargetEntry, Var, WindowFunc};
use crate::parser::parse_clause::{
    add_target_to_sort_list, sortgroupclause_expr, transform_distinct_clause, transform_sort_clause,
};
use crate::parser::parse_expr::transform_expr;
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_relation::get_rte_attribute_name;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

const MAX_GROUPING_ARGS: usize = 31;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Aggregate,
    Grouping,
    Window,
}

impl CallKind {
    fn plural(self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate functions",
            Self::Grouping => "grouping operations",
            Self::Window => "window functions",
        }
    }

    fn sqlstate(self) -> SqlState {
        match self {
            Self::Window => SqlState::WindowingError,
            _ => SqlState::GroupingError,
        }
    }
}

/// Message for a call of `call` kind appearing in a `kind` clause, or
/// `None` when it is allowed there.
fn placement_error(kind: ParseExprKind, call: CallKind) -> Option<String> {
    use ParseExprKind as K;
    let what = call.plural();
    let fixed = |place: &str| Some(format!("{what} are not allowed in {place}"));
    match kind {
        K::None | K::Other | K::SelectTarget | K::OrderBy | K::DistinctOn => None,
        K::Having | K::WindowPartition | K::WindowOrder if call != CallKind::Window => None,
        K::WindowPartition | K::WindowOrder | K::WindowFrameRange | K::WindowFrameRows | K::WindowFrameGroups
            if call == CallKind::Window =>
        {
            fixed("window definitions")
        }
        K::JoinOn | K::JoinUsing => fixed("JOIN conditions"),
        K::FromSubselect => fixed("FROM clause of their own query level"),
        K::FromFunction => fixed("functions in FROM"),
        K::Policy => fixed("policy expressions"),
        K::WindowFrameRange => fixed("window RANGE"),
        K::WindowFrameRows => fixed("window ROWS"),
        K::WindowFrameGroups => fixed("window GROUPS"),
        K::CheckConstraint | K::DomainCheck => fixed("check constraints"),
        K::ColumnDefault | K::FunctionDefault => fixed("DEFAULT expressions"),
        K::IndexExpression => fixed("index expressions"),
        K::IndexPredicate => fixed("index predicates"),
        K::StatsExpression => fixed("statistics expressions"),
        K::AlterColTransform => fixed("transform expressions"),
        K::ExecuteParameter => fixed("EXECUTE parameters"),
        K::TriggerWhen => fixed("trigger WHEN conditions"),
        K::PartitionBound => fixed("partition bound"),
        K::PartitionExpression => fixed("partition key expressions"),
        K::CallArgument => fixed("CALL arguments"),
        K::CopyWhere => fixed("COPY FROM WHERE conditions"),
        K::GeneratedColumn => fixed("column generation expressions"),
        other => fixed(other.name()),
    }
}

fn check_placement(pstate: &ParseState<'_>, levels_up: u32, call: CallKind, location: Option<usize>) -> PgResult<()> {
    let kind = pstate
        .level_at(levels_up)
        .and_then(|level| level.expr_kind)
        .unwrap_or(ParseExprKind::None);
    match placement_error(kind, call) {
        Some(message) => Err(PgError::new(call.sqlstate(), message).at(location)),
        None => Ok(()),
    }
}

/// Lowest query levels referenced by variables and by aggregates within a
/// set of expressions, relative to where the expressions sit.
#[derive(Default)]
struct LevelScan {
    min_var: Option<u32>,
    min_agg: Option<u32>,
}

impl LevelScan {
    fn of<'e>(exprs: impl IntoIterator<Item = &'e Expr>) -> Self {
        let mut scan = Self::default();
        for expr in exprs {
            scan.visit(expr, 0);
        }
        scan
    }

    fn visit(&mut self, expr: &Expr, depth: u32) {
        let lower = |slot: &mut Option<u32>, level: u32| {
            if let Some(level) = level.checked_sub(depth) {
                *slot = Some(slot.map_or(level, |current| current.min(level)));
            }
        };
        match expr {
            Expr::Var(var) => return lower(&mut self.min_var, var.varlevelsup),
            // Arguments of an inner aggregate belong to that aggregate.
            Expr::Aggref(agg) => return lower(&mut self.min_agg, agg.agglevelsup),
            Expr::GroupingFunc(g) => return lower(&mut self.min_agg, g.agglevelsup),
            Expr::SubLink(sublink) => self.visit_query(&sublink.subselect, depth + 1),
            _ => {}
        }
        expression_tree_walker(expr, &mut |child| {
            self.visit(child, depth);
            false
        });
    }

    fn visit_query(&mut self, query: &Query, depth: u32) {
        let (exprs, subqueries) = query_exprs(query);
        for expr in exprs {
            self.visit(expr, depth);
        }
        for sub in subqueries {
            self.visit_query(sub, depth + 1);
        }
    }
}

/// Finish an aggregate call: attach the aggregated arguments, ORDER BY and
/// DISTINCT, then decide which query level the aggregate belongs to.
pub fn transform_aggregate_call(
    pstate: &mut ParseState<'_>,
    agg: &mut Aggref,
    aggregated: Vec<Expr>,
    agg_order: &[SortBy],
    agg_distinct: bool,
) -> PgResult<()> {
    let mut tlist: Vec<TargetEntry> = aggregated
        .into_iter()
        .enumerate()
        .map(|(idx, expr)| TargetEntry::new(expr, idx as i16 + 1, None, false))
        .collect();

    if agg.aggkind == AggKind::Normal {
        let order = transform_sort_clause(pstate, agg_order, &mut tlist, ParseExprKind::OrderBy, true)?;
        if agg_distinct {
            let distinct = transform_distinct_clause(pstate, &mut tlist, &order, true)?;
            if let Some(clause) = distinct.iter().find(|clause| clause.sortop == INVALID_OID) {
                let arg = sortgroupclause_expr(clause, &tlist).ok_or_else(|| elog("DISTINCT entry not found"))?;
                return Err(PgError::new(
                    SqlState::UndefinedFunction,
                    format!(
                        "could not identify an ordering operator for type {}",
                        pstate.catalog.format_type(expr_type(arg))
                    ),
                )
                .with_detail("Aggregates with DISTINCT must be able to sort their inputs.")
                .at(expr_location(arg)));
            }
            agg.aggdistinct = distinct;
        }
        agg.aggorder = order;
    } else {
        // WITHIN GROUP items were transformed as the aggregated arguments.
        let mut order = Vec::with_capacity(agg_order.len());
        for (idx, sortby) in agg_order.iter().enumerate().take(tlist.len()) {
            add_target_to_sort_list(pstate, &mut tlist, idx, &mut order, sortby)?;
        }
        agg.aggorder = order;
    }
    agg.args = tlist;

    let location = agg.location.get();
    let scan = LevelScan::of(agg.args.iter().map(|tle| &tle.expr).chain(agg.aggfilter.as_ref()));
    let levelsup = scan.min_var.or(scan.min_agg).unwrap_or(0);
    if scan.min_agg.is_some_and(|aggs| aggs <= levelsup) {
        return Err(PgError::new(SqlState::GroupingError, "aggregate function calls cannot be nested").at(location));
    }
    if agg
        .args
        .iter()
        .map(|tle| &tle.expr)
        .chain(agg.aggfilter.as_ref())
        .any(contain_window_function)
    {
        return Err(PgError::new(
            SqlState::GroupingError,
            "aggregate function calls cannot contain window function calls",
        )
        .at(location));
    }
    agg.agglevelsup = levelsup;
    mark_has_aggs(pstate, levelsup)?;
    check_placement(pstate, levelsup, CallKind::Aggregate, location)?;

    if !agg.aggdirectargs.is_empty() {
        let direct = LevelScan::of(&agg.aggdirectargs);
        if direct.min_var.is_some_and(|level| level < levelsup) {
            return Err(PgError::new(
                SqlState::GroupingError,
                "outer-level aggregate cannot contain a lower-level variable in its direct arguments",
            )
            .at(location));
        }
        if direct.min_agg.is_some_and(|level| level <= levelsup) {
            return Err(PgError::new(SqlState::GroupingError, "aggregate function calls cannot be nested")
                .at(location));
        }
    }
    trace!(aggfnoid = agg.aggfnoid, levelsup, "aggregate call");
    Ok(())
}

fn mark_has_aggs(pstate: &mut ParseState<'_>, levelsup: u32) -> PgResult<()> {
    pstate
        .level_at_mut(levelsup)
        .ok_or_else(|| elog(format!("aggregate level {levelsup} out of range")))?
        .has_aggs = true;
    Ok(())
}

/// Attach a window function to its window, registering inline OVER
/// specifications as new windows of the current level.
pub fn transform_window_func_call(
    pstate: &mut ParseState<'_>,
    wfunc: &mut WindowFunc,
    over: &WindowDef,
) -> PgResult<()> {
    let location = wfunc.location.get();
    check_placement(pstate, 0, CallKind::Window, location)?;
    if wfunc
        .args
        .iter()
        .chain(wfunc.aggfilter.as_ref())
        .any(contain_window_function)
    {
        return Err(PgError::new(SqlState::WindowingError, "window function calls cannot be nested").at(location));
    }

    let level = pstate.level_mut();
    match (&over.name, &over.refname) {
        (Some(name), None) if over.partition_clause.is_empty() && over.order_clause.is_empty() => {
            let position = level
                .windowdefs
                .iter()
                .position(|def| def.name.as_deref() == Some(name.as_str()))
                .ok_or_else(|| {
                    PgError::new(SqlState::UndefinedObject, format!("window \"{name}\" does not exist"))
                        .at(over.location)
                })?;
            wfunc.winref = position as u32 + 1;
        }
        _ => {
            level.windowdefs.push(over.clone());
            wfunc.winref = level.windowdefs.len() as u32;
        }
    }
    level.has_window_funcs = true;
    trace!(winfnoid = wfunc.winfnoid, winref = wfunc.winref, "window function call");
    Ok(())
}

/// `GROUPING(args)`. Argument references are resolved against GROUP BY in
/// [`parse_check_aggregates`].
pub fn transform_grouping_func(
    pstate: &mut ParseState<'_>,
    args: &[RawExpr],
    location: Option<usize>,
) -> PgResult<Expr> {
    if args.len() > MAX_GROUPING_ARGS {
        return Err(PgError::new(
            SqlState::TooManyArguments,
            format!("GROUPING must have fewer than {} arguments", MAX_GROUPING_ARGS + 1),
        )
        .at(location));
    }
    let kind = pstate.expr_kind();
    let args = args
        .iter()
        .map(|arg| transform_expr(pstate, arg, kind))
        .collect::<PgResult<Vec<_>>>()?;
    let levelsup = LevelScan::of(&args).min_var.unwrap_or(0);
    mark_has_aggs(pstate, levelsup)?;
    check_placement(pstate, levelsup, CallKind::Grouping, location)?;
    Ok(Expr::GroupingFunc(Box::new(GroupingFunc {
        args,
        refs: Vec::new(),
        agglevelsup: levelsup,
        location: location.into(),
    })))
}

/// Grouping facts of the query being checked.
struct GroupingContext<'q> {
    catalog: &'q Catalog,
    query: &'q Query,
    group_exprs: Vec<Expr>,
    have_non_var_grouping: bool,
    /// Relations whose primary key is entirely grouped; any of their
    /// columns is functionally dependent on the grouping.
    pk_grouped: Vec<u32>,
}

impl GroupingContext<'_> {
    fn check(&self, expr: &Expr, depth: u32) -> PgResult<()> {
        match expr {
            Expr::Const(_) | Expr::Param(_) => return Ok(()),
            Expr::Aggref(agg) if agg.agglevelsup >= depth => return Ok(()),
            Expr::GroupingFunc(g) if g.agglevelsup >= depth => return Ok(()),
            _ => {}
        }
        if depth == 0 && self.have_non_var_grouping && self.group_exprs.contains(expr) {
            return Ok(());
        }
        match expr {
            Expr::Var(var) => {
                if var.varlevelsup == depth {
                    self.check_var(var, depth)?;
                }
                return Ok(());
            }
            Expr::SubLink(sublink) => self.check_query(&sublink.subselect, depth + 1)?,
            _ => {}
        }
        let mut result = Ok(());
        expression_tree_walker(expr, &mut |child| match self.check(child, depth) {
            Ok(()) => false,
            Err(err) => {
                result = Err(err);
                true
            }
        });
        result
    }

    fn check_query(&self, query: &Query, depth: u32) -> PgResult<()> {
        let (exprs, subqueries) = query_exprs(query);
        for expr in exprs {
            self.check(expr, depth)?;
        }
        for sub in subqueries {
            self.check_query(sub, depth + 1)?;
        }
        Ok(())
    }

    fn check_var(&self, var: &Var, depth: u32) -> PgResult<()> {
        let mut level0 = var.clone();
        level0.varlevelsup = 0;
        let grouped = Expr::Var(level0);
        if self.group_exprs.contains(&grouped) || self.pk_grouped.contains(&var.varno) {
            return Ok(());
        }
        let rte = self
            .query
            .rtable
            .get((var.varno as usize).wrapping_sub(1))
            .ok_or_else(|| elog(format!("invalid varno {}", var.varno)))?;
        let column = format!("{}.{}", rte.eref.aliasname, get_rte_attribute_name(rte, var.varattno));
        let message = if depth == 0 {
            format!("column \"{column}\" must appear in the GROUP BY clause or be used in an aggregate function")
        } else {
            format!("subquery uses ungrouped column \"{column}\" from outer query")
        };
        Err(PgError::new(SqlState::GroupingError, message).at(var.location.get()))
    }

    fn primary_key_grouped(&self, varno: u32) -> bool {
        let Some(rte) = self.query.rtable.get((varno as usize).wrapping_sub(1)) else {
            return false;
        };
        let RteKind::Relation { relid, .. } = &rte.kind else {
            return false;
        };
        let Some(rel) = self.catalog.relation(*relid) else {
            return false;
        };
        rel.indexes.iter().filter(|index| index.primary).any(|index| {
            index.keys.iter().all(|&attno| {
                attno > 0
                    && self.group_exprs.iter().any(|expr| {
                        matches!(expr, Expr::Var(v) if v.varno == varno && v.varattno == attno && v.varlevelsup == 0)
                    })
            })
        })
    }

    fn fill_grouping_refs(&self, expr: Expr, depth: u32) -> PgResult<Expr> {
        match expr {
            Expr::GroupingFunc(mut g) if g.agglevelsup == depth => {
                let mut refs = Vec::with_capacity(g.args.len());
                for arg in &g.args {
                    let lifted = lower_var_levels(arg.clone(), depth)?;
                    let found = self
                        .query
                        .group_clause
                        .iter()
                        .find(|clause| sortgroupclause_expr(clause, &self.query.target_list) == Some(&lifted))
                        .ok_or_else(|| {
                            PgError::new(
                                SqlState::GroupingError,
                                "arguments to GROUPING must be grouping expressions of the associated query level",
                            )
                            .at(expr_location(arg))
                        })?;
                    refs.push(found.tle_sort_group_ref);
                }
                g.refs = refs;
                Ok(Expr::GroupingFunc(g))
            }
            Expr::SubLink(mut sublink) => {
                mutate_query_exprs(&mut sublink.subselect, &mut |e| {
                    self.fill_grouping_refs(e, depth + 1)
                })?;
                expression_tree_mutator(Expr::SubLink(sublink), &mut |e| self.fill_grouping_refs(e, depth))
            }
            other => expression_tree_mutator(other, &mut |e| self.fill_grouping_refs(e, depth)),
        }
    }
}

fn lower_var_levels(expr: Expr, delta: u32) -> PgResult<Expr> {
    match expr {
        Expr::Var(mut var) if var.varlevelsup >= delta => {
            var.varlevelsup -= delta;
            Ok(Expr::Var(var))
        }
        other if delta == 0 => Ok(other),
        other => expression_tree_mutator(other, &mut |e| lower_var_levels(e, delta)),
    }
}

/// Check a grouped or aggregated query: every column reference outside an
/// aggregate must be a grouping column (or functionally dependent on one),
/// and GROUPING arguments must be grouping expressions.
pub fn parse_check_aggregates(pstate: &ParseState<'_>, query: &mut Query) -> PgResult<()> {
    let group_exprs: Vec<Expr> = query
        .group_clause
        .iter()
        .filter_map(|clause| sortgroupclause_expr(clause, &query.target_list).cloned())
        .collect();
    let have_non_var_grouping = group_exprs
        .iter()
        .any(|expr| !matches!(expr, Expr::Var(var) if var.varlevelsup == 0));

    let filled = {
        let mut ctx = GroupingContext {
            catalog: pstate.catalog,
            query: &*query,
            group_exprs,
            have_non_var_grouping,
            pk_grouped: Vec::new(),
        };
        ctx.pk_grouped = (1..=query.rtable.len() as u32)
            .filter(|&varno| ctx.primary_key_grouped(varno))
            .collect();
        debug!(
            group_exprs = ctx.group_exprs.len(),
            pk_grouped = ?ctx.pk_grouped,
            "checking grouped query"
        );

        for tle in &query.target_list {
            ctx.check(&tle.expr, 0)?;
        }
        if let Some(having) = &query.having_qual {
            ctx.check(having, 0)?;
        }

        let tlist = query
            .target_list
            .iter()
            .map(|tle| ctx.fill_grouping_refs(tle.expr.clone(), 0))
            .collect::<PgResult<Vec<_>>>()?;
        let having = query
            .having_qual
            .clone()
            .map(|having| ctx.fill_grouping_refs(having, 0))
            .transpose()?;
        (tlist, having)
    };
    let (tlist, having) = filled;
    for (tle, expr) in query.target_list.iter_mut().zip(tlist) {
        tle.expr = expr;
    }
    query.having_qual = having;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;
    use crate::catalog::table::{IndexInfo, Persistence, RelKind};
    use crate::catalog::PG_PUBLIC_NAMESPACE;
    use crate::nodes::tupdesc::{Attribute, TupleDesc};
    use crate::parser::analyze::parse_analyze;
    use crate::parser::gram::raw_parser;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        let desc = TupleDesc::new(
            ["id", "grp", "val"]
                .iter()
                .map(|col| Attribute::new(*col, INT4OID, -1, INVALID_OID))
                .collect(),
        );
        let relid = catalog
            .create_relation("items", PG_PUBLIC_NAMESPACE, RelKind::Table, Persistence::Permanent, desc)
            .unwrap();
        let oid = catalog.next_oid();
        catalog.relation_mut(relid).unwrap().indexes.push(IndexInfo {
            oid,
            name: "items_pkey".into(),
            keys: vec![1],
            exprs: Vec::new(),
            predicate: None,
            unique: true,
            primary: true,
            eq_ops: Vec::new(),
        });
        catalog
    }

    fn analyze(catalog: &Catalog, sql: &str) -> PgResult<Query> {
        let stmts = raw_parser(sql)?;
        parse_analyze(catalog, &stmts[0], sql, &[])
    }

    fn error_message(catalog: &Catalog, sql: &str) -> String {
        analyze(catalog, sql).unwrap_err().message
    }

    #[test]
    fn ungrouped_column_is_rejected() {
        let catalog = catalog();
        assert_eq!(
            error_message(&catalog, "SELECT grp, val, count(*) FROM items GROUP BY grp"),
            "column \"items.val\" must appear in the GROUP BY clause or be used in an aggregate function"
        );
        assert!(analyze(&catalog, "SELECT grp, sum(val) FROM items GROUP BY grp HAVING count(*) > 1").is_ok());
        assert!(analyze(&catalog, "SELECT grp + 1, count(*) FROM items GROUP BY grp + 1").is_ok());
    }

    #[test]
    fn primary_key_grouping_covers_other_columns() {
        let catalog = catalog();
        assert!(analyze(&catalog, "SELECT id, val FROM items GROUP BY id").is_ok());
    }

    #[test]
    fn placement_errors_name_the_clause() {
        let catalog = catalog();
        assert_eq!(
            error_message(&catalog, "SELECT * FROM items WHERE count(*) > 0"),
            "aggregate functions are not allowed in WHERE"
        );
        assert_eq!(
            error_message(&catalog, "SELECT sum(count(*)) FROM items"),
            "aggregate function calls cannot be nested"
        );
        assert_eq!(
            error_message(&catalog, "SELECT id FROM items GROUP BY id HAVING row_number() OVER () > 1"),
            "window functions are not allowed in HAVING"
        );
        assert_eq!(
            error_message(&catalog, "SELECT sum(row_number() OVER ()) FROM items"),
            "aggregate function calls cannot contain window function calls"
        );
    }

    #[test]
    fn outer_aggregate_belongs_to_outer_level() {
        let catalog = catalog();
        let query = analyze(&catalog, "SELECT (SELECT max(o.val)) FROM items o").unwrap();
        assert!(query.has_aggs);
        let err = error_message(&catalog, "SELECT * FROM items o WHERE (SELECT max(o.val)) > 0");
        assert_eq!(err, "aggregate functions are not allowed in WHERE");
    }

    #[test]
    fn grouping_refs_follow_group_clause() {
        let catalog = catalog();
        let query = analyze(&catalog, "SELECT grp, GROUPING(grp) FROM items GROUP BY grp").unwrap();
        let Expr::GroupingFunc(g) = &query.target_list[1].expr else {
            panic!("expected GROUPING");
        };
        assert_eq!(g.refs, vec![query.group_clause[0].tle_sort_group_ref]);
        assert_eq!(
            error_message(&catalog, "SELECT GROUPING(val) FROM items GROUP BY grp"),
            "arguments to GROUPING must be grouping expressions of the associated query level"
        );
    }

    #[test]
    fn inline_windows_are_shared() {
        let catalog = catalog();
        let query = analyze(
            &catalog,
            "SELECT sum(val) OVER (PARTITION BY grp), count(*) OVER (PARTITION BY grp), \
             rank() OVER (ORDER BY val) FROM items",
        )
        .unwrap();
        assert_eq!(query.window_clause.len(), 2);
        let winrefs: Vec<u32> = query
            .target_list
            .iter()
            .filter_map(|tle| match &tle.expr {
                Expr::WindowFunc(w) => Some(w.winref),
                _ => None,
            })
            .collect();
        assert_eq!(winrefs, vec![1, 1, 2]);
        assert_eq!(
            error_message(&catalog, "SELECT sum(val) OVER w FROM items"),
            "window \"w\" does not exist"
        );
    }
}
