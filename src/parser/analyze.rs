//! Statement analysis: raw statements in, `Query` trees out.
//!
//! Optimizable statements (SELECT, VALUES, set operations, INSERT, UPDATE,
//! DELETE and a function body's RETURN) are transformed clause by clause.
//! Everything else passes through as a utility `Query`.

use tracing::debug;

use crate::catalog::Catalog;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::table::Relation;
use crate::nodes::makefuncs::{make_null_const, make_var};
use crate::nodes::node_funcs::{expr_collation, expr_location, expr_type, expr_typmod};
use crate::nodes::parsenodes::{
    ACL_DELETE, ACL_INSERT, ACL_UPDATE, AConstValue, Alias, CmdType, ColumnRefField, ColumnTypes,
    DeleteStmt, FromExpr, InsertStmt, JoinTreeNode, Query, RawExpr, RawStmt, ResTarget, RteKind, SelectStmt, SetOpTree, SetOperation,
    SetOperationStmt, UpdateStmt,
};
use crate::nodes::primnodes::{Expr, Index, TargetEntry};
use crate::parser::parse_agg::parse_check_aggregates;
use crate::parser::parse_clause::{
    set_target_table, transform_distinct_clause, transform_distinct_on_clause, transform_from_clause,
    transform_group_clause, transform_limit_clause, transform_sort_clause, transform_where_clause,
    transform_window_definitions,
};
use crate::parser::parse_coerce::{coerce_to_common_type, select_common_type, select_common_typmod};
use crate::parser::parse_collate::{assign_expr_collations, assign_query_collations, select_common_collation};
use crate::parser::parse_cte::transform_with_clause;
use crate::parser::parse_expr::{make_set_to_default, transform_expr};
use crate::parser::parse_node::{ParseExprKind, ParseHooks, ParseState};
use crate::parser::parse_relation::{add_rte_for_subquery, add_rte_for_values, build_nsitem};
use crate::parser::parse_target::{
    check_insert_targets, mark_target_list_origins, resolve_target_list_unknowns, transform_assigned_expr,
    transform_expression_list, transform_target_list, update_target_list_entry,
};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// Analyze one raw statement. `param_types` gives the types of `$1..$n`.
pub fn parse_analyze(catalog: &Catalog, raw: &RawStmt, source_text: &str, param_types: &[Oid]) -> PgResult<Query> {
    parse_analyze_with_hooks(catalog, raw, source_text, param_types, ParseHooks::default())
}

/// Analyze with caller-supplied name resolution hooks, as SQL function
/// bodies need for their parameters.
pub fn parse_analyze_with_hooks(
    catalog: &Catalog,
    raw: &RawStmt,
    source_text: &str,
    param_types: &[Oid],
    hooks: ParseHooks,
) -> PgResult<Query> {
    let mut pstate = ParseState::new(catalog, source_text)
        .with_params(param_types)
        .with_hooks(hooks);
    let mut query = transform_stmt(&mut pstate, raw)?;
    query.can_set_tag = true;
    debug!(
        command = ?query.command_type,
        rtable = query.rtable.len(),
        has_aggs = query.has_aggs,
        has_sub_links = query.has_sub_links,
        "analyzed statement"
    );
    Ok(query)
}

/// Analyze a sub-SELECT one query level below the current one.
pub fn parse_sub_analyze(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> PgResult<Query> {
    analyze_sub_select(pstate, stmt, true)
}

fn analyze_sub_select(pstate: &mut ParseState<'_>, stmt: &SelectStmt, resolve_unknowns: bool) -> PgResult<Query> {
    pstate.push_level()?;
    let result = transform_select_stmt(pstate, stmt, resolve_unknowns);
    pstate.pop_level()?;
    result
}

fn transform_stmt(pstate: &mut ParseState<'_>, raw: &RawStmt) -> PgResult<Query> {
    match raw {
        RawStmt::Select(stmt) => transform_select_stmt(pstate, stmt, true),
        RawStmt::Insert(stmt) => transform_insert_stmt(pstate, stmt),
        RawStmt::Update(stmt) => transform_update_stmt(pstate, stmt),
        RawStmt::Delete(stmt) => transform_delete_stmt(pstate, stmt),
        RawStmt::Return(expr) => transform_return_stmt(pstate, expr),
        other => Ok(Query::utility(other.clone())),
    }
}

fn transform_select_stmt(pstate: &mut ParseState<'_>, stmt: &SelectStmt, resolve_unknowns: bool) -> PgResult<Query> {
    if stmt.op != SetOperation::None {
        transform_set_operation_stmt(pstate, stmt)
    } else if !stmt.values_lists.is_empty() {
        transform_values_clause(pstate, stmt)
    } else {
        transform_select_clause(pstate, stmt, resolve_unknowns)
    }
}

/// Move what the current level accumulated into `query`.
fn finish_level(pstate: &mut ParseState<'_>, query: &mut Query) {
    let level = pstate.level_mut();
    query.rtable = std::mem::take(&mut level.rtable);
    query.cte_list = std::mem::take(&mut level.ctenamespace);
    query.has_aggs = level.has_aggs;
    query.has_window_funcs = level.has_window_funcs;
    query.has_target_srfs = level.has_target_srfs;
    query.has_sub_links = level.has_sub_links;
}

fn transform_select_clause(pstate: &mut ParseState<'_>, stmt: &SelectStmt, resolve_unknowns: bool) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Select);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }
    let fromlist = transform_from_clause(pstate, &stmt.from_clause)?;
    // Named windows come first so OVER w can find them.
    pstate.level_mut().windowdefs = stmt.window_clause.clone();

    let mut tlist = transform_target_list(pstate, &stmt.target_list, ParseExprKind::SelectTarget)?;
    if resolve_unknowns {
        resolve_target_list_unknowns(pstate, &mut tlist)?;
    }
    mark_target_list_origins(pstate, &mut tlist);

    let qual = stmt
        .where_clause
        .as_ref()
        .map(|raw| transform_where_clause(pstate, raw, ParseExprKind::Where, "WHERE"))
        .transpose()?;
    query.having_qual = stmt
        .having_clause
        .as_ref()
        .map(|raw| transform_where_clause(pstate, raw, ParseExprKind::Having, "HAVING"))
        .transpose()?;

    query.sort_clause = transform_sort_clause(pstate, &stmt.sort_clause, &mut tlist, ParseExprKind::OrderBy, false)?;
    query.group_clause = transform_group_clause(pstate, &stmt.group_clause, &mut tlist, &query.sort_clause)?;
    query.distinct_clause = match &stmt.distinct_clause {
        None => Vec::new(),
        Some(exprs) if exprs.is_empty() => transform_distinct_clause(pstate, &mut tlist, &query.sort_clause, false)?,
        Some(exprs) => {
            query.has_distinct_on = true;
            transform_distinct_on_clause(pstate, exprs, &mut tlist, &query.sort_clause)?
        }
    };
    query.limit_offset =
        transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ParseExprKind::Offset, "OFFSET")?;
    query.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ParseExprKind::Limit, "LIMIT")?;
    query.window_clause = transform_window_definitions(pstate, &mut tlist)?;

    query.target_list = tlist;
    query.jointree = FromExpr { fromlist, quals: qual };
    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    if query.has_aggs || !query.group_clause.is_empty() || query.having_qual.is_some() {
        parse_check_aggregates(pstate, &mut query)?;
    }
    Ok(query)
}

/// A bare `VALUES (...), (...)`: a VALUES range-table entry read back
/// through Vars named `column1..N`.
fn transform_values_clause(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> PgResult<Query> {
    let catalog = pstate.catalog;
    let mut query = Query::new(CmdType::Select);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }

    let mut rows: Vec<Vec<Expr>> = Vec::with_capacity(stmt.values_lists.len());
    for raw_row in &stmt.values_lists {
        let row = transform_expression_list(pstate, raw_row, ParseExprKind::Values, false)?;
        if let Some(first) = rows.first()
            && first.len() != row.len()
        {
            return Err(PgError::new(SqlState::SyntaxError, "VALUES lists must all be the same length")
                .at(raw_row.first().and_then(RawExpr::location)));
        }
        rows.push(row);
    }
    let ncols = rows.first().map_or(0, Vec::len);

    let mut columns = ColumnTypes::default();
    for col in 0..ncols {
        let inputs: Vec<(Oid, Option<usize>)> = rows
            .iter()
            .map(|row| (expr_type(&row[col]), expr_location(&row[col])))
            .collect();
        let common = select_common_type(catalog, &inputs, "VALUES")?;
        for row in &mut rows {
            let expr = std::mem::replace(&mut row[col], make_null_const(common, -1, INVALID_OID));
            row[col] = coerce_to_common_type(catalog, expr, common, "VALUES")?;
            assign_expr_collations(catalog, &mut row[col])?;
        }
        let refs: Vec<&Expr> = rows.iter().map(|row| &row[col]).collect();
        let typmod = select_common_typmod(&refs, common);
        let collation = select_common_collation(catalog, &refs, true)?;
        columns.push(common, typmod, collation);
    }

    let rtindex = add_rte_for_values(pstate, rows, columns.clone(), None, false, true)?;
    let nsitem = build_nsitem(rtindex, pstate.rte(0, rtindex)?);
    pstate.level_mut().namespace.push(nsitem);

    let mut tlist: Vec<TargetEntry> = (0..ncols)
        .map(|col| {
            let var = make_var(
                rtindex,
                col as i16 + 1,
                columns.coltypes[col],
                columns.coltypmods[col],
                columns.colcollations[col],
                0,
            );
            TargetEntry::new(var, col as i16 + 1, Some(format!("column{}", col + 1)), false)
        })
        .collect();
    query.sort_clause = transform_sort_clause(pstate, &stmt.sort_clause, &mut tlist, ParseExprKind::OrderBy, false)?;
    query.limit_offset =
        transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ParseExprKind::Offset, "OFFSET")?;
    query.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ParseExprKind::Limit, "LIMIT")?;

    query.target_list = tlist;
    query.jointree = FromExpr {
        fromlist: vec![JoinTreeNode::RangeTblRef(rtindex)],
        quals: None,
    };
    finish_level(pstate, &mut query);
    assign_query_collations(catalog, &mut query)?;
    Ok(query)
}

fn set_op_name(op: SetOperation) -> &'static str {
    match op {
        SetOperation::Union | SetOperation::None => "UNION",
        SetOperation::Intersect => "INTERSECT",
        SetOperation::Except => "EXCEPT",
    }
}

/// Output of one branch of a set-operation tree.
struct SetOpBranch {
    tree: SetOpTree,
    columns: ColumnTypes,
}

struct LeftmostLeaf {
    rtindex: Index,
    colnames: Vec<String>,
}

/// UNION / INTERSECT / EXCEPT. Each leaf SELECT becomes a subquery RTE;
/// the output is read through Vars of the leftmost leaf with the column
/// types resolved across all branches.
fn transform_set_operation_stmt(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Select);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }

    let mut leftmost: Option<LeftmostLeaf> = None;
    let branch = transform_set_operation_tree(pstate, stmt, &mut leftmost)?;
    let SetOpTree::Node(setop) = branch.tree else {
        return Err(elog("set operation tree has no operator node"));
    };
    let leftmost = leftmost.ok_or_else(|| elog("set operation without a leaf query"))?;

    let ncols = branch.columns.len();
    let mut tlist: Vec<TargetEntry> = (0..ncols)
        .map(|col| {
            let var = make_var(
                leftmost.rtindex,
                col as i16 + 1,
                branch.columns.coltypes[col],
                branch.columns.coltypmods[col],
                branch.columns.colcollations[col],
                0,
            );
            let name = leftmost.colnames.get(col).cloned();
            TargetEntry::new(var, col as i16 + 1, name, false)
        })
        .collect();

    if let Some(sortby) = stmt.sort_clause.iter().find(|sortby| !is_output_column_reference(&sortby.node)) {
        return Err(invalid_set_operation_order_by(sortby.node.location()));
    }
    query.sort_clause = transform_sort_clause(pstate, &stmt.sort_clause, &mut tlist, ParseExprKind::OrderBy, false)?;
    if tlist.len() > ncols {
        let location = tlist.get(ncols).and_then(|tle| expr_location(&tle.expr));
        return Err(invalid_set_operation_order_by(location));
    }
    query.limit_offset =
        transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ParseExprKind::Offset, "OFFSET")?;
    query.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ParseExprKind::Limit, "LIMIT")?;

    query.target_list = tlist;
    query.set_operations = Some(setop);
    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    debug!(columns = ncols, leaves = query.rtable.len(), "analyzed set operation");
    Ok(query)
}

/// A set operation's ORDER BY may name an output column or give its ordinal.
fn is_output_column_reference(node: &RawExpr) -> bool {
    match node {
        RawExpr::ColumnRef { fields, .. } => matches!(fields.as_slice(), [ColumnRefField::Name(_)]),
        RawExpr::AConst {
            value: AConstValue::Integer(_),
            ..
        } => true,
        _ => false,
    }
}

fn invalid_set_operation_order_by(location: Option<usize>) -> PgError {
    PgError::new(SqlState::FeatureNotSupported, "invalid UNION/INTERSECT/EXCEPT ORDER BY clause")
        .with_detail("Only result column names can be used, not expressions or functions.")
        .with_hint("Add the expression/function to every SELECT, or move the UNION into a FROM clause.")
        .at(location)
}

fn transform_set_operation_tree(
    pstate: &mut ParseState<'_>,
    stmt: &SelectStmt,
    leftmost: &mut Option<LeftmostLeaf>,
) -> PgResult<SetOpBranch> {
    let catalog = pstate.catalog;
    if stmt.op == SetOperation::None {
        let leafno = pstate.level().rtable.len() + 1;
        let subquery = analyze_sub_select(pstate, stmt, false)?;
        let mut columns = ColumnTypes::default();
        let mut colnames = Vec::new();
        for (idx, tle) in subquery.visible_targets().enumerate() {
            columns.push(expr_type(&tle.expr), expr_typmod(&tle.expr), expr_collation(&tle.expr));
            colnames.push(tle.resname.clone().unwrap_or_else(|| format!("?column{}?", idx + 1)));
        }
        let alias = Alias {
            aliasname: format!("*SELECT* {leafno}"),
            colnames: Vec::new(),
        };
        let rtindex = add_rte_for_subquery(pstate, subquery, Some(alias), false, false, None)?;
        if leftmost.is_none() {
            *leftmost = Some(LeftmostLeaf { rtindex, colnames });
        }
        return Ok(SetOpBranch {
            tree: SetOpTree::Leaf(rtindex),
            columns,
        });
    }

    let context = set_op_name(stmt.op);
    let (Some(larg), Some(rarg)) = (&stmt.larg, &stmt.rarg) else {
        return Err(elog(format!("{context} without both inputs")));
    };
    let left = transform_set_operation_tree(pstate, larg, leftmost)?;
    let right = transform_set_operation_tree(pstate, rarg, leftmost)?;
    if left.columns.len() != right.columns.len() {
        return Err(PgError::new(
            SqlState::SyntaxError,
            format!("each {context} query must have the same number of columns"),
        ));
    }

    let mut columns = ColumnTypes::default();
    for col in 0..left.columns.len() {
        let (ltype, rtype) = (left.columns.coltypes[col], right.columns.coltypes[col]);
        let common = select_common_type(catalog, &[(ltype, None), (rtype, None)], context)?;
        let (ltypmod, rtypmod) = (left.columns.coltypmods[col], right.columns.coltypmods[col]);
        let typmod = if ltype == common && rtype == common && ltypmod == rtypmod { ltypmod } else { -1 };
        let lcoll = coerce_set_op_column(pstate, &left.tree, col, common, context)?;
        let rcoll = coerce_set_op_column(pstate, &right.tree, col, common, context)?;
        let collation = match (lcoll, rcoll) {
            (l, r) if l == r || r == INVALID_OID => l,
            (INVALID_OID, r) => r,
            (l, r) => {
                return Err(PgError::new(
                    SqlState::CollationMismatch,
                    format!(
                        "collation mismatch between implicit collations \"{}\" and \"{}\"",
                        catalog.collation_name(l),
                        catalog.collation_name(r)
                    ),
                )
                .with_hint("You can choose the collation by applying the COLLATE clause to one or both expressions."));
            }
        };
        columns.push(common, typmod, collation);
    }

    Ok(SetOpBranch {
        tree: SetOpTree::Node(Box::new(SetOperationStmt {
            op: stmt.op,
            all: stmt.all,
            larg: left.tree,
            rarg: right.tree,
            columns: columns.clone(),
        })),
        columns,
    })
}

/// Coerce output column `col` of every leaf below `tree` to `typid`,
/// returning the column's resulting collation.
fn coerce_set_op_column(
    pstate: &mut ParseState<'_>,
    tree: &SetOpTree,
    col: usize,
    typid: Oid,
    context: &str,
) -> PgResult<Oid> {
    let catalog = pstate.catalog;
    match tree {
        SetOpTree::Leaf(rtindex) => {
            let rte = pstate.level_mut().rte_mut(*rtindex)?;
            let RteKind::Subquery { subquery } = &mut rte.kind else {
                return Err(elog("set operation leaf is not a subquery"));
            };
            let tle = subquery
                .target_list
                .iter_mut()
                .filter(|tle| !tle.resjunk)
                .nth(col)
                .ok_or_else(|| elog("set operation column out of range"))?;
            if expr_type(&tle.expr) != typid {
                let expr = std::mem::replace(&mut tle.expr, make_null_const(typid, -1, INVALID_OID));
                tle.expr = coerce_to_common_type(catalog, expr, typid, context)?;
                assign_expr_collations(catalog, &mut tle.expr)?;
            }
            Ok(expr_collation(&tle.expr))
        }
        SetOpTree::Node(node) => {
            let lcoll = coerce_set_op_column(pstate, &node.larg, col, typid, context)?;
            let rcoll = coerce_set_op_column(pstate, &node.rarg, col, typid, context)?;
            Ok(if lcoll != INVALID_OID { lcoll } else { rcoll })
        }
    }
}

fn target_relation<'c>(pstate: &ParseState<'c>, rtindex: Index) -> PgResult<&'c Relation> {
    let relid = pstate.rte(0, rtindex)?.relid();
    pstate
        .catalog
        .relation(relid)
        .ok_or_else(|| elog(format!("cache lookup failed for relation {relid}")))
}

/// A VALUES list that is nothing but rows, so INSERT can take it apart.
fn simple_values(stmt: &SelectStmt) -> bool {
    !stmt.values_lists.is_empty()
        && stmt.op == SetOperation::None
        && stmt.sort_clause.is_empty()
        && stmt.limit_offset.is_none()
        && stmt.limit_count.is_none()
        && stmt.with_clause.is_none()
}

fn transform_insert_stmt(pstate: &mut ParseState<'_>, stmt: &InsertStmt) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Insert);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }
    pstate.level_mut().is_insert = true;
    let rtindex = set_target_table(pstate, &stmt.relation, false, false, ACL_INSERT)?;
    query.result_relation = rtindex;
    let rel = target_relation(pstate, rtindex)?;
    let targets = check_insert_targets(pstate, &stmt.cols)?;

    let mut fromlist = Vec::new();
    // Source expressions, one per target column.
    let exprs: Vec<Expr> = match stmt.select_stmt.as_deref() {
        None => Vec::new(),
        Some(select) if simple_values(select) && select.values_lists.len() == 1 => {
            let row = transform_expression_list(pstate, &select.values_lists[0], ParseExprKind::ValuesSingle, true)?;
            check_insert_arity(&row, &targets, |idx| select.values_lists[0].get(idx).and_then(RawExpr::location))?;
            row.into_iter()
                .zip(&targets)
                .map(|(expr, target)| assign_insert_value(pstate, rel, expr, target))
                .collect::<PgResult<_>>()?
        }
        Some(select) if simple_values(select) => {
            let mut rows: Vec<Vec<Expr>> = Vec::with_capacity(select.values_lists.len());
            for raw_row in &select.values_lists {
                let row = transform_expression_list(pstate, raw_row, ParseExprKind::Values, true)?;
                check_insert_arity(&row, &targets, |idx| raw_row.get(idx).and_then(RawExpr::location))?;
                let mut assigned = row
                    .into_iter()
                    .zip(&targets)
                    .map(|(expr, target)| assign_insert_value(pstate, rel, expr, target))
                    .collect::<PgResult<Vec<_>>>()?;
                for expr in &mut assigned {
                    assign_expr_collations(pstate.catalog, expr)?;
                }
                rows.push(assigned);
            }
            let mut columns = ColumnTypes::default();
            for target in &targets {
                let attr = rel
                    .desc
                    .attr(target.attno)
                    .ok_or_else(|| elog(format!("column {} does not exist", target.attno)))?;
                columns.push(attr.typid, attr.typmod, attr.collation);
            }
            let values_rt = add_rte_for_values(pstate, rows, columns.clone(), None, false, true)?;
            fromlist.push(JoinTreeNode::RangeTblRef(values_rt));
            (0..targets.len())
                .map(|col| {
                    make_var(
                        values_rt,
                        col as i16 + 1,
                        columns.coltypes[col],
                        columns.coltypmods[col],
                        columns.colcollations[col],
                        0,
                    )
                })
                .collect()
        }
        Some(select) => {
            // Unknown-typed outputs are left for assignment to resolve.
            let subquery = analyze_sub_select(pstate, select, false)?;
            let alias = Alias {
                aliasname: "*SELECT*".to_string(),
                colnames: Vec::new(),
            };
            let sub_rt = add_rte_for_subquery(pstate, subquery, Some(alias), false, true, None)?;
            fromlist.push(JoinTreeNode::RangeTblRef(sub_rt));
            let RteKind::Subquery { subquery } = &pstate.rte(0, sub_rt)?.kind else {
                return Err(elog("INSERT source is not a subquery"));
            };
            let vars: Vec<Expr> = subquery
                .visible_targets()
                .enumerate()
                .map(|(idx, tle)| {
                    make_var(
                        sub_rt,
                        idx as i16 + 1,
                        expr_type(&tle.expr),
                        expr_typmod(&tle.expr),
                        expr_collation(&tle.expr),
                        0,
                    )
                })
                .collect();
            check_insert_arity(&vars, &targets, |_| None)?;
            vars.into_iter()
                .zip(&targets)
                .map(|(expr, target)| assign_insert_value(pstate, rel, expr, target))
                .collect::<PgResult<_>>()?
        }
    };

    let mut tlist = Vec::with_capacity(exprs.len());
    for (expr, target) in exprs.into_iter().zip(&targets) {
        tlist.push(TargetEntry::new(expr, target.attno, Some(target.name.clone()), false));
        let rte = pstate.level_mut().rte_mut(rtindex)?;
        if !rte.modified_cols.contains(&target.attno) {
            rte.modified_cols.push(target.attno);
        }
    }
    query.target_list = tlist;
    query.jointree = FromExpr { fromlist, quals: None };

    // RETURNING sees only the target relation.
    let nsitem = build_nsitem(rtindex, pstate.rte(0, rtindex)?);
    pstate.level_mut().namespace = vec![nsitem];
    query.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;

    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    Ok(query)
}

fn check_insert_arity(
    exprs: &[Expr],
    targets: &[crate::parser::parse_target::InsertTarget],
    location_of: impl Fn(usize) -> Option<usize>,
) -> PgResult<()> {
    if exprs.len() > targets.len() {
        let location = expr_location(&exprs[targets.len()]).or_else(|| location_of(targets.len()));
        return Err(PgError::new(SqlState::SyntaxError, "INSERT has more expressions than target columns").at(location));
    }
    if exprs.len() < targets.len() {
        return Err(PgError::new(SqlState::SyntaxError, "INSERT has more target columns than expressions")
            .at(targets[exprs.len()].location));
    }
    Ok(())
}

/// Coerce one VALUES item to its column, replacing DEFAULT with the
/// column default (or a typed null).
fn assign_insert_value(
    pstate: &mut ParseState<'_>,
    rel: &Relation,
    expr: Expr,
    target: &crate::parser::parse_target::InsertTarget,
) -> PgResult<Expr> {
    let location = expr_location(&expr).or(target.location);
    let assigned = transform_assigned_expr(pstate, expr, &target.name, target.attno, &target.indirection, location)?;
    let Expr::SetToDefault(def) = assigned else {
        return Ok(assigned);
    };
    match rel.default_for(target.attno) {
        Some(default) => transform_assigned_expr(
            pstate,
            default.clone(),
            &target.name,
            target.attno,
            &[],
            location,
        ),
        None => Ok(make_null_const(def.type_id, def.type_mod, def.collation)),
    }
}

fn transform_update_stmt(pstate: &mut ParseState<'_>, stmt: &UpdateStmt) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Update);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }
    let rtindex = set_target_table(pstate, &stmt.relation, true, true, ACL_UPDATE)?;
    query.result_relation = rtindex;

    let mut fromlist = vec![JoinTreeNode::RangeTblRef(rtindex)];
    fromlist.extend(transform_from_clause(pstate, &stmt.from_clause)?);
    let qual = stmt
        .where_clause
        .as_ref()
        .map(|raw| transform_where_clause(pstate, raw, ParseExprKind::Where, "WHERE"))
        .transpose()?;

    query.target_list = transform_update_target_list(pstate, rtindex, &stmt.target_list)?;
    query.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;
    query.jointree = FromExpr { fromlist, quals: qual };
    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    Ok(query)
}

fn transform_update_target_list(
    pstate: &mut ParseState<'_>,
    rtindex: Index,
    targets: &[ResTarget],
) -> PgResult<Vec<TargetEntry>> {
    let rel = target_relation(pstate, rtindex)?;
    let mut tlist: Vec<TargetEntry> = Vec::with_capacity(targets.len());
    for target in targets {
        let name = target.name.as_deref().ok_or_else(|| elog("UPDATE target without a column name"))?;
        let raw = target.val.as_ref().ok_or_else(|| elog("UPDATE target without a value"))?;
        let attno = rel.desc.attnum_by_name(name).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedColumn,
                format!("column \"{name}\" of relation \"{}\" does not exist", rel.name),
            )
            .at(target.location)
        })?;
        if target.indirection.is_empty() && tlist.iter().any(|tle| tle.resno == attno) {
            return Err(PgError::new(
                SqlState::SyntaxError,
                format!("multiple assignments to same column \"{name}\""),
            )
            .at(target.location));
        }
        let expr = match raw {
            RawExpr::SetToDefault { location } => make_set_to_default(*location),
            _ => transform_expr(pstate, raw, ParseExprKind::UpdateSource)?,
        };
        let mut tle = TargetEntry::new(expr, attno, Some(name.to_string()), false);
        update_target_list_entry(pstate, &mut tle, name, attno, &target.indirection, target.location)?;
        let rte = pstate.level_mut().rte_mut(rtindex)?;
        if !rte.modified_cols.contains(&attno) {
            rte.modified_cols.push(attno);
        }
        tlist.push(tle);
    }
    // Sub-selects feeding `(a, b) = (SELECT ...)` are evaluated once per row
    // ahead of the assignments that read them.
    let sources = std::mem::take(&mut pstate.level_mut().multiassign_exprs);
    for mut source in sources {
        source.resno = i16::try_from(tlist.len() + 1).map_err(|_| elog("too many UPDATE targets"))?;
        source.resjunk = true;
        tlist.push(source);
    }
    Ok(tlist)
}

fn transform_delete_stmt(pstate: &mut ParseState<'_>, stmt: &DeleteStmt) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Delete);
    if let Some(with) = &stmt.with_clause {
        transform_with_clause(pstate, with)?;
    }
    let rtindex = set_target_table(pstate, &stmt.relation, true, true, ACL_DELETE)?;
    query.result_relation = rtindex;

    let mut fromlist = vec![JoinTreeNode::RangeTblRef(rtindex)];
    fromlist.extend(transform_from_clause(pstate, &stmt.using_clause)?);
    let qual = stmt
        .where_clause
        .as_ref()
        .map(|raw| transform_where_clause(pstate, raw, ParseExprKind::Where, "WHERE"))
        .transpose()?;
    query.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;
    query.jointree = FromExpr { fromlist, quals: qual };
    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    Ok(query)
}

fn transform_returning_list(pstate: &mut ParseState<'_>, returning: &[ResTarget]) -> PgResult<Vec<TargetEntry>> {
    if returning.is_empty() {
        return Ok(Vec::new());
    }
    let mut tlist = transform_target_list(pstate, returning, ParseExprKind::Returning)?;
    resolve_target_list_unknowns(pstate, &mut tlist)?;
    mark_target_list_origins(pstate, &mut tlist);
    Ok(tlist)
}

/// `RETURN expr` in a function body: a one-column SELECT without FROM.
fn transform_return_stmt(pstate: &mut ParseState<'_>, raw: &RawExpr) -> PgResult<Query> {
    let mut query = Query::new(CmdType::Select);
    let expr = transform_expr(pstate, raw, ParseExprKind::SelectTarget)?;
    let mut tlist = vec![TargetEntry::new(expr, 1, None, false)];
    resolve_target_list_unknowns(pstate, &mut tlist)?;
    query.target_list = tlist;
    finish_level(pstate, &mut query);
    assign_query_collations(pstate.catalog, &mut query)?;
    if query.has_aggs {
        parse_check_aggregates(pstate, &mut query)?;
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PG_PUBLIC_NAMESPACE;
    use crate::catalog::pg_type::{INT4OID, INT8OID, TEXTOID};
    use crate::catalog::table::{Persistence, RelKind};
    use crate::nodes::datum::Datum;
    use crate::nodes::makefuncs::make_const;
    use crate::nodes::primnodes::{ParamKind, SubLinkType};
    use crate::nodes::tupdesc::{Attribute, TupleDesc};
    use crate::parser::gram::raw_parser;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        let desc = TupleDesc::new(vec![
            Attribute::new("id", INT4OID, -1, INVALID_OID),
            Attribute::new("qty", INT4OID, -1, INVALID_OID),
            Attribute::new("note", TEXTOID, -1, crate::catalog::pg_type::DEFAULT_COLLATION_OID),
        ]);
        let relid = catalog
            .create_relation("stock", PG_PUBLIC_NAMESPACE, RelKind::Table, Persistence::Permanent, desc)
            .unwrap();
        catalog
            .relation_mut(relid)
            .unwrap()
            .defaults
            .insert(2, make_const(INT4OID, Datum::Int4(42)));
        catalog
    }

    fn analyze(catalog: &Catalog, sql: &str) -> PgResult<Query> {
        let stmts = raw_parser(sql)?;
        parse_analyze(catalog, &stmts[0], sql, &[])
    }

    #[test]
    fn select_clauses_land_in_query() {
        let catalog = catalog();
        let query = analyze(
            &catalog,
            "SELECT DISTINCT note, id FROM stock WHERE qty > 1 ORDER BY note LIMIT 5 OFFSET 1",
        )
        .unwrap();
        assert_eq!(query.command_type, CmdType::Select);
        assert_eq!(query.visible_targets().count(), 2);
        assert!(query.jointree.quals.is_some());
        assert_eq!(query.sort_clause.len(), 1);
        assert_eq!(query.distinct_clause.len(), 2);
        assert_eq!(query.limit_count.as_ref().map(expr_type), Some(INT8OID));
        assert_eq!(query.target_list[0].resorigcol, 3);
    }

    #[test]
    fn distinct_on_must_lead_order_by() {
        let catalog = catalog();
        let query = analyze(&catalog, "SELECT DISTINCT ON (qty) id FROM stock ORDER BY qty, id").unwrap();
        assert!(query.has_distinct_on);
        assert_eq!(query.distinct_clause.len(), 1);
        let err = analyze(&catalog, "SELECT DISTINCT ON (qty) id FROM stock ORDER BY id").unwrap_err();
        assert_eq!(err.message, "SELECT DISTINCT ON expressions must match initial ORDER BY expressions");
    }

    #[test]
    fn values_columns_share_a_type() {
        let catalog = catalog();
        let query = analyze(&catalog, "VALUES (1, 'a'), (2.5, 'b') ORDER BY column1").unwrap();
        let RteKind::Values { columns, values_lists } = &query.rtable[0].kind else {
            panic!("expected a VALUES RTE");
        };
        assert_eq!(values_lists.len(), 2);
        assert_eq!(columns.coltypes, vec![crate::catalog::pg_type::NUMERICOID, TEXTOID]);
        assert_eq!(query.target_list[0].resname.as_deref(), Some("column1"));
        let err = analyze(&catalog, "VALUES (1), (2, 3)").unwrap_err();
        assert_eq!(err.message, "VALUES lists must all be the same length");
    }

    #[test]
    fn set_operation_resolves_column_types() {
        let catalog = catalog();
        let query = analyze(&catalog, "SELECT 1 AS a UNION ALL SELECT 2.5 ORDER BY a").unwrap();
        let setop = query.set_operations.as_ref().unwrap();
        assert!(setop.all);
        assert_eq!(setop.columns.coltypes, vec![crate::catalog::pg_type::NUMERICOID]);
        assert_eq!(query.rtable.len(), 2);
        assert_eq!(query.rtable[0].eref.aliasname, "*SELECT* 1");
        assert_eq!(query.target_list[0].resname.as_deref(), Some("a"));

        let err = analyze(&catalog, "SELECT 1 UNION SELECT 1, 2").unwrap_err();
        assert_eq!(err.message, "each UNION query must have the same number of columns");
        let err = analyze(&catalog, "SELECT 1 AS a EXCEPT SELECT 2 ORDER BY a + 1").unwrap_err();
        assert_eq!(err.message, "invalid UNION/INTERSECT/EXCEPT ORDER BY clause");
        assert_eq!(err.sqlstate, SqlState::FeatureNotSupported);
        let query = analyze(&catalog, "SELECT 1 AS a EXCEPT SELECT 2 ORDER BY 1").unwrap();
        assert_eq!(query.sort_clause.len(), 1);
    }

    #[test]
    fn unknown_literals_in_union_become_text() {
        let catalog = catalog();
        let query = analyze(&catalog, "SELECT 'x' UNION SELECT 'y'").unwrap();
        assert_eq!(expr_type(&query.target_list[0].expr), TEXTOID);
    }

    #[test]
    fn insert_values_replaces_default() {
        let catalog = catalog();
        let query = analyze(&catalog, "INSERT INTO stock (id, qty) VALUES (1, DEFAULT)").unwrap();
        assert_eq!(query.command_type, CmdType::Insert);
        assert_eq!(query.result_relation, 1);
        assert_eq!(query.target_list.len(), 2);
        assert!(matches!(
            &query.target_list[1].expr,
            Expr::Const(c) if c.constvalue == Datum::Int4(42)
        ));

        let query = analyze(&catalog, "INSERT INTO stock VALUES (1, 2, 'a'), (3, DEFAULT, DEFAULT)").unwrap();
        let RteKind::Values { values_lists, .. } = &query.rtable[1].kind else {
            panic!("expected VALUES source");
        };
        assert!(matches!(&values_lists[1][2], Expr::Const(c) if c.constvalue.is_null()));
    }

    #[test]
    fn insert_arity_is_checked() {
        let catalog = catalog();
        let err = analyze(&catalog, "INSERT INTO stock (id) VALUES (1, 2)").unwrap_err();
        assert_eq!(err.message, "INSERT has more expressions than target columns");
        let err = analyze(&catalog, "INSERT INTO stock (id, qty) SELECT 1").unwrap_err();
        assert_eq!(err.message, "INSERT has more target columns than expressions");
    }

    #[test]
    fn insert_select_coerces_unknown_outputs() {
        let catalog = catalog();
        let query = analyze(&catalog, "INSERT INTO stock (id, note) SELECT 7, 'n' RETURNING id, note").unwrap();
        assert_eq!(expr_type(&query.target_list[1].expr), TEXTOID);
        assert_eq!(query.returning_list.len(), 2);
    }

    #[test]
    fn update_multi_assignment_keeps_source() {
        let catalog = catalog();
        let query = analyze(
            &catalog,
            "UPDATE stock SET (qty, note) = (SELECT 1, 'x'), id = DEFAULT WHERE id = 3",
        )
        .unwrap();
        assert_eq!(query.command_type, CmdType::Update);
        let visible: Vec<i16> = query.target_list.iter().filter(|t| !t.resjunk).map(|t| t.resno).collect();
        assert_eq!(visible, vec![2, 3, 1]);
        assert!(matches!(
            &query.target_list[0].expr,
            Expr::Param(p) if p.paramkind == ParamKind::Multiexpr && p.paramid == (1 << 16) | 1
        ));
        let junk = query.target_list.iter().find(|t| t.resjunk).unwrap();
        assert!(matches!(&junk.expr, Expr::SubLink(s) if s.sub_link_type == SubLinkType::MultiExpr));
        assert!(matches!(&query.target_list[2].expr, Expr::SetToDefault(_)));

        let err = analyze(&catalog, "UPDATE stock SET qty = 1, qty = 2").unwrap_err();
        assert_eq!(err.message, "multiple assignments to same column \"qty\"");
    }

    #[test]
    fn delete_using_joins_target() {
        let catalog = catalog();
        let query = analyze(
            &catalog,
            "DELETE FROM stock s USING (VALUES (1)) v(x) WHERE s.id = v.x RETURNING s.note",
        )
        .unwrap();
        assert_eq!(query.command_type, CmdType::Delete);
        assert_eq!(query.jointree.fromlist.len(), 2);
        assert_eq!(query.returning_list[0].resname.as_deref(), Some("note"));
    }

    #[test]
    fn utility_statements_pass_through() {
        let catalog = catalog();
        let query = analyze(&catalog, "REFRESH MATERIALIZED VIEW mv").unwrap();
        assert_eq!(query.command_type, CmdType::Utility);
        assert!(query.utility_stmt.is_some());
    }
}
