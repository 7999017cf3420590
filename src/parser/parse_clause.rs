//! FROM, WHERE, ORDER BY, GROUP BY, DISTINCT, LIMIT and WINDOW clauses.
//!
//! FROM items are transformed left to right. Each finished item's namespace
//! entries are appended to the level's namespace as lateral-only, so that a
//! later LATERAL item can see them while ordinary items cannot. Once the
//! whole list is done every entry becomes fully visible.

use tracing::{debug, trace};

use crate::catalog::oid::INVALID_OID;
use crate::catalog::pg_type::{INT8OID, RECORDOID, TypeCategory, UNKNOWNOID};
use crate::catalog::table::RelKind;
use crate::nodes::makefuncs::{make_ands_explicit, make_null_const, make_var};
use crate::nodes::node_funcs::{
    contain_vars_of_level, expr_collation, expr_location, expr_type, expr_typmod, expression_tree_mutator,
    locate_var_of_level,
};
use crate::nodes::parsenodes::{
    AConstValue, Alias, ColumnRefField, ColumnTypes, FrameBoundKind, FrameMode, FromItem, JoinExpr, JoinTreeNode,
    JoinType, RangeVar, RawExpr, RteKind, SelectStmt, SortBy, SortByDir, SortByNulls, SortGroupClause,
    WindowClause, WindowDef,
};
use crate::nodes::primnodes::{CoalesceExpr, Expr, Index, Location, TargetEntry};
use crate::parser::analyze::parse_sub_analyze;
use crate::parser::parse_coerce::{
    coerce_to_boolean, coerce_to_common_type, coerce_to_specific_type, select_common_type,
};
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_expr::{resolve_unknown_to_text, transform_expr};
use crate::parser::parse_jsontable::transform_json_table;
use crate::parser::parse_node::{NamespaceItem, ParseExprKind, ParseState};
use crate::parser::parse_oper::{get_sort_group_operators, make_op};
use crate::parser::parse_relation::{
    add_rte_for_cte, add_rte_for_function, add_rte_for_join, add_rte_for_relation, add_rte_for_subquery,
    build_nsitem, check_namespace_conflicts, parser_open_table, rte_column_type, scan_ns_for_cte,
};
use crate::parser::parse_target::figure_colname;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// A transformed FROM item.
struct FromResult {
    node: JoinTreeNode,
    /// RTE whose columns the item exposes (the join RTE for joins).
    rtindex: Index,
    namespace: Vec<NamespaceItem>,
}

/// Transform the FROM list, leaving every item visible in the current
/// level's namespace.
pub fn transform_from_clause(pstate: &mut ParseState<'_>, from: &[FromItem]) -> PgResult<Vec<JoinTreeNode>> {
    let mut fromlist = Vec::with_capacity(from.len());
    for item in from {
        let result = transform_from_item(pstate, item)?;
        for nsitem in &result.namespace {
            check_namespace_conflicts(pstate, nsitem, from_item_location(item))?;
        }
        let level = pstate.level_mut();
        level.namespace.extend(result.namespace.into_iter().map(|mut nsitem| {
            nsitem.lateral_only = true;
            nsitem.lateral_ok = true;
            nsitem
        }));
        fromlist.push(result.node);
    }
    for nsitem in &mut pstate.level_mut().namespace {
        nsitem.lateral_only = false;
    }
    debug!(items = fromlist.len(), "transformed FROM clause");
    Ok(fromlist)
}

fn from_item_location(item: &FromItem) -> Option<usize> {
    match item {
        FromItem::RangeVar(rv) => rv.location,
        FromItem::RangeSubselect { location, .. }
        | FromItem::RangeFunction { location, .. }
        | FromItem::Join { location, .. } => *location,
        FromItem::JsonTable(jt) => jt.location,
    }
}

fn transform_from_item(pstate: &mut ParseState<'_>, item: &FromItem) -> PgResult<FromResult> {
    let rtindex = match item {
        FromItem::RangeVar(rv) => transform_table_entry(pstate, rv)?,
        FromItem::RangeSubselect {
            lateral,
            subquery,
            alias,
            location,
        } => transform_range_subselect(pstate, *lateral, subquery, alias.clone(), *location)?,
        FromItem::RangeFunction {
            lateral,
            ordinality,
            function,
            alias,
            location,
        } => transform_range_function(pstate, *lateral, *ordinality, function, alias.clone(), *location)?,
        FromItem::Join {
            jointype,
            is_natural,
            larg,
            rarg,
            using_clause,
            join_using_alias,
            quals,
            alias,
            location,
        } => {
            return transform_join(
                pstate,
                JoinSpec {
                    jointype: *jointype,
                    is_natural: *is_natural,
                    using_clause,
                    join_using_alias: join_using_alias.as_ref(),
                    quals: quals.as_deref(),
                    alias: alias.as_ref(),
                    location: *location,
                },
                larg,
                rarg,
            );
        }
        FromItem::JsonTable(jt) => transform_json_table(pstate, jt)?,
    };
    let nsitem = build_nsitem(rtindex, pstate.rte(0, rtindex)?);
    Ok(FromResult {
        node: JoinTreeNode::RangeTblRef(rtindex),
        rtindex,
        namespace: vec![nsitem],
    })
}

fn transform_table_entry(pstate: &mut ParseState<'_>, rv: &RangeVar) -> PgResult<Index> {
    if rv.schemaname.is_none()
        && let Some((levels_up, cte_index)) = scan_ns_for_cte(pstate, &rv.relname)
    {
        trace!(cte = %rv.relname, levels_up, "FROM item refers to a WITH query");
        return add_rte_for_cte(pstate, levels_up, cte_index, rv, true);
    }
    let rel = parser_open_table(pstate, rv)?;
    add_rte_for_relation(pstate, rel, rv.alias.clone(), rv.inh, true, rv.location)
}

fn transform_range_subselect(
    pstate: &mut ParseState<'_>,
    lateral: bool,
    subquery: &SelectStmt,
    alias: Option<Alias>,
    location: Option<usize>,
) -> PgResult<Index> {
    let saved_lateral = std::mem::replace(&mut pstate.level_mut().lateral_active, lateral);
    let saved_kind = pstate.set_expr_kind(ParseExprKind::FromSubselect);
    let query = parse_sub_analyze(pstate, subquery);
    pstate.restore_expr_kind(saved_kind);
    pstate.level_mut().lateral_active = saved_lateral;
    add_rte_for_subquery(pstate, query?, alias, lateral, true, location)
}

fn transform_range_function(
    pstate: &mut ParseState<'_>,
    lateral: bool,
    ordinality: bool,
    function: &RawExpr,
    alias: Option<Alias>,
    location: Option<usize>,
) -> PgResult<Index> {
    // Function arguments may always refer to earlier FROM items.
    let saved_lateral = std::mem::replace(&mut pstate.level_mut().lateral_active, true);
    let expr = transform_expr(pstate, function, ParseExprKind::FromFunction);
    pstate.level_mut().lateral_active = saved_lateral;
    let mut expr = expr?;
    assign_expr_collations(pstate.catalog, &mut expr)?;

    let catalog = pstate.catalog;
    let funcname = figure_colname(function);
    let rettype = expr_type(&expr);
    let mut columns = ColumnTypes::default();
    let mut colnames = Vec::new();
    let returns_composite = rettype != RECORDOID && catalog.is_composite_type(rettype);
    if returns_composite {
        let desc = catalog
            .composite_desc(rettype)
            .ok_or_else(|| elog(format!("type {} is not composite", catalog.format_type(rettype))))?;
        for attr in &desc.attrs {
            if attr.dropped {
                colnames.push(String::new());
            } else {
                colnames.push(attr.name.clone());
            }
            columns.push(attr.typid, attr.typmod, attr.collation);
        }
    } else if rettype == RECORDOID {
        return Err(PgError::new(
            SqlState::SyntaxError,
            "a column definition list is required for functions returning \"record\"",
        )
        .at(location));
    } else {
        let colname = alias.as_ref().map_or_else(|| funcname.clone(), |a| a.aliasname.clone());
        colnames.push(colname);
        columns.push(rettype, expr_typmod(&expr), expr_collation(&expr));
    }
    if ordinality {
        colnames.push("ordinality".to_string());
        columns.push(INT8OID, -1, INVALID_OID);
    }
    add_rte_for_function(
        pstate,
        &funcname,
        expr,
        columns,
        colnames,
        returns_composite,
        alias,
        ordinality,
        lateral,
        location,
    )
}

struct JoinSpec<'a> {
    jointype: JoinType,
    is_natural: bool,
    using_clause: &'a [String],
    join_using_alias: Option<&'a Alias>,
    quals: Option<&'a RawExpr>,
    alias: Option<&'a Alias>,
    location: Option<usize>,
}

fn transform_join(pstate: &mut ParseState<'_>, spec: JoinSpec<'_>, larg: &FromItem, rarg: &FromItem) -> PgResult<FromResult> {
    let left = transform_from_item(pstate, larg)?;

    // A LATERAL right input may refer to the left input, unless the join
    // would have to null-extend the left side.
    let base = pstate.level().namespace.len();
    let lateral_ok = matches!(spec.jointype, JoinType::Inner | JoinType::Left);
    pstate
        .level_mut()
        .namespace
        .extend(left.namespace.iter().cloned().map(|mut nsitem| {
            nsitem.lateral_only = true;
            nsitem.lateral_ok = lateral_ok;
            nsitem
        }));
    let right = transform_from_item(pstate, rarg);
    pstate.level_mut().namespace.truncate(base);
    let right = right?;
    check_sibling_conflicts(&left.namespace, &right.namespace, spec.location)?;

    let left_cols = rte_output_columns(pstate, left.rtindex)?;
    let right_cols = rte_output_columns(pstate, right.rtindex)?;

    let using: Vec<String> = if spec.is_natural {
        let mut common = Vec::new();
        for (name, _) in &left_cols {
            if right_cols.iter().any(|(rname, _)| rname == name) && !common.contains(name) {
                common.push(name.clone());
            }
        }
        common
    } else {
        spec.using_clause.to_vec()
    };

    let mut merged_names = Vec::with_capacity(using.len());
    let mut merged_exprs = Vec::with_capacity(using.len());
    let mut left_used = Vec::new();
    let mut right_used = Vec::new();
    let mut using_quals = Vec::new();
    for (i, name) in using.iter().enumerate() {
        if using[..i].contains(name) {
            return Err(PgError::new(
                SqlState::DuplicateColumn,
                format!("column name \"{name}\" appears more than once in USING clause"),
            )
            .at(spec.location));
        }
        let li = find_using_column(&left_cols, name, "left", spec.location)?;
        let ri = find_using_column(&right_cols, name, "right", spec.location)?;
        left_used.push(li);
        right_used.push(ri);
        let lexpr = left_cols[li].1.clone();
        let rexpr = right_cols[ri].1.clone();
        using_quals.push(make_op(
            pstate,
            &["=".to_string()],
            Some(lexpr.clone()),
            rexpr.clone(),
            spec.location,
        )?);
        merged_names.push(name.clone());
        merged_exprs.push(build_merged_join_var(pstate, spec.jointype, lexpr, rexpr)?);
    }

    let quals = if !using_quals.is_empty() {
        let qual = make_ands_explicit(using_quals).ok_or_else(|| elog("empty USING qualification"))?;
        Some(coerce_to_boolean(pstate.catalog, qual, "JOIN/USING")?)
    } else if let Some(raw) = spec.quals {
        // ON sees exactly the two inputs.
        let base = pstate.level().namespace.len();
        pstate.level_mut().namespace.extend(
            left.namespace
                .iter()
                .chain(right.namespace.iter())
                .cloned()
                .map(|mut nsitem| {
                    nsitem.lateral_only = false;
                    nsitem
                }),
        );
        let qual = transform_where_clause(pstate, raw, ParseExprKind::JoinOn, "JOIN/ON");
        pstate.level_mut().namespace.truncate(base);
        Some(qual?)
    } else {
        None
    };

    let nmerged = merged_names.len();
    let mut colnames = merged_names;
    let mut aliasvars = merged_exprs;
    for (cols, used) in [(&left_cols, &left_used), (&right_cols, &right_used)] {
        for (i, (name, expr)) in cols.iter().enumerate() {
            if !used.contains(&i) {
                colnames.push(name.clone());
                aliasvars.push(expr.clone());
            }
        }
    }
    let rtindex = add_rte_for_join(
        pstate,
        colnames,
        spec.jointype,
        aliasvars,
        nmerged,
        spec.alias.cloned(),
        spec.location,
    )?;
    trace!(rtindex, merged = nmerged, "join range table entry");

    // An aliased join hides its inputs; otherwise they stay usable as
    // qualifiers but their columns are reached through the join.
    let mut namespace = Vec::new();
    if spec.alias.is_none() {
        namespace.extend(left.namespace.into_iter().chain(right.namespace).map(|mut nsitem| {
            nsitem.cols_visible = false;
            nsitem
        }));
    }
    let rte = pstate.rte(0, rtindex)?;
    if let Some(using_alias) = spec.join_using_alias {
        let mut nsitem = build_nsitem(rtindex, rte);
        nsitem.refname = using_alias.aliasname.clone();
        nsitem.colnames.truncate(nmerged);
        nsitem.cols_visible = false;
        namespace.push(nsitem);
    }
    let mut jnsitem = build_nsitem(rtindex, rte);
    jnsitem.rel_visible = spec.alias.is_some();
    namespace.push(jnsitem);

    Ok(FromResult {
        node: JoinTreeNode::Join(Box::new(JoinExpr {
            jointype: spec.jointype,
            larg: left.node,
            rarg: right.node,
            quals,
            rtindex,
        })),
        rtindex,
        namespace,
    })
}

fn check_sibling_conflicts(left: &[NamespaceItem], right: &[NamespaceItem], location: Option<usize>) -> PgResult<()> {
    for l in left.iter().filter(|item| item.rel_visible) {
        if right.iter().any(|r| r.rel_visible && r.refname == l.refname) {
            return Err(PgError::new(
                SqlState::DuplicateAlias,
                format!("table name \"{}\" specified more than once", l.refname),
            )
            .at(location));
        }
    }
    Ok(())
}

fn find_using_column(cols: &[(String, Expr)], name: &str, side: &str, location: Option<usize>) -> PgResult<usize> {
    let mut found = None;
    for (i, (colname, _)) in cols.iter().enumerate() {
        if colname == name {
            if found.is_some() {
                return Err(PgError::new(
                    SqlState::AmbiguousColumn,
                    format!("common column name \"{name}\" appears more than once in {side} table"),
                )
                .at(location));
            }
            found = Some(i);
        }
    }
    found.ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedColumn,
            format!("column \"{name}\" specified in USING clause does not exist in {side} table"),
        )
        .at(location)
    })
}

/// Live output columns of an RTE with the expression each one stands for.
/// Join inputs contribute their alias expressions, so join columns never
/// reference join RTEs.
fn rte_output_columns(pstate: &ParseState<'_>, rtindex: Index) -> PgResult<Vec<(String, Expr)>> {
    let rte = pstate.rte(0, rtindex)?;
    let mut out = Vec::with_capacity(rte.eref.colnames.len());
    for (idx, name) in rte.eref.colnames.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let expr = match &rte.kind {
            RteKind::Join { joinaliasvars, .. } => joinaliasvars
                .get(idx)
                .cloned()
                .ok_or_else(|| elog(format!("invalid join column {}", idx + 1)))?,
            _ => {
                let attno = idx as i16 + 1;
                let (typid, typmod, collation) = rte_column_type(pstate.catalog, rte, attno)?;
                make_var(rtindex, attno, typid, typmod, collation, 0)
            }
        };
        out.push((name.clone(), expr));
    }
    Ok(out)
}

fn build_merged_join_var(pstate: &ParseState<'_>, jointype: JoinType, lexpr: Expr, rexpr: Expr) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let common = select_common_type(
        catalog,
        &[
            (expr_type(&lexpr), expr_location(&lexpr)),
            (expr_type(&rexpr), expr_location(&rexpr)),
        ],
        "JOIN/USING",
    )?;
    let lexpr = coerce_to_common_type(catalog, lexpr, common, "JOIN/USING")?;
    let rexpr = coerce_to_common_type(catalog, rexpr, common, "JOIN/USING")?;
    Ok(match jointype {
        JoinType::Inner | JoinType::Left => lexpr,
        JoinType::Right => rexpr,
        JoinType::Full => Expr::CoalesceExpr(Box::new(CoalesceExpr {
            coalescetype: common,
            coalescecollid: INVALID_OID,
            args: vec![lexpr, rexpr],
            location: Location(None),
        })),
    })
}

/// Open the target relation of INSERT/UPDATE/DELETE and add it to the
/// range table. `also_source` makes it visible to name lookup.
pub fn set_target_table(
    pstate: &mut ParseState<'_>,
    rv: &RangeVar,
    inh: bool,
    also_source: bool,
    required_perms: u32,
) -> PgResult<Index> {
    let rel = parser_open_table(pstate, rv)?;
    if matches!(rel.kind, RelKind::View | RelKind::CompositeType) {
        return Err(PgError::new(
            SqlState::WrongObjectType,
            format!("cannot change {} \"{}\"", rel.kind.describe(), rel.name),
        )
        .at(rv.location));
    }
    let rtindex = add_rte_for_relation(pstate, rel, rv.alias.clone(), inh, also_source, rv.location)?;
    let level = pstate.level_mut();
    level.rte_mut(rtindex)?.required_perms = required_perms;
    level.target_relation = Some(rtindex);
    if also_source {
        let nsitem = build_nsitem(rtindex, pstate.rte(0, rtindex)?);
        pstate.level_mut().namespace.push(nsitem);
    }
    Ok(rtindex)
}

/// WHERE, HAVING, JOIN/ON and FILTER conditions.
pub fn transform_where_clause(
    pstate: &mut ParseState<'_>,
    raw: &RawExpr,
    kind: ParseExprKind,
    construct: &str,
) -> PgResult<Expr> {
    let qual = transform_expr(pstate, raw, kind)?;
    coerce_to_boolean(pstate.catalog, qual, construct)
}

/// LIMIT and OFFSET: int8, and independent of the current row.
pub fn transform_limit_clause(
    pstate: &mut ParseState<'_>,
    raw: Option<&RawExpr>,
    kind: ParseExprKind,
    construct: &str,
) -> PgResult<Option<Expr>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let expr = transform_expr(pstate, raw, kind)?;
    let expr = coerce_to_specific_type(pstate.catalog, expr, INT8OID, construct)?;
    check_expr_is_var_free(&expr, construct)?;
    Ok(Some(expr))
}

fn check_expr_is_var_free(expr: &Expr, construct: &str) -> PgResult<()> {
    if contain_vars_of_level(expr, 0) {
        return Err(PgError::new(
            SqlState::InvalidColumnReference,
            format!("argument of {construct} must not contain variables"),
        )
        .at(locate_var_of_level(expr, 0)));
    }
    Ok(())
}

/// True when some fully visible FROM item of the current level has a
/// column of this name.
fn is_input_column_name(pstate: &ParseState<'_>, name: &str) -> bool {
    pstate
        .level()
        .namespace
        .iter()
        .filter(|item| item.cols_visible && !item.lateral_only)
        .any(|item| item.colnames.iter().any(|col| col == name))
}

/// Find (or add as resjunk) the target entry an ORDER BY, GROUP BY or
/// DISTINCT ON item refers to, returning its index in `tlist`.
///
/// Outside `sql99` mode a bare name matches an output column name and an
/// integer constant is an output column position, as SQL92 has it. For
/// GROUP BY an input column of the same name wins over an output name.
pub fn find_target_list_entry(
    pstate: &mut ParseState<'_>,
    node: &RawExpr,
    tlist: &mut Vec<TargetEntry>,
    kind: ParseExprKind,
    sql99: bool,
) -> PgResult<usize> {
    let clause = kind.name();
    if !sql99 {
        if let RawExpr::ColumnRef { fields, location } = node
            && let [ColumnRefField::Name(name)] = fields.as_slice()
            && !(kind == ParseExprKind::GroupBy && is_input_column_name(pstate, name))
        {
            let mut found: Option<usize> = None;
            for (idx, tle) in tlist.iter().enumerate() {
                if tle.resjunk || tle.resname.as_deref() != Some(name.as_str()) {
                    continue;
                }
                match found {
                    Some(prev) if tlist[prev].expr != tle.expr => {
                        return Err(PgError::new(
                            SqlState::AmbiguousColumn,
                            format!("{clause} \"{name}\" is ambiguous"),
                        )
                        .at(*location));
                    }
                    Some(_) => {}
                    None => found = Some(idx),
                }
            }
            if let Some(idx) = found {
                return Ok(idx);
            }
        }
        if let RawExpr::AConst { value, location } = node {
            let AConstValue::Integer(position) = value else {
                return Err(PgError::new(SqlState::SyntaxError, format!("non-integer constant in {clause}"))
                    .at(*location));
            };
            let target = usize::try_from(*position)
                .ok()
                .and_then(|pos| pos.checked_sub(1))
                .and_then(|nth| {
                    tlist
                        .iter()
                        .enumerate()
                        .filter(|(_, tle)| !tle.resjunk)
                        .nth(nth)
                        .map(|(idx, _)| idx)
                });
            return target.ok_or_else(|| {
                PgError::new(
                    SqlState::InvalidColumnReference,
                    format!("{clause} position {position} is not in select list"),
                )
                .at(*location)
            });
        }
    }

    let expr = transform_expr(pstate, node, kind)?;
    if let Some(idx) = tlist.iter().position(|tle| tle.expr == expr) {
        return Ok(idx);
    }
    let resno = i16::try_from(tlist.len() + 1).map_err(|_| {
        PgError::new(SqlState::TooManyColumns, "target lists can have at most 32767 entries")
    })?;
    tlist.push(TargetEntry::new(expr, resno, None, true));
    Ok(tlist.len() - 1)
}

/// Give a target entry a sort/group reference if it lacks one.
pub fn assign_sort_group_ref(tlist: &mut [TargetEntry], idx: usize) -> u32 {
    if tlist[idx].ressortgroupref != 0 {
        return tlist[idx].ressortgroupref;
    }
    let next = tlist.iter().map(|tle| tle.ressortgroupref).max().unwrap_or(0) + 1;
    tlist[idx].ressortgroupref = next;
    next
}

/// The target expression a sort/group clause refers to.
pub fn sortgroupclause_expr<'t>(clause: &SortGroupClause, tlist: &'t [TargetEntry]) -> Option<&'t Expr> {
    tlist
        .iter()
        .find(|tle| tle.ressortgroupref == clause.tle_sort_group_ref)
        .map(|tle| &tle.expr)
}

fn resolve_tle_unknown(pstate: &ParseState<'_>, tlist: &mut [TargetEntry], idx: usize) -> PgResult<()> {
    if expr_type(&tlist[idx].expr) == UNKNOWNOID {
        let expr = tlist[idx].expr.clone();
        tlist[idx].expr = resolve_unknown_to_text(pstate, expr)?;
    }
    Ok(())
}

fn in_sort_list(tle: &TargetEntry, list: &[SortGroupClause]) -> bool {
    tle.ressortgroupref != 0 && list.iter().any(|clause| clause.tle_sort_group_ref == tle.ressortgroupref)
}

pub fn add_target_to_sort_list(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    idx: usize,
    sortlist: &mut Vec<SortGroupClause>,
    sortby: &SortBy,
) -> PgResult<()> {
    resolve_tle_unknown(pstate, tlist, idx)?;
    if in_sort_list(&tlist[idx], sortlist) {
        return Ok(());
    }
    let restype = expr_type(&tlist[idx].expr);
    let location = sortby.location.or_else(|| expr_location(&tlist[idx].expr));
    let ops = get_sort_group_operators(pstate.catalog, restype, true, true, location)?;
    let descending = sortby.dir == SortByDir::Desc;
    let nulls_first = match sortby.nulls {
        SortByNulls::Default => descending,
        SortByNulls::First => true,
        SortByNulls::Last => false,
    };
    let sortref = assign_sort_group_ref(tlist, idx);
    sortlist.push(SortGroupClause {
        tle_sort_group_ref: sortref,
        eqop: ops.eq,
        sortop: if descending { ops.gt } else { ops.lt },
        descending,
        nulls_first,
        hashable: ops.hashable,
    });
    Ok(())
}

fn add_target_to_group_list(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    idx: usize,
    grouplist: &mut Vec<SortGroupClause>,
    location: Option<usize>,
) -> PgResult<()> {
    resolve_tle_unknown(pstate, tlist, idx)?;
    if in_sort_list(&tlist[idx], grouplist) {
        return Ok(());
    }
    let restype = expr_type(&tlist[idx].expr);
    let ops = get_sort_group_operators(pstate.catalog, restype, false, true, location)?;
    let sortref = assign_sort_group_ref(tlist, idx);
    grouplist.push(SortGroupClause {
        tle_sort_group_ref: sortref,
        eqop: ops.eq,
        sortop: ops.lt,
        descending: false,
        nulls_first: false,
        hashable: ops.hashable,
    });
    Ok(())
}

/// ORDER BY (and window ORDER BY / aggregate ORDER BY).
pub fn transform_sort_clause(
    pstate: &mut ParseState<'_>,
    sort: &[SortBy],
    tlist: &mut Vec<TargetEntry>,
    kind: ParseExprKind,
    sql99: bool,
) -> PgResult<Vec<SortGroupClause>> {
    let mut sortlist = Vec::with_capacity(sort.len());
    for sortby in sort {
        let idx = find_target_list_entry(pstate, &sortby.node, tlist, kind, sql99)?;
        add_target_to_sort_list(pstate, tlist, idx, &mut sortlist, sortby)?;
    }
    Ok(sortlist)
}

/// GROUP BY. Items also in ORDER BY reuse its operators so one sort serves
/// both.
pub fn transform_group_clause(
    pstate: &mut ParseState<'_>,
    group: &[RawExpr],
    tlist: &mut Vec<TargetEntry>,
    sort_clause: &[SortGroupClause],
) -> PgResult<Vec<SortGroupClause>> {
    let mut result: Vec<SortGroupClause> = Vec::with_capacity(group.len());
    for raw in group {
        let idx = find_target_list_entry(pstate, raw, tlist, ParseExprKind::GroupBy, false)?;
        let sortref = tlist[idx].ressortgroupref;
        if sortref != 0 {
            if result.iter().any(|clause| clause.tle_sort_group_ref == sortref) {
                continue;
            }
            if let Some(clause) = sort_clause.iter().find(|clause| clause.tle_sort_group_ref == sortref) {
                result.push(clause.clone());
                continue;
            }
        }
        add_target_to_group_list(pstate, tlist, idx, &mut result, raw.location())?;
    }
    Ok(result)
}

/// Plain DISTINCT: every visible column, ORDER BY items first. With
/// `is_agg` this is an aggregate's `DISTINCT` over its argument list.
pub fn transform_distinct_clause(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    sort_clause: &[SortGroupClause],
    is_agg: bool,
) -> PgResult<Vec<SortGroupClause>> {
    let mut result = Vec::with_capacity(tlist.len());
    for clause in sort_clause {
        let junk = tlist
            .iter()
            .find(|tle| tle.ressortgroupref == clause.tle_sort_group_ref)
            .is_none_or(|tle| tle.resjunk);
        if junk {
            let message = if is_agg {
                "in an aggregate with DISTINCT, ORDER BY expressions must appear in argument list"
            } else {
                "for SELECT DISTINCT, ORDER BY expressions must appear in select list"
            };
            let location = sortgroupclause_expr(clause, tlist).and_then(expr_location);
            return Err(PgError::new(SqlState::InvalidColumnReference, message).at(location));
        }
        result.push(clause.clone());
    }
    for idx in 0..tlist.len() {
        if tlist[idx].resjunk {
            continue;
        }
        let location = expr_location(&tlist[idx].expr);
        add_target_to_group_list(pstate, tlist, idx, &mut result, location)?;
    }
    Ok(result)
}

/// DISTINCT ON: its expressions must lead the ORDER BY list, in any order.
pub fn transform_distinct_on_clause(
    pstate: &mut ParseState<'_>,
    exprs: &[RawExpr],
    tlist: &mut Vec<TargetEntry>,
    sort_clause: &[SortGroupClause],
) -> PgResult<Vec<SortGroupClause>> {
    let mut refs: Vec<(u32, usize, Option<usize>)> = Vec::with_capacity(exprs.len());
    for raw in exprs {
        let idx = find_target_list_entry(pstate, raw, tlist, ParseExprKind::DistinctOn, false)?;
        let sortref = assign_sort_group_ref(tlist, idx);
        refs.push((sortref, idx, raw.location()));
    }
    let mismatch = |location: Option<usize>| {
        PgError::new(
            SqlState::InvalidColumnReference,
            "SELECT DISTINCT ON expressions must match initial ORDER BY expressions",
        )
        .at(location)
    };

    let mut result = Vec::with_capacity(refs.len());
    let mut skipped_sortitem = false;
    for clause in sort_clause {
        match refs.iter().find(|(sortref, _, _)| *sortref == clause.tle_sort_group_ref) {
            Some(&(_, _, location)) => {
                if skipped_sortitem {
                    return Err(mismatch(location));
                }
                result.push(clause.clone());
            }
            None => skipped_sortitem = true,
        }
    }
    for &(_, idx, location) in &refs {
        if in_sort_list(&tlist[idx], &result) {
            continue;
        }
        if skipped_sortitem {
            return Err(mismatch(location));
        }
        add_target_to_group_list(pstate, tlist, idx, &mut result, location)?;
    }
    Ok(result)
}

/// Turn the level's window definitions into window clauses. Definitions
/// may copy an earlier named window's partitioning and ordering.
pub fn transform_window_definitions(
    pstate: &mut ParseState<'_>,
    tlist: &mut Vec<TargetEntry>,
) -> PgResult<Vec<WindowClause>> {
    let defs: Vec<WindowDef> = pstate.level().windowdefs.clone();
    let mut result: Vec<WindowClause> = Vec::with_capacity(defs.len());
    for (idx, windef) in defs.iter().enumerate() {
        if let Some(name) = &windef.name
            && result.iter().any(|wc| wc.name.as_deref() == Some(name.as_str()))
        {
            return Err(PgError::new(
                SqlState::WindowingError,
                format!("window \"{name}\" is already defined"),
            )
            .at(windef.location));
        }
        let refwc = match &windef.refname {
            Some(refname) => Some(
                result
                    .iter()
                    .find(|wc| wc.name.as_deref() == Some(refname.as_str()))
                    .cloned()
                    .ok_or_else(|| {
                        PgError::new(SqlState::UndefinedObject, format!("window \"{refname}\" does not exist"))
                            .at(windef.location)
                    })?,
            ),
            None => None,
        };

        let mut partition_clause =
            transform_sort_clause(pstate, &partition_sort_items(windef), tlist, ParseExprKind::WindowPartition, true)?;
        let mut order_clause =
            transform_sort_clause(pstate, &windef.order_clause, tlist, ParseExprKind::WindowOrder, true)?;

        if let Some(refwc) = &refwc {
            let refname = refwc.name.as_deref().unwrap_or_default();
            if !partition_clause.is_empty() {
                return Err(PgError::new(
                    SqlState::WindowingError,
                    format!("cannot override PARTITION BY clause of window \"{refname}\""),
                )
                .at(windef.location));
            }
            partition_clause = refwc.partition_clause.clone();
            if !order_clause.is_empty() && !refwc.order_clause.is_empty() {
                return Err(PgError::new(
                    SqlState::WindowingError,
                    format!("cannot override ORDER BY clause of window \"{refname}\""),
                )
                .at(windef.location));
            }
            if order_clause.is_empty() {
                order_clause = refwc.order_clause.clone();
            }
            if refwc.frame_options.explicit {
                let err = PgError::new(
                    SqlState::WindowingError,
                    format!("cannot copy window \"{refname}\" because it has a frame clause"),
                );
                let err = if windef.name.is_none() && windef.order_clause.is_empty() && !windef.frame_options.explicit
                {
                    err.with_hint("Omit the parentheses in this OVER clause.")
                } else {
                    err
                };
                return Err(err.at(windef.location));
            }
        }

        let frame = windef.frame_options;
        if frame.mode == FrameMode::Groups && order_clause.is_empty() {
            return Err(PgError::new(SqlState::WindowingError, "GROUPS mode requires an ORDER BY clause")
                .at(windef.location));
        }
        let start_offset = transform_frame_offset(
            pstate,
            frame.mode,
            frame.start,
            &order_clause,
            tlist,
            windef.start_offset.as_deref(),
            windef.location,
        )?;
        let end_offset = transform_frame_offset(
            pstate,
            frame.mode,
            frame.end,
            &order_clause,
            tlist,
            windef.end_offset.as_deref(),
            windef.location,
        )?;

        result.push(WindowClause {
            name: windef.name.clone(),
            refname: windef.refname.clone(),
            partition_clause,
            order_clause,
            frame_options: frame,
            start_offset,
            end_offset,
            winref: idx as u32 + 1,
        });
    }
    merge_duplicate_windows(&mut result, tlist)?;
    Ok(result)
}

/// Inline OVER clauses that resolve to the same window share one clause;
/// window function calls in the target list are renumbered to match.
fn merge_duplicate_windows(clauses: &mut Vec<WindowClause>, tlist: &mut [TargetEntry]) -> PgResult<()> {
    let mut remap: Vec<u32> = Vec::with_capacity(clauses.len());
    let mut kept: Vec<WindowClause> = Vec::with_capacity(clauses.len());
    for mut wc in clauses.drain(..) {
        let existing = kept.iter().find(|k| {
            k.partition_clause == wc.partition_clause
                && k.order_clause == wc.order_clause
                && k.frame_options == wc.frame_options
                && k.start_offset == wc.start_offset
                && k.end_offset == wc.end_offset
        });
        if wc.name.is_none()
            && let Some(existing) = existing
        {
            remap.push(existing.winref);
            continue;
        }
        wc.winref = kept.len() as u32 + 1;
        remap.push(wc.winref);
        kept.push(wc);
    }
    if kept.len() < remap.len() {
        debug!(before = remap.len(), after = kept.len(), "merged duplicate window clauses");
        for tle in tlist.iter_mut() {
            let expr = std::mem::replace(&mut tle.expr, make_null_const(UNKNOWNOID, -1, INVALID_OID));
            tle.expr = renumber_window_refs(expr, &remap)?;
        }
    }
    *clauses = kept;
    Ok(())
}

fn renumber_window_refs(expr: Expr, remap: &[u32]) -> PgResult<Expr> {
    let expr = match expr {
        Expr::WindowFunc(mut wfunc) => {
            if let Some(&winref) = (wfunc.winref as usize).checked_sub(1).and_then(|i| remap.get(i)) {
                wfunc.winref = winref;
            }
            Expr::WindowFunc(wfunc)
        }
        Expr::SubLink(_) => return Ok(expr),
        other => other,
    };
    expression_tree_mutator(expr, &mut |child| renumber_window_refs(child, remap))
}

fn partition_sort_items(windef: &WindowDef) -> Vec<SortBy> {
    windef
        .partition_clause
        .iter()
        .map(|expr| SortBy {
            node: expr.clone(),
            dir: SortByDir::Default,
            nulls: SortByNulls::Default,
            location: expr.location(),
        })
        .collect()
}

fn is_offset_bound(bound: FrameBoundKind) -> bool {
    matches!(bound, FrameBoundKind::OffsetPreceding | FrameBoundKind::OffsetFollowing)
}

fn transform_frame_offset(
    pstate: &mut ParseState<'_>,
    mode: FrameMode,
    bound: FrameBoundKind,
    order_clause: &[SortGroupClause],
    tlist: &[TargetEntry],
    offset: Option<&RawExpr>,
    location: Option<usize>,
) -> PgResult<Option<Expr>> {
    let Some(raw) = offset.filter(|_| is_offset_bound(bound)) else {
        return Ok(None);
    };
    let catalog = pstate.catalog;
    let expr = match mode {
        FrameMode::Rows | FrameMode::Groups => {
            let (kind, construct) = if mode == FrameMode::Rows {
                (ParseExprKind::WindowFrameRows, "ROWS")
            } else {
                (ParseExprKind::WindowFrameGroups, "GROUPS")
            };
            let expr = transform_expr(pstate, raw, kind)?;
            let expr = coerce_to_specific_type(catalog, expr, INT8OID, construct)?;
            check_expr_is_var_free(&expr, construct)?;
            expr
        }
        FrameMode::Range => {
            let [order] = order_clause else {
                return Err(PgError::new(
                    SqlState::WindowingError,
                    "RANGE with offset PRECEDING/FOLLOWING requires exactly one ORDER BY column",
                )
                .at(location));
            };
            let sorttype = sortgroupclause_expr(order, tlist)
                .map(expr_type)
                .ok_or_else(|| elog("window ORDER BY column not in target list"))?;
            let expr = transform_expr(pstate, raw, ParseExprKind::WindowFrameRange)?;
            let base = catalog.base_type(sorttype);
            if catalog.type_category(base) != TypeCategory::Numeric {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    format!(
                        "RANGE with offset PRECEDING/FOLLOWING is not supported for column type {} and offset type {}",
                        catalog.format_type(sorttype),
                        catalog.format_type(expr_type(&expr))
                    ),
                )
                .with_hint("Cast the offset value to an appropriate type.")
                .at(expr_location(&expr)));
            }
            let expr = coerce_to_specific_type(catalog, expr, base, "RANGE")?;
            check_expr_is_var_free(&expr, "RANGE")?;
            expr
        }
    };
    Ok(Some(expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::Persistence;
    use crate::catalog::{Catalog, PG_PUBLIC_NAMESPACE};
    use crate::catalog::pg_type::{INT4OID, TEXTOID};
    use crate::nodes::parsenodes::FrameOptions;
    use crate::nodes::tupdesc::{Attribute, TupleDesc};
    use crate::parser::gram::parse_expression;

    fn catalog_with_tables() -> Catalog {
        let mut catalog = Catalog::default();
        for (name, cols) in [("t1", ["a", "b"]), ("t2", ["a", "c"])] {
            let desc = TupleDesc::new(
                cols.iter()
                    .map(|col| Attribute::new(*col, INT4OID, -1, INVALID_OID))
                    .collect(),
            );
            catalog
                .create_relation(name, PG_PUBLIC_NAMESPACE, RelKind::Table, Persistence::Permanent, desc)
                .unwrap();
        }
        catalog
    }

    fn join(jointype: JoinType, using: &[&str], alias: Option<&str>) -> FromItem {
        FromItem::Join {
            jointype,
            is_natural: false,
            larg: Box::new(FromItem::RangeVar(RangeVar::new("t1"))),
            rarg: Box::new(FromItem::RangeVar(RangeVar::new("t2"))),
            using_clause: using.iter().map(|s| s.to_string()).collect(),
            join_using_alias: None,
            quals: None,
            alias: alias.map(Alias::new),
            location: None,
        }
    }

    #[test]
    fn using_join_merges_columns() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        let fromlist = transform_from_clause(&mut pstate, &[join(JoinType::Full, &["a"], None)]).unwrap();
        let JoinTreeNode::Join(j) = &fromlist[0] else { panic!("expected a join") };
        assert!(j.quals.is_some());
        let rte = pstate.rte(0, j.rtindex).unwrap();
        assert_eq!(rte.eref.colnames, vec!["a", "b", "c"]);
        let RteKind::Join { joinaliasvars, .. } = &rte.kind else { panic!("expected a join RTE") };
        assert!(matches!(joinaliasvars[0], Expr::CoalesceExpr(_)));

        // Unqualified `a` is the merged column; `t1.a` still names the input.
        let merged = transform_expr(&mut pstate, &parse_expression("a").unwrap(), ParseExprKind::Where).unwrap();
        assert!(matches!(merged, Expr::CoalesceExpr(_)));
        let qualified =
            transform_expr(&mut pstate, &parse_expression("t1.a").unwrap(), ParseExprKind::Where).unwrap();
        assert!(matches!(qualified, Expr::Var(_)));
    }

    #[test]
    fn using_column_must_exist_on_both_sides() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        let err = transform_from_clause(&mut pstate, &[join(JoinType::Inner, &["b"], None)]).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedColumn);
        assert!(err.message.contains("right table"));
    }

    #[test]
    fn aliased_join_hides_inputs() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        transform_from_clause(&mut pstate, &[join(JoinType::Inner, &["a"], Some("j"))]).unwrap();
        let err = transform_expr(&mut pstate, &parse_expression("t1.b").unwrap(), ParseExprKind::Where).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedTable);
        transform_expr(&mut pstate, &parse_expression("j.c").unwrap(), ParseExprKind::Where).unwrap();
    }

    #[test]
    fn duplicate_from_names_conflict() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        let item = FromItem::RangeVar(RangeVar::new("t1"));
        let err = transform_from_clause(&mut pstate, &[item.clone(), item]).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DuplicateAlias);
    }

    fn tle(expr: &str, resno: i16, name: &str, pstate: &mut ParseState<'_>) -> TargetEntry {
        let expr = transform_expr(pstate, &parse_expression(expr).unwrap(), ParseExprKind::SelectTarget).unwrap();
        TargetEntry::new(expr, resno, Some(name.to_string()), false)
    }

    fn sort_by(text: &str, dir: SortByDir) -> SortBy {
        SortBy {
            node: parse_expression(text).unwrap(),
            dir,
            nulls: SortByNulls::Default,
            location: None,
        }
    }

    #[test]
    fn order_by_output_name_position_and_expression() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        transform_from_clause(&mut pstate, &[FromItem::RangeVar(RangeVar::new("t1"))]).unwrap();
        let mut tlist = vec![tle("a", 1, "x", &mut pstate), tle("b", 2, "y", &mut pstate)];
        let sort = [
            sort_by("y", SortByDir::Desc),
            sort_by("1", SortByDir::Default),
            sort_by("a + b", SortByDir::Default),
        ];
        let clauses = transform_sort_clause(&mut pstate, &sort, &mut tlist, ParseExprKind::OrderBy, false).unwrap();
        assert_eq!(clauses.len(), 3);
        assert!(clauses[0].descending && clauses[0].nulls_first);
        assert_eq!(tlist.len(), 3);
        assert!(tlist[2].resjunk);
        assert_eq!(sortgroupclause_expr(&clauses[1], &tlist), Some(&tlist[0].expr));

        let err = transform_sort_clause(
            &mut pstate,
            &[sort_by("5", SortByDir::Default)],
            &mut tlist,
            ParseExprKind::OrderBy,
            false,
        )
        .unwrap_err();
        assert_eq!(err.message, "ORDER BY position 5 is not in select list");
    }

    #[test]
    fn distinct_on_must_lead_order_by() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        transform_from_clause(&mut pstate, &[FromItem::RangeVar(RangeVar::new("t1"))]).unwrap();
        let mut tlist = vec![tle("a", 1, "a", &mut pstate), tle("b", 2, "b", &mut pstate)];
        let sort = transform_sort_clause(
            &mut pstate,
            &[sort_by("a", SortByDir::Default), sort_by("b", SortByDir::Default)],
            &mut tlist,
            ParseExprKind::OrderBy,
            false,
        )
        .unwrap();
        let ok = transform_distinct_on_clause(&mut pstate, &[parse_expression("a").unwrap()], &mut tlist, &sort);
        assert_eq!(ok.unwrap().len(), 1);
        let err = transform_distinct_on_clause(&mut pstate, &[parse_expression("b").unwrap()], &mut tlist, &sort)
            .unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidColumnReference);
    }

    #[test]
    fn limit_rejects_column_references() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        transform_from_clause(&mut pstate, &[FromItem::RangeVar(RangeVar::new("t1"))]).unwrap();
        let limit = transform_limit_clause(
            &mut pstate,
            Some(&parse_expression("10").unwrap()),
            ParseExprKind::Limit,
            "LIMIT",
        )
        .unwrap()
        .unwrap();
        assert_eq!(expr_type(&limit), INT8OID);
        let err = transform_limit_clause(&mut pstate, Some(&parse_expression("a").unwrap()), ParseExprKind::Limit, "LIMIT")
            .unwrap_err();
        assert_eq!(err.message, "argument of LIMIT must not contain variables");
    }

    #[test]
    fn window_copy_rules() {
        let catalog = catalog_with_tables();
        let mut pstate = ParseState::new(&catalog, "");
        transform_from_clause(&mut pstate, &[FromItem::RangeVar(RangeVar::new("t1"))]).unwrap();
        let base = WindowDef {
            name: Some("w".to_string()),
            refname: None,
            partition_clause: vec![parse_expression("a").unwrap()],
            order_clause: Vec::new(),
            frame_options: FrameOptions::default(),
            start_offset: None,
            end_offset: None,
            location: None,
        };
        let derived = WindowDef {
            name: None,
            refname: Some("w".to_string()),
            partition_clause: Vec::new(),
            order_clause: vec![sort_by("b", SortByDir::Default)],
            ..base.clone()
        };
        pstate.level_mut().windowdefs = vec![base.clone(), derived];
        let mut tlist = Vec::new();
        let clauses = transform_window_definitions(&mut pstate, &mut tlist).unwrap();
        assert_eq!(clauses[1].partition_clause, clauses[0].partition_clause);
        assert_eq!(clauses[1].winref, 2);

        let overriding = WindowDef {
            name: None,
            refname: Some("w".to_string()),
            ..base.clone()
        };
        pstate.level_mut().windowdefs = vec![base, overriding];
        let err = transform_window_definitions(&mut pstate, &mut tlist).unwrap_err();
        assert_eq!(err.message, "cannot override PARTITION BY clause of window \"w\"");
    }

    #[test]
    fn text_columns_get_sort_operators() {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        let mut tlist = vec![tle("'x'", 1, "v", &mut pstate)];
        let clauses =
            transform_sort_clause(&mut pstate, &[sort_by("v", SortByDir::Default)], &mut tlist, ParseExprKind::OrderBy, false)
                .unwrap();
        assert_eq!(expr_type(&tlist[0].expr), TEXTOID);
        assert_ne!(clauses[0].sortop, INVALID_OID);
    }
}
