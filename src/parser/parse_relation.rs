//! Range-table construction and name lookup.
//!
//! Every FROM item becomes a range-table entry plus a namespace item that
//! name lookup searches. Column references resolve to Vars of the RTE they
//! name, except that join columns resolve straight to the join's alias
//! expression, so later phases never see Vars of join RTEs.

use tracing::trace;

use crate::catalog::namespace::relname_get_relation;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_type::{MAX_TUPLE_ATTRIBUTE_NUMBER, OIDOID, RECORDOID, TIDOID};
use crate::catalog::table::{RelKind, Relation};
use crate::catalog::{Catalog, CatalogOracle};
use crate::nodes::makefuncs::make_var;
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod, increment_var_sublevels_up};
use crate::nodes::parsenodes::{
    ACL_SELECT, Alias, ColumnTypes, CommonTableExpr, JoinType, Query, RangeTblEntry, RangeVar, RteKind, TableFunc,
};
use crate::nodes::primnodes::{Expr, Index, Location, Var};
use crate::nodes::tupdesc::{SELF_ITEM_POINTER_ATTRIBUTE_NUMBER, TABLE_OID_ATTRIBUTE_NUMBER};
use crate::parser::parse_node::{NamespaceItem, ParseState};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// System columns visible on table RTEs.
const SYSTEM_COLUMNS: [(&str, i16, Oid); 2] = [
    ("ctid", SELF_ITEM_POINTER_ATTRIBUTE_NUMBER, TIDOID),
    ("tableoid", TABLE_OID_ATTRIBUTE_NUMBER, OIDOID),
];

pub fn is_system_column_name(name: &str) -> bool {
    SYSTEM_COLUMNS.iter().any(|(sysname, _, _)| *sysname == name)
}

/// Name of column `attno` of an RTE, for messages.
pub fn get_rte_attribute_name(rte: &RangeTblEntry, attno: i16) -> String {
    if attno == 0 {
        return "*".to_string();
    }
    if let Some((name, _, _)) = SYSTEM_COLUMNS.iter().find(|(_, num, _)| *num == attno) {
        return (*name).to_string();
    }
    rte.eref
        .colnames
        .get(attno as usize - 1)
        .cloned()
        .unwrap_or_else(|| format!("?column{attno}?"))
}

/// Column `attno` of an RTE: (type, typmod, collation).
pub fn rte_column_type(catalog: &Catalog, rte: &RangeTblEntry, attno: i16) -> PgResult<(Oid, i32, Oid)> {
    if attno < 0 {
        return SYSTEM_COLUMNS
            .iter()
            .find(|(_, num, _)| *num == attno)
            .map(|&(_, _, typid)| (typid, -1, INVALID_OID))
            .ok_or_else(|| elog(format!("invalid system attribute number {attno}")));
    }
    let idx = (attno as usize)
        .checked_sub(1)
        .ok_or_else(|| elog("whole-row reference has no column type"))?;
    let missing = || elog(format!("column {attno} of relation \"{}\" does not exist", rte.eref.aliasname));
    match &rte.kind {
        RteKind::Relation { relid, .. } => {
            let rel = catalog
                .relation_descriptor(*relid)
                .ok_or_else(|| elog(format!("cache lookup failed for relation {relid}")))?;
            let attr = rel.desc.attr(attno).ok_or_else(missing)?;
            if attr.dropped {
                return Err(PgError::new(
                    SqlState::UndefinedColumn,
                    format!(
                        "column \"{}\" of relation \"{}\" does not exist",
                        attr.name, rte.eref.aliasname
                    ),
                ));
            }
            Ok((attr.typid, attr.typmod, attr.collation))
        }
        RteKind::Subquery { subquery } => {
            let tle = subquery.visible_targets().nth(idx).ok_or_else(missing)?;
            Ok((expr_type(&tle.expr), expr_typmod(&tle.expr), expr_collation(&tle.expr)))
        }
        RteKind::Join { joinaliasvars, .. } => {
            let var = joinaliasvars.get(idx).ok_or_else(missing)?;
            Ok((expr_type(var), expr_typmod(var), expr_collation(var)))
        }
        RteKind::Function { columns, .. }
        | RteKind::TableFunc { columns, .. }
        | RteKind::Values { columns, .. }
        | RteKind::Cte { columns, .. } => {
            if idx >= columns.len() {
                return Err(missing());
            }
            Ok((columns.coltypes[idx], columns.coltypmods[idx], columns.colcollations[idx]))
        }
        RteKind::Result => Err(missing()),
    }
}

/// Namespace item exposing every column of the RTE under its effective name.
pub fn build_nsitem(rtindex: Index, rte: &RangeTblEntry) -> NamespaceItem {
    NamespaceItem {
        rtindex,
        refname: rte.eref.aliasname.clone(),
        colnames: rte.eref.colnames.clone(),
        rel_visible: true,
        cols_visible: true,
        lateral_only: false,
        lateral_ok: true,
    }
}

/// Effective column names: aliases first, then the underlying names.
fn build_eref(refname: &str, alias: Option<&Alias>, colnames: Vec<String>, location: Option<usize>) -> PgResult<Alias> {
    let mut names = colnames;
    if let Some(alias) = alias {
        let live = names.iter().filter(|n| !n.is_empty()).count();
        if alias.colnames.len() > live {
            return Err(PgError::new(
                SqlState::InvalidColumnReference,
                format!(
                    "table \"{}\" has {live} columns available but {} columns specified",
                    alias.aliasname,
                    alias.colnames.len()
                ),
            )
            .at(location));
        }
        let mut given = alias.colnames.iter();
        for name in names.iter_mut().filter(|n| !n.is_empty()) {
            match given.next() {
                Some(new) => *name = new.clone(),
                None => break,
            }
        }
    }
    Ok(Alias {
        aliasname: alias.map_or_else(|| refname.to_string(), |a| a.aliasname.clone()),
        colnames: names,
    })
}

/// Open a table by (possibly qualified) name.
pub fn parser_open_table<'c>(pstate: &ParseState<'c>, rv: &RangeVar) -> PgResult<&'c Relation> {
    let catalog = pstate.catalog;
    relname_get_relation(catalog, rv.schemaname.as_deref(), &rv.relname)
        .map_err(|err| err.at(rv.location))?
        .ok_or_else(|| {
            let name = match &rv.schemaname {
                Some(schema) => format!("{schema}.{}", rv.relname),
                None => rv.relname.clone(),
            };
            let err = PgError::new(SqlState::UndefinedTable, format!("relation \"{name}\" does not exist"));
            let forward_cte = (0..=pstate.depth())
                .filter_map(|levels_up| pstate.level_at(levels_up))
                .any(|level| level.future_ctes.contains(&rv.relname));
            let err = if rv.schemaname.is_none() && forward_cte {
                err.with_detail(format!(
                    "There is a WITH item named \"{}\", but it cannot be referenced from this part of the query.",
                    rv.relname
                ))
                .with_hint("Use WITH RECURSIVE, or re-order the WITH items to remove forward references.")
            } else {
                err
            };
            err.at(rv.location)
        })
}

/// Add a table, materialized view or view to the range table. Views are
/// expanded to their stored query.
pub fn add_rte_for_relation(
    pstate: &mut ParseState<'_>,
    rel: &Relation,
    alias: Option<Alias>,
    inh: bool,
    in_from_cl: bool,
    location: Option<usize>,
) -> PgResult<Index> {
    let eref = build_eref(&rel.name, alias.as_ref(), live_names(rel), location)?;
    let kind = match rel.kind {
        RelKind::Table | RelKind::MatView => RteKind::Relation {
            relid: rel.oid,
            relkind: rel.kind,
        },
        RelKind::View => {
            let query = rel
                .view_query
                .as_ref()
                .ok_or_else(|| elog(format!("view \"{}\" has no stored query", rel.name)))?;
            RteKind::Subquery {
                subquery: query.clone(),
            }
        }
        RelKind::CompositeType => {
            return Err(PgError::new(
                SqlState::WrongObjectType,
                format!("\"{}\" is a composite type, not a relation", rel.name),
            )
            .at(location));
        }
    };
    let mut rte = RangeTblEntry::new(kind, alias, eref);
    rte.inh = inh;
    rte.in_from_cl = in_from_cl;
    rte.required_perms = ACL_SELECT;
    trace!(relation = %rel.name, "range table entry for relation");
    Ok(pstate.add_rte(rte))
}

fn live_names(rel: &Relation) -> Vec<String> {
    rel.desc
        .attrs
        .iter()
        .map(|attr| if attr.dropped { String::new() } else { attr.name.clone() })
        .collect()
}

pub fn add_rte_for_subquery(
    pstate: &mut ParseState<'_>,
    subquery: Query,
    alias: Option<Alias>,
    lateral: bool,
    in_from_cl: bool,
    location: Option<usize>,
) -> PgResult<Index> {
    let refname = alias.as_ref().map_or_else(|| "unnamed_subquery".to_string(), |a| a.aliasname.clone());
    let colnames: Vec<String> = subquery
        .visible_targets()
        .enumerate()
        .map(|(i, tle)| tle.resname.clone().unwrap_or_else(|| format!("?column{}?", i + 1)))
        .collect();
    let eref = build_eref(&refname, alias.as_ref(), colnames, location)?;
    let mut rte = RangeTblEntry::new(
        RteKind::Subquery {
            subquery: Box::new(subquery),
        },
        alias,
        eref,
    );
    rte.lateral = lateral;
    rte.in_from_cl = in_from_cl;
    Ok(pstate.add_rte(rte))
}

#[allow(clippy::too_many_arguments)]
pub fn add_rte_for_function(
    pstate: &mut ParseState<'_>,
    funcname: &str,
    function: Expr,
    columns: ColumnTypes,
    colnames: Vec<String>,
    returns_composite: bool,
    alias: Option<Alias>,
    ordinality: bool,
    lateral: bool,
    location: Option<usize>,
) -> PgResult<Index> {
    let eref = build_eref(funcname, alias.as_ref(), colnames, location)?;
    let mut rte = RangeTblEntry::new(
        RteKind::Function {
            function,
            ordinality,
            columns,
            returns_composite,
        },
        alias,
        eref,
    );
    rte.lateral = lateral;
    Ok(pstate.add_rte(rte))
}

pub fn add_rte_for_tablefunc(
    pstate: &mut ParseState<'_>,
    tablefunc: TableFunc,
    columns: ColumnTypes,
    colnames: Vec<String>,
    alias: Option<Alias>,
    lateral: bool,
    location: Option<usize>,
) -> PgResult<Index> {
    let eref = build_eref("json_table", alias.as_ref(), colnames, location)?;
    let mut rte = RangeTblEntry::new(
        RteKind::TableFunc {
            tablefunc: Box::new(tablefunc),
            columns,
        },
        alias,
        eref,
    );
    rte.lateral = lateral;
    Ok(pstate.add_rte(rte))
}

pub fn add_rte_for_values(
    pstate: &mut ParseState<'_>,
    values_lists: Vec<Vec<Expr>>,
    columns: ColumnTypes,
    alias: Option<Alias>,
    lateral: bool,
    in_from_cl: bool,
) -> PgResult<Index> {
    let colnames = (1..=columns.len()).map(|i| format!("column{i}")).collect();
    let eref = build_eref("*VALUES*", alias.as_ref(), colnames, None)?;
    let mut rte = RangeTblEntry::new(RteKind::Values { values_lists, columns }, alias, eref);
    rte.lateral = lateral;
    rte.in_from_cl = in_from_cl;
    Ok(pstate.add_rte(rte))
}

pub fn add_rte_for_join(
    pstate: &mut ParseState<'_>,
    colnames: Vec<String>,
    jointype: JoinType,
    joinaliasvars: Vec<Expr>,
    joinmergedcols: usize,
    alias: Option<Alias>,
    location: Option<usize>,
) -> PgResult<Index> {
    if joinaliasvars.len() > MAX_TUPLE_ATTRIBUTE_NUMBER {
        return Err(PgError::new(
            SqlState::ProgramLimitExceeded,
            format!("joins can have at most {MAX_TUPLE_ATTRIBUTE_NUMBER} columns"),
        )
        .at(location));
    }
    let eref = build_eref("unnamed_join", alias.as_ref(), colnames, location)?;
    let mut rte = RangeTblEntry::new(
        RteKind::Join {
            jointype,
            joinaliasvars,
            joinmergedcols,
        },
        alias,
        eref,
    );
    rte.in_from_cl = true;
    Ok(pstate.add_rte(rte))
}

/// Find a WITH-list entry visible from the current level.
pub fn scan_ns_for_cte(pstate: &ParseState<'_>, refname: &str) -> Option<(u32, usize)> {
    (0..=pstate.depth()).find_map(|levels_up| {
        let level = pstate.level_at(levels_up)?;
        level
            .ctenamespace
            .iter()
            .position(|cte| cte.ctename == refname)
            .map(|idx| (levels_up, idx))
    })
}

pub fn add_rte_for_cte(
    pstate: &mut ParseState<'_>,
    levels_up: u32,
    cte_index: usize,
    rv: &RangeVar,
    in_from_cl: bool,
) -> PgResult<Index> {
    let cte: &mut CommonTableExpr = pstate
        .level_at_mut(levels_up)
        .and_then(|level| level.ctenamespace.get_mut(cte_index))
        .ok_or_else(|| elog(format!("could not find CTE \"{}\"", rv.relname)))?;
    cte.refcount += 1;
    let ctename = cte.ctename.clone();
    let columns = cte.columns.clone();
    let colnames = cte.colnames.clone();
    let eref = build_eref(&ctename, rv.alias.as_ref(), colnames, rv.location)?;
    let mut rte = RangeTblEntry::new(
        RteKind::Cte {
            ctename,
            ctelevelsup: levels_up,
            columns,
        },
        rv.alias.clone(),
        eref,
    );
    rte.in_from_cl = in_from_cl;
    rte.required_perms = ACL_SELECT;
    Ok(pstate.add_rte(rte))
}

/// Reject two FROM items exposing the same name at one level.
pub fn check_namespace_conflicts(pstate: &ParseState<'_>, item: &NamespaceItem, location: Option<usize>) -> PgResult<()> {
    if !item.rel_visible {
        return Ok(());
    }
    let clash = pstate
        .level()
        .namespace
        .iter()
        .any(|other| other.rel_visible && other.refname == item.refname);
    if clash {
        return Err(PgError::new(
            SqlState::DuplicateAlias,
            format!("table name \"{}\" specified more than once", item.refname),
        )
        .at(location));
    }
    Ok(())
}

fn check_lateral_ref_ok(item: &NamespaceItem, location: Option<usize>) -> PgResult<()> {
    if item.lateral_only && !item.lateral_ok {
        return Err(PgError::new(
            SqlState::InvalidColumnReference,
            format!("invalid reference to FROM-clause entry for table \"{}\"", item.refname),
        )
        .with_detail("The combining JOIN type must be INNER or LEFT for a LATERAL reference.")
        .at(location));
    }
    Ok(())
}

/// Visible namespace items of a level, respecting LATERAL scoping.
fn visible_items<'s>(pstate: &'s ParseState<'_>, levels_up: u32) -> impl Iterator<Item = (usize, &'s NamespaceItem)> {
    let level = pstate.level_at(levels_up);
    let lateral_active = level.is_some_and(|l| l.lateral_active);
    level
        .into_iter()
        .flat_map(|l| l.namespace.iter().enumerate())
        .filter(move |(_, item)| !item.lateral_only || lateral_active)
}

/// Find the FROM item a qualifier names: `(levels_up, namespace index)`.
pub fn refname_nsitem(
    pstate: &ParseState<'_>,
    schemaname: Option<&str>,
    refname: &str,
    location: Option<usize>,
) -> PgResult<Option<(u32, usize)>> {
    let relid = match schemaname {
        Some(schema) => match relname_get_relation(pstate.catalog, Some(schema), refname)? {
            Some(rel) => Some(rel.oid),
            None => return Ok(None),
        },
        None => None,
    };
    for levels_up in 0..=pstate.depth() {
        let mut found: Option<usize> = None;
        for (idx, item) in visible_items(pstate, levels_up) {
            if !item.rel_visible {
                continue;
            }
            let matches = match relid {
                Some(relid) => {
                    pstate.rte(levels_up, item.rtindex)?.relid() == relid
                        && pstate.rte(levels_up, item.rtindex)?.alias.is_none()
                }
                None => item.refname == refname,
            };
            if !matches {
                continue;
            }
            if found.is_some() {
                return Err(PgError::new(
                    SqlState::AmbiguousAlias,
                    format!("table reference \"{refname}\" is ambiguous"),
                )
                .at(location));
            }
            check_lateral_ref_ok(item, location)?;
            found = Some(idx);
        }
        if let Some(idx) = found {
            return Ok(Some((levels_up, idx)));
        }
    }
    Ok(None)
}

fn nsitem<'s>(pstate: &'s ParseState<'_>, levels_up: u32, ns_index: usize) -> PgResult<&'s NamespaceItem> {
    pstate
        .level_at(levels_up)
        .and_then(|level| level.namespace.get(ns_index))
        .ok_or_else(|| elog("invalid namespace item"))
}

/// Column `attno` of a namespace item as an expression.
pub fn column_expr(
    pstate: &mut ParseState<'_>,
    levels_up: u32,
    rtindex: Index,
    attno: i16,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let rte = pstate.rte(levels_up, rtindex)?;
    if let RteKind::Join { joinaliasvars, .. } = &rte.kind {
        let alias_var = joinaliasvars
            .get(attno as usize - 1)
            .cloned()
            .ok_or_else(|| elog(format!("invalid join column {attno}")))?;
        let alias_var = with_location(alias_var, location);
        return increment_var_sublevels_up(alias_var, levels_up, 0);
    }
    let (typid, typmod, collation) = rte_column_type(catalog, rte, attno)?;
    if let Some(level) = pstate.level_at_mut(levels_up) {
        level.rte_mut(rtindex)?.mark_selected(attno);
    }
    Ok(Expr::Var(Var {
        varno: rtindex,
        varattno: attno,
        vartype: typid,
        vartypmod: typmod,
        varcollid: collation,
        varlevelsup: levels_up,
        location: Location(location),
    }))
}

fn with_location(expr: Expr, location: Option<usize>) -> Expr {
    match expr {
        Expr::Var(mut var) => {
            var.location = Location(location);
            Expr::Var(var)
        }
        other => other,
    }
}

/// Look a column up in one namespace item. Ambiguous names raise.
pub fn scan_nsitem_for_column(
    pstate: &mut ParseState<'_>,
    levels_up: u32,
    ns_index: usize,
    colname: &str,
    location: Option<usize>,
) -> PgResult<Option<Expr>> {
    let item = nsitem(pstate, levels_up, ns_index)?.clone();
    let mut attno = None;
    for (idx, name) in item.colnames.iter().enumerate() {
        if name == colname {
            if attno.is_some() {
                return Err(PgError::new(
                    SqlState::AmbiguousColumn,
                    format!("column reference \"{colname}\" is ambiguous"),
                )
                .at(location));
            }
            attno = Some(idx as i16 + 1);
        }
    }
    if let Some(attno) = attno {
        check_lateral_ref_ok(&item, location)?;
        return column_expr(pstate, levels_up, item.rtindex, attno, location).map(Some);
    }
    // System columns of plain tables.
    let rte = pstate.rte(levels_up, item.rtindex)?;
    if matches!(rte.kind, RteKind::Relation { .. })
        && let Some(&(_, sysattno, typid)) = SYSTEM_COLUMNS.iter().find(|(name, _, _)| *name == colname)
    {
        check_lateral_ref_ok(&item, location)?;
        return Ok(Some(Expr::Var(Var {
            varno: item.rtindex,
            varattno: sysattno,
            vartype: typid,
            vartypmod: -1,
            varcollid: INVALID_OID,
            varlevelsup: levels_up,
            location: Location(location),
        })));
    }
    Ok(None)
}

/// Resolve an unqualified column name, innermost level first.
pub fn colname_to_var(pstate: &mut ParseState<'_>, colname: &str, location: Option<usize>) -> PgResult<Option<Expr>> {
    for levels_up in 0..=pstate.depth() {
        let candidates: Vec<usize> = visible_items(pstate, levels_up)
            .filter(|(_, item)| item.cols_visible)
            .map(|(idx, _)| idx)
            .collect();
        let mut result: Option<Expr> = None;
        for idx in candidates {
            if let Some(expr) = scan_nsitem_for_column(pstate, levels_up, idx, colname, location)? {
                if result.is_some() {
                    return Err(PgError::new(
                        SqlState::AmbiguousColumn,
                        format!("column reference \"{colname}\" is ambiguous"),
                    )
                    .at(location));
                }
                result = Some(expr);
            }
        }
        if result.is_some() {
            return Ok(result);
        }
    }
    Ok(None)
}

/// Whole-row reference to a FROM item: the relation's row type for tables,
/// `record` otherwise.
pub fn make_whole_row_var(
    pstate: &mut ParseState<'_>,
    levels_up: u32,
    rtindex: Index,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let rte = pstate.rte(levels_up, rtindex)?;
    let vartype = match &rte.kind {
        RteKind::Relation { relid, .. } => catalog
            .relation_descriptor(*relid)
            .map_or(RECORDOID, |rel| rel.rowtype),
        _ => RECORDOID,
    };
    if let Some(level) = pstate.level_at_mut(levels_up) {
        level.rte_mut(rtindex)?.mark_selected(0);
    }
    let mut var = make_var(rtindex, 0, vartype, -1, INVALID_OID, levels_up);
    if let Expr::Var(v) = &mut var {
        v.location = Location(location);
    }
    Ok(var)
}

/// Column names and expressions of `item.*`.
pub fn expand_nsitem_vars(
    pstate: &mut ParseState<'_>,
    levels_up: u32,
    ns_index: usize,
    location: Option<usize>,
) -> PgResult<(Vec<String>, Vec<Expr>)> {
    let item = nsitem(pstate, levels_up, ns_index)?.clone();
    check_lateral_ref_ok(&item, location)?;
    let mut names = Vec::with_capacity(item.colnames.len());
    let mut exprs = Vec::with_capacity(item.colnames.len());
    for (idx, name) in item.colnames.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        exprs.push(column_expr(pstate, levels_up, item.rtindex, idx as i16 + 1, location)?);
        names.push(name.clone());
    }
    Ok((names, exprs))
}

/// Row description of an RTE for `*` expansion of a whole-row value.
pub fn rte_columns(catalog: &Catalog, rte: &RangeTblEntry) -> PgResult<Vec<(String, Oid, i32, Oid)>> {
    let mut out = Vec::new();
    for (idx, name) in rte.eref.colnames.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let (typid, typmod, coll) = rte_column_type(catalog, rte, idx as i16 + 1)?;
        out.push((name.clone(), typid, typmod, coll));
    }
    Ok(out)
}

pub fn error_missing_rte(pstate: &ParseState<'_>, refname: &str, location: Option<usize>) -> PgError {
    // An entry that exists but is out of scope gets a pointed hint.
    let hidden = (0..=pstate.depth())
        .filter_map(|up| pstate.level_at(up))
        .flat_map(|level| level.namespace.iter())
        .any(|item| item.refname == refname);
    let err = PgError::new(
        SqlState::UndefinedTable,
        format!("missing FROM-clause entry for table \"{refname}\""),
    );
    let err = if hidden {
        err.with_hint(format!(
            "There is an entry for table \"{refname}\", but it cannot be referenced from this part of the query."
        ))
    } else {
        err
    };
    err.at(location)
}

pub fn error_missing_column(relname: Option<&str>, colname: &str, location: Option<usize>) -> PgError {
    let message = match relname {
        Some(rel) => format!("column {rel}.{colname} does not exist"),
        None => format!("column \"{colname}\" does not exist"),
    };
    PgError::new(SqlState::UndefinedColumn, message).at(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::pg_type::INT4OID;
    use crate::nodes::parsenodes::CmdType;
    use crate::nodes::primnodes::TargetEntry;

    fn values_rte(pstate: &mut ParseState<'_>, ncols: usize) -> Index {
        let mut columns = ColumnTypes::default();
        for _ in 0..ncols {
            columns.push(INT4OID, -1, INVALID_OID);
        }
        add_rte_for_values(pstate, Vec::new(), columns, None, false, true).unwrap()
    }

    #[test]
    fn values_columns_are_numbered() {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        let rtindex = values_rte(&mut pstate, 2);
        let item = build_nsitem(rtindex, pstate.rte(0, rtindex).unwrap());
        assert_eq!(item.colnames, vec!["column1", "column2"]);
        pstate.level_mut().namespace.push(item);
        let var = colname_to_var(&mut pstate, "column2", Some(4)).unwrap().unwrap();
        let Expr::Var(var) = var else { panic!("expected a Var") };
        assert_eq!((var.varno, var.varattno, var.vartype), (rtindex, 2, INT4OID));
    }

    #[test]
    fn same_column_in_two_items_is_ambiguous() {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        for alias in ["a", "b"] {
            let mut columns = ColumnTypes::default();
            columns.push(INT4OID, -1, INVALID_OID);
            let rtindex = add_rte_for_values(&mut pstate, Vec::new(), columns, Some(Alias::new(alias)), false, true)
                .unwrap();
            let item = build_nsitem(rtindex, pstate.rte(0, rtindex).unwrap());
            pstate.level_mut().namespace.push(item);
        }
        let err = colname_to_var(&mut pstate, "column1", None).unwrap_err();
        assert_eq!(err.sqlstate, SqlState::AmbiguousColumn);
    }

    #[test]
    fn outer_level_columns_carry_levels_up() {
        let catalog = Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        let mut sub = Query::new(CmdType::Select);
        sub.target_list.push(TargetEntry::new(
            crate::nodes::makefuncs::make_const(INT4OID, crate::nodes::datum::Datum::Int4(1)),
            1,
            Some("x".to_string()),
            false,
        ));
        let rtindex = add_rte_for_subquery(&mut pstate, sub, Some(Alias::new("s")), false, true, None).unwrap();
        let item = build_nsitem(rtindex, pstate.rte(0, rtindex).unwrap());
        pstate.level_mut().namespace.push(item);
        pstate.push_level().unwrap();
        let var = colname_to_var(&mut pstate, "x", None).unwrap().unwrap();
        let Expr::Var(var) = var else { panic!("expected a Var") };
        assert_eq!(var.varlevelsup, 1);
        assert!(refname_nsitem(&pstate, None, "s", None).unwrap().is_some());
        assert!(refname_nsitem(&pstate, None, "t", None).unwrap().is_none());
    }
}
