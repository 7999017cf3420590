//! Target lists: SELECT output columns, INSERT/UPDATE assignments and the
//! `*` expansions shared by ROW() and VALUES.

use tracing::trace;

use crate::catalog::CatalogOracle;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::CoercionContext;
use crate::catalog::pg_type::{RECORDOID, UNKNOWNOID};
use crate::nodes::makefuncs::{make_null_const, make_var};
use crate::nodes::node_funcs::{expr_collation, expr_type, expr_typmod};
use crate::nodes::parsenodes::{AExprKind, ColumnRefField, Indirection, RawExpr, ResTarget, RteKind};
use crate::nodes::primnodes::{
    CaseTestExpr, CoercionForm, Expr, FieldSelect, FieldStore, JsonExprOp, Location, MinMaxOp, SetToDefault,
    SqlValueFunctionOp, SubLinkType, TargetEntry,
};
use crate::nodes::tupdesc::{Attribute, TupleDesc};
use crate::parser::parse_coerce::coerce_to_target_type;
use crate::parser::parse_expr::{resolve_unknown_to_text, transform_container_subscripts, transform_expr};
use crate::parser::parse_node::{ParseExprKind, ParseState};
use crate::parser::parse_relation::{
    error_missing_rte, expand_nsitem_vars, is_system_column_name, refname_nsitem, rte_columns,
};
use crate::utils::elog::{PgError, PgResult, SqlState, elog};

/// A column named in `INSERT INTO t (cols)`.
#[derive(Debug, Clone)]
pub struct InsertTarget {
    pub name: String,
    pub attno: i16,
    pub indirection: Vec<Indirection>,
    pub location: Option<usize>,
}

/// Analyze one target expression into a target entry. `expr` is passed when
/// the caller has already transformed `raw`.
pub fn transform_target_entry(
    pstate: &mut ParseState<'_>,
    raw: &RawExpr,
    expr: Option<Expr>,
    kind: ParseExprKind,
    colname: Option<String>,
    resno: i16,
    resjunk: bool,
) -> PgResult<TargetEntry> {
    let expr = match expr {
        Some(expr) => expr,
        None => transform_expr(pstate, raw, kind)?,
    };
    let colname = match colname {
        Some(name) => Some(name),
        None if !resjunk => Some(figure_colname(raw)),
        None => None,
    };
    Ok(TargetEntry::new(expr, resno, colname, resjunk))
}

/// Analyze a SELECT list or RETURNING list.
pub fn transform_target_list(
    pstate: &mut ParseState<'_>,
    targets: &[ResTarget],
    kind: ParseExprKind,
) -> PgResult<Vec<TargetEntry>> {
    let mut tlist: Vec<TargetEntry> = Vec::with_capacity(targets.len());
    for target in targets {
        let raw = target
            .val
            .as_ref()
            .ok_or_else(|| elog("target list entry without a value"))?;
        if let Some(expanded) = expand_star(pstate, raw, kind, true)? {
            for (name, expr) in expanded {
                let resno = next_resno(&tlist)?;
                tlist.push(TargetEntry::new(expr, resno, Some(name), false));
            }
            continue;
        }
        let resno = next_resno(&tlist)?;
        let tle = transform_target_entry(pstate, raw, None, kind, target.name.clone(), resno, false)?;
        tlist.push(tle);
    }
    trace!(columns = tlist.len(), "target list analyzed");
    Ok(tlist)
}

fn next_resno(tlist: &[TargetEntry]) -> PgResult<i16> {
    i16::try_from(tlist.len() + 1).map_err(|_| {
        PgError::new(SqlState::TooManyColumns, "target lists can have at most 1664 entries")
    })
}

/// Analyze a list of expressions where `rel.*` expands to its columns, as in
/// ROW() and VALUES. `allow_default` admits DEFAULT items.
pub fn transform_expression_list(
    pstate: &mut ParseState<'_>,
    exprs: &[RawExpr],
    kind: ParseExprKind,
    allow_default: bool,
) -> PgResult<Vec<Expr>> {
    let mut result = Vec::with_capacity(exprs.len());
    for raw in exprs {
        if let Some(expanded) = expand_star(pstate, raw, kind, false)? {
            result.extend(expanded.into_iter().map(|(_, expr)| expr));
            continue;
        }
        if allow_default && let RawExpr::SetToDefault { location } = raw {
            result.push(Expr::SetToDefault(SetToDefault {
                type_id: INVALID_OID,
                type_mod: -1,
                collation: INVALID_OID,
                location: Location(*location),
            }));
            continue;
        }
        result.push(transform_expr(pstate, raw, kind)?);
    }
    Ok(result)
}

/// Expand `*`, `rel.*` or `(expr).*`; `None` if `raw` is not a star form.
fn expand_star(
    pstate: &mut ParseState<'_>,
    raw: &RawExpr,
    kind: ParseExprKind,
    target_list: bool,
) -> PgResult<Option<Vec<(String, Expr)>>> {
    match raw {
        RawExpr::ColumnRef { fields, location } if fields.last() == Some(&ColumnRefField::Star) => {
            expand_column_ref_star(pstate, fields, *location, target_list).map(Some)
        }
        RawExpr::Indirection { arg, indirection } if indirection.last() == Some(&Indirection::Star) => {
            let inner = if indirection.len() > 1 {
                RawExpr::Indirection {
                    arg: arg.clone(),
                    indirection: indirection[..indirection.len() - 1].to_vec(),
                }
            } else {
                (**arg).clone()
            };
            let expr = transform_expr(pstate, &inner, kind)?;
            expand_record_fields(pstate, expr, raw.location()).map(Some)
        }
        _ => Ok(None),
    }
}

fn expand_column_ref_star(
    pstate: &mut ParseState<'_>,
    fields: &[ColumnRefField],
    location: Option<usize>,
    target_list: bool,
) -> PgResult<Vec<(String, Expr)>> {
    let names: Vec<&str> = fields
        .iter()
        .filter_map(|field| match field {
            ColumnRefField::Name(name) => Some(name.as_str()),
            ColumnRefField::Star => None,
        })
        .collect();
    if names.len() + 1 != fields.len() {
        return Err(PgError::new(SqlState::SyntaxError, "improper use of \"*\"").at(location));
    }
    let mut out = Vec::new();
    match names.as_slice() {
        [] => {
            if !target_list {
                return Err(
                    PgError::new(SqlState::FeatureNotSupported, "row expansion via \"*\" is not supported here")
                        .at(location),
                );
            }
            let level = pstate.level();
            let lateral_active = level.lateral_active;
            let items: Vec<usize> = level
                .namespace
                .iter()
                .enumerate()
                .filter(|(_, item)| item.cols_visible && (!item.lateral_only || lateral_active))
                .map(|(idx, _)| idx)
                .collect();
            if items.is_empty() {
                return Err(PgError::new(SqlState::SyntaxError, "SELECT * with no tables specified is not valid")
                    .at(location));
            }
            for idx in items {
                let (colnames, exprs) = expand_nsitem_vars(pstate, 0, idx, location)?;
                out.extend(colnames.into_iter().zip(exprs));
            }
        }
        _ => {
            let (schema, relname) = match names.as_slice() {
                [rel] => (None, *rel),
                [schema, rel] => (Some(*schema), *rel),
                [db, schema, rel] => {
                    if *db != pstate.catalog.current_database_name() {
                        return Err(PgError::new(
                            SqlState::FeatureNotSupported,
                            format!("cross-database references are not implemented: {}", names.join(".")),
                        )
                        .at(location));
                    }
                    (Some(*schema), *rel)
                }
                _ => {
                    return Err(PgError::new(
                        SqlState::SyntaxError,
                        format!("improper qualified name (too many dotted names): {}", names.join(".")),
                    )
                    .at(location));
                }
            };
            let (levels_up, ns_index) = refname_nsitem(pstate, schema, relname, location)?
                .ok_or_else(|| error_missing_rte(pstate, relname, location))?;
            let (colnames, exprs) = expand_nsitem_vars(pstate, levels_up, ns_index, location)?;
            out.extend(colnames.into_iter().zip(exprs));
        }
    }
    Ok(out)
}

fn expand_record_fields(pstate: &ParseState<'_>, expr: Expr, location: Option<usize>) -> PgResult<Vec<(String, Expr)>> {
    let desc = expand_record_desc(pstate, &expr)?.ok_or_else(|| {
        PgError::new(
            SqlState::WrongObjectType,
            format!(
                "type {} is not composite",
                pstate.catalog.format_type(expr_type(&expr))
            ),
        )
        .at(location)
    })?;
    // A ROW() constructor expands to its own arguments.
    if let Expr::RowExpr(row) = &expr {
        return Ok(desc.column_names().into_iter().zip(row.args.iter().cloned()).collect());
    }
    Ok(desc
        .live_attrs()
        .map(|(attno, attr)| {
            let field = Expr::FieldSelect(Box::new(FieldSelect {
                arg: expr.clone(),
                fieldnum: attno,
                resulttype: attr.typid,
                resulttypmod: attr.typmod,
                resultcollid: attr.collation,
            }));
            (attr.name.clone(), field)
        })
        .collect())
}

/// Row descriptor of a composite-valued expression, including anonymous
/// `record` values whose shape is known from context.
pub fn expand_record_desc(pstate: &ParseState<'_>, expr: &Expr) -> PgResult<Option<TupleDesc>> {
    let catalog = pstate.catalog;
    let typid = expr_type(expr);
    if typid != RECORDOID {
        return Ok(catalog.composite_desc(typid).cloned());
    }
    match expr {
        Expr::RowExpr(row) => {
            let attrs = row
                .args
                .iter()
                .zip(&row.colnames)
                .map(|(arg, name)| Attribute::new(name.clone(), expr_type(arg), expr_typmod(arg), expr_collation(arg)))
                .collect();
            Ok(Some(TupleDesc::new(attrs)))
        }
        Expr::Var(var) if var.varattno == 0 => {
            let rte = pstate.rte(var.varlevelsup, var.varno)?;
            let attrs = rte_columns(catalog, rte)?
                .into_iter()
                .map(|(name, typid, typmod, coll)| Attribute::new(name, typid, typmod, coll))
                .collect();
            Ok(Some(TupleDesc::new(attrs)))
        }
        Expr::Var(var) => {
            // A record-typed column of a sub-select in FROM: look at what the
            // sub-select produces.
            let rte = pstate.rte(var.varlevelsup, var.varno)?;
            if let RteKind::Subquery { subquery } = &rte.kind
                && let Some(tle) = subquery.target_list.iter().find(|tle| tle.resno == var.varattno)
                && let Expr::RowExpr(_) = &tle.expr
            {
                return expand_record_desc(pstate, &tle.expr);
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Give `unknown` output columns type text.
pub fn resolve_target_list_unknowns(pstate: &ParseState<'_>, tlist: &mut [TargetEntry]) -> PgResult<()> {
    for tle in tlist.iter_mut().filter(|tle| !tle.resjunk) {
        if expr_type(&tle.expr) == UNKNOWNOID {
            let expr = std::mem::replace(&mut tle.expr, make_null_const(UNKNOWNOID, -1, INVALID_OID));
            tle.expr = resolve_unknown_to_text(pstate, expr)?;
        }
    }
    Ok(())
}

/// Record the table and column each output column is read directly from.
pub fn mark_target_list_origins(pstate: &ParseState<'_>, tlist: &mut [TargetEntry]) {
    for tle in tlist.iter_mut() {
        if let Expr::Var(var) = &tle.expr
            && let Some((relid, attno)) = var_origin(pstate, var.varlevelsup, var.varno, var.varattno)
        {
            tle.resorigtbl = relid;
            tle.resorigcol = attno;
        }
    }
}

fn var_origin(pstate: &ParseState<'_>, levelsup: u32, varno: u32, attno: i16) -> Option<(Oid, i16)> {
    let rte = pstate.rte(levelsup, varno).ok()?;
    match &rte.kind {
        RteKind::Relation { relid, .. } if attno > 0 => Some((*relid, attno)),
        RteKind::Join { joinaliasvars, .. } if attno > 0 => match joinaliasvars.get(attno as usize - 1)? {
            Expr::Var(inner) => var_origin(pstate, levelsup + inner.varlevelsup, inner.varno, inner.varattno),
            _ => None,
        },
        RteKind::Subquery { subquery } if attno > 0 => {
            let tle = subquery.target_list.iter().find(|tle| tle.resno == attno)?;
            (tle.resorigtbl != INVALID_OID).then_some((tle.resorigtbl, tle.resorigcol))
        }
        _ => None,
    }
}

/// Output column name for an expression without `AS`.
pub fn figure_colname(raw: &RawExpr) -> String {
    figure_colname_internal(raw).map_or_else(|| "?column?".to_string(), |(name, _)| name)
}

/// Name and strength; a strength of 2 comes from a column or function name,
/// 1 from the kind of construct.
fn figure_colname_internal(raw: &RawExpr) -> Option<(String, u8)> {
    let weak = |name: &str| Some((name.to_string(), 1));
    match raw {
        RawExpr::ColumnRef { fields, .. } => fields.iter().rev().find_map(|field| match field {
            ColumnRefField::Name(name) => Some((name.clone(), 2)),
            ColumnRefField::Star => None,
        }),
        RawExpr::Indirection { arg, indirection } => indirection
            .iter()
            .rev()
            .find_map(|step| match step {
                Indirection::Field(name) => Some((name.clone(), 2)),
                _ => None,
            })
            .or_else(|| figure_colname_internal(arg)),
        RawExpr::FuncCall(call) => call.funcname.last().map(|name| (name.clone(), 2)),
        RawExpr::AExpr {
            kind: AExprKind::NullIf,
            ..
        } => Some(("nullif".to_string(), 2)),
        RawExpr::TypeCast { arg, type_name, .. } => figure_colname_internal(arg)
            .or_else(|| type_name.names.last().map(|name| (name.clone(), 1))),
        RawExpr::CollateClause { arg, .. } => figure_colname_internal(arg),
        RawExpr::GroupingFunc { .. } => Some(("grouping".to_string(), 2)),
        RawExpr::SubLink {
            sub_link_type,
            subselect,
            ..
        } => match sub_link_type {
            SubLinkType::Exists => Some(("exists".to_string(), 2)),
            SubLinkType::Array => Some(("array".to_string(), 2)),
            SubLinkType::Expr => subselect.target_list.first().and_then(|target| match &target.name {
                Some(name) => Some((name.clone(), 2)),
                None => target.val.as_ref().and_then(figure_colname_internal),
            }),
            _ => None,
        },
        RawExpr::CaseExpr { defresult, .. } => match defresult.as_deref().and_then(figure_colname_internal) {
            Some((name, 2)) => Some((name, 2)),
            _ => weak("case"),
        },
        RawExpr::ArrayExpr { .. } => Some(("array".to_string(), 2)),
        RawExpr::RowExpr { .. } => Some(("row".to_string(), 2)),
        RawExpr::CoalesceExpr { .. } => Some(("coalesce".to_string(), 2)),
        RawExpr::MinMaxExpr { op, .. } => Some((
            match op {
                MinMaxOp::Greatest => "greatest",
                MinMaxOp::Least => "least",
            }
            .to_string(),
            2,
        )),
        RawExpr::SqlValueFunction { op, .. } => Some((
            match op {
                SqlValueFunctionOp::CurrentDate => "current_date",
                SqlValueFunctionOp::CurrentTimestamp => "current_timestamp",
                SqlValueFunctionOp::LocalTimestamp => "localtimestamp",
                SqlValueFunctionOp::CurrentRole => "current_role",
                SqlValueFunctionOp::CurrentUser => "current_user",
                SqlValueFunctionOp::User => "user",
                SqlValueFunctionOp::SessionUser => "session_user",
                SqlValueFunctionOp::CurrentCatalog => "current_catalog",
                SqlValueFunctionOp::CurrentSchema => "current_schema",
            }
            .to_string(),
            2,
        )),
        RawExpr::JsonObjectConstructor { .. } => Some(("json_object".to_string(), 2)),
        RawExpr::JsonArrayConstructor { .. } | RawExpr::JsonArrayQueryConstructor { .. } => {
            Some(("json_array".to_string(), 2))
        }
        RawExpr::JsonParseExpr { .. } => Some(("json".to_string(), 2)),
        RawExpr::JsonScalarExpr { .. } => Some(("json_scalar".to_string(), 2)),
        RawExpr::JsonSerializeExpr { .. } => Some(("json_serialize".to_string(), 2)),
        RawExpr::JsonFuncExpr(func) => Some((
            match func.op {
                JsonExprOp::Exists => "json_exists",
                JsonExprOp::Query => "json_query",
                JsonExprOp::Value => "json_value",
                JsonExprOp::Table => "json_table",
            }
            .to_string(),
            2,
        )),
        _ => None,
    }
}

/// Resolve the columns of an INSERT column list, or every live column of
/// the target relation when the list is empty.
pub fn check_insert_targets(pstate: &ParseState<'_>, cols: &[ResTarget]) -> PgResult<Vec<InsertTarget>> {
    let rel = target_relation(pstate)?;
    if cols.is_empty() {
        return Ok(rel
            .desc
            .live_attrs()
            .map(|(attno, attr)| InsertTarget {
                name: attr.name.clone(),
                attno,
                indirection: Vec::new(),
                location: None,
            })
            .collect());
    }
    let mut out: Vec<InsertTarget> = Vec::with_capacity(cols.len());
    for col in cols {
        let name = col.name.clone().ok_or_else(|| elog("INSERT column without a name"))?;
        let attno = rel.desc.attnum_by_name(&name).ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedColumn,
                format!("column \"{name}\" of relation \"{}\" does not exist", rel.name),
            )
            .at(col.location)
        })?;
        // `a[1]` and `a[2]` may both be assigned; plain duplicates may not.
        if out
            .iter()
            .any(|prev| prev.attno == attno && (prev.indirection.is_empty() || col.indirection.is_empty()))
        {
            return Err(PgError::new(
                SqlState::DuplicateColumn,
                format!("column \"{name}\" specified more than once"),
            )
            .at(col.location));
        }
        out.push(InsertTarget {
            name,
            attno,
            indirection: col.indirection.clone(),
            location: col.location,
        });
    }
    Ok(out)
}

fn target_relation<'c>(pstate: &ParseState<'c>) -> PgResult<&'c crate::catalog::table::Relation> {
    let rtindex = pstate
        .level()
        .target_relation
        .ok_or_else(|| elog("no target relation"))?;
    let relid = pstate.rte(0, rtindex)?.relid();
    pstate
        .catalog
        .relation(relid)
        .ok_or_else(|| elog(format!("cache lookup failed for relation {relid}")))
}

/// Prepare `expr` for assignment to column `attno` of the target relation,
/// applying any field or subscript indirection.
pub fn transform_assigned_expr(
    pstate: &mut ParseState<'_>,
    expr: Expr,
    colname: &str,
    attno: i16,
    indirection: &[Indirection],
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    if attno <= 0 || is_system_column_name(colname) {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("cannot assign to system column \"{colname}\""),
        )
        .at(location));
    }
    let rel = target_relation(pstate)?;
    let attr = rel
        .desc
        .attr(attno)
        .ok_or_else(|| elog(format!("column {attno} of relation \"{}\" does not exist", rel.name)))?;
    let (attrtype, attrtypmod, attrcollation) = (attr.typid, attr.typmod, attr.collation);

    if let Expr::SetToDefault(mut def) = expr {
        if !indirection.is_empty() {
            let message = if matches!(indirection.first(), Some(Indirection::Field(_))) {
                "cannot set a subfield to DEFAULT"
            } else {
                "cannot set an array element to DEFAULT"
            };
            return Err(PgError::new(SqlState::FeatureNotSupported, message).at(location));
        }
        def.type_id = attrtype;
        def.type_mod = attrtypmod;
        def.collation = attrcollation;
        return Ok(Expr::SetToDefault(def));
    }

    if !indirection.is_empty() {
        let level = pstate.level();
        let base = if level.is_insert {
            make_null_const(attrtype, attrtypmod, attrcollation)
        } else {
            let rtindex = level.target_relation.ok_or_else(|| elog("no target relation"))?;
            make_var(rtindex, attno, attrtype, attrtypmod, attrcollation, 0)
        };
        return transform_assignment_indirection(
            pstate,
            base,
            colname,
            attrtype,
            attrtypmod,
            indirection,
            expr,
            location,
        );
    }

    let exprtype = expr_type(&expr);
    coerce_to_target_type(
        catalog,
        expr,
        exprtype,
        attrtype,
        attrtypmod,
        CoercionContext::Assignment,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::DatatypeMismatch,
            format!(
                "column \"{colname}\" is of type {} but expression is of type {}",
                catalog.format_type(attrtype),
                catalog.format_type(exprtype)
            ),
        )
        .with_hint("You will need to rewrite or cast the expression.")
        .at(location)
    })
}

/// `col.f = v`, `col[i] = v` and combinations: wrap `rhs` in FieldStore and
/// SubscriptingRef nodes over `base`, the column's current value.
#[allow(clippy::too_many_arguments)]
fn transform_assignment_indirection(
    pstate: &mut ParseState<'_>,
    base: Expr,
    targetname: &str,
    target_type: Oid,
    target_typmod: i32,
    indirection: &[Indirection],
    rhs: Expr,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let Some(first) = indirection.first() else {
        let rhs_type = expr_type(&rhs);
        return coerce_to_target_type(
            catalog,
            rhs,
            rhs_type,
            target_type,
            target_typmod,
            CoercionContext::Assignment,
            CoercionForm::ImplicitCast,
            location,
        )?
        .ok_or_else(|| {
            PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "subfield \"{targetname}\" is of type {} but expression is of type {}",
                    catalog.format_type(target_type),
                    catalog.format_type(rhs_type)
                ),
            )
            .with_hint("You will need to rewrite or cast the expression.")
            .at(location)
        });
    };
    match first {
        Indirection::Star => Err(PgError::new(SqlState::SyntaxError, "row expansion via \"*\" is not supported here")
            .at(location)),
        Indirection::Field(field) => {
            let desc = catalog.composite_desc(catalog.base_type(target_type)).ok_or_else(|| {
                PgError::new(
                    SqlState::DatatypeMismatch,
                    format!(
                        "cannot assign to field \"{field}\" of column \"{targetname}\" because its type {} is not a composite type",
                        catalog.format_type(target_type)
                    ),
                )
                .at(location)
            })?;
            let attno = desc.attnum_by_name(field).ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedColumn,
                    format!(
                        "cannot assign to field \"{field}\" of column \"{targetname}\" because there is no such column in data type {}",
                        catalog.format_type(target_type)
                    ),
                )
                .at(location)
            })?;
            let attr = desc
                .attr(attno)
                .ok_or_else(|| elog("composite attribute vanished"))?;
            let (ftype, ftypmod, fcoll) = (attr.typid, attr.typmod, attr.collation);
            let current = Expr::FieldSelect(Box::new(FieldSelect {
                arg: base.clone(),
                fieldnum: attno,
                resulttype: ftype,
                resulttypmod: ftypmod,
                resultcollid: fcoll,
            }));
            let newval = transform_assignment_indirection(
                pstate,
                current,
                field,
                ftype,
                ftypmod,
                &indirection[1..],
                rhs,
                location,
            )?;
            Ok(Expr::FieldStore(Box::new(FieldStore {
                arg: base,
                newvals: vec![newval],
                fieldnums: vec![attno],
                resulttype: target_type,
            })))
        }
        Indirection::Subscript { .. } => {
            let nsubs = indirection
                .iter()
                .take_while(|step| matches!(step, Indirection::Subscript { .. }))
                .count();
            let subscripts: Vec<&Indirection> = indirection[..nsubs].iter().collect();
            let mut sref =
                transform_container_subscripts(pstate, base, target_type, target_typmod, &subscripts, true)?;
            let is_slice = !sref.reflowerindexpr.is_empty();
            let (elem_target, elem_typmod) = if is_slice {
                (sref.refcontainertype, sref.reftypmod)
            } else {
                (sref.refelemtype, -1)
            };
            // Deeper steps see the element's current value as a CaseTestExpr.
            let current = Expr::CaseTestExpr(CaseTestExpr {
                type_id: elem_target,
                type_mod: elem_typmod,
                collation: catalog.type_collation(elem_target),
            });
            let newval = transform_assignment_indirection(
                pstate,
                current,
                targetname,
                elem_target,
                elem_typmod,
                &indirection[nsubs..],
                rhs,
                location,
            )
            .map_err(|err| {
                if err.sqlstate == SqlState::DatatypeMismatch && indirection.len() == nsubs {
                    PgError::new(
                        SqlState::DatatypeMismatch,
                        format!(
                            "array assignment to \"{targetname}\" requires type {} but expression is of a different type",
                            catalog.format_type(elem_target)
                        ),
                    )
                    .with_hint("You will need to rewrite or cast the expression.")
                    .at(location)
                } else {
                    err
                }
            })?;
            sref.refassgnexpr = Some(newval);
            Ok(Expr::SubscriptingRef(Box::new(sref)))
        }
    }
}

/// Analyze `SET col = expr` into `tle`, renumbering it to the column.
pub fn update_target_list_entry(
    pstate: &mut ParseState<'_>,
    tle: &mut TargetEntry,
    colname: &str,
    attno: i16,
    indirection: &[Indirection],
    location: Option<usize>,
) -> PgResult<()> {
    let expr = std::mem::replace(&mut tle.expr, make_null_const(UNKNOWNOID, -1, INVALID_OID));
    tle.expr = transform_assigned_expr(pstate, expr, colname, attno, indirection, location)?;
    tle.resno = attno;
    tle.resname = Some(colname.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::gram::parse_expression;

    fn name_of(sql: &str) -> String {
        figure_colname(&parse_expression(sql).unwrap())
    }

    #[test]
    fn column_names_follow_the_expression() {
        assert_eq!(name_of("a.b"), "b");
        assert_eq!(name_of("lower(x)"), "lower");
        assert_eq!(name_of("1 + 2"), "?column?");
        assert_eq!(name_of("x::text"), "x");
        assert_eq!(name_of("'1'::int4"), "int4");
        assert_eq!(name_of("CASE WHEN true THEN 1 END"), "case");
        assert_eq!(name_of("CASE WHEN true THEN 1 ELSE y END"), "y");
        assert_eq!(name_of("coalesce(a, b)"), "coalesce");
        assert_eq!(name_of("ROW(1, 2)"), "row");
    }

    #[test]
    fn star_without_from_is_rejected() {
        let catalog = crate::catalog::Catalog::default();
        let mut pstate = ParseState::new(&catalog, "SELECT *");
        let targets = vec![ResTarget {
            name: None,
            indirection: Vec::new(),
            val: Some(RawExpr::ColumnRef {
                fields: vec![ColumnRefField::Star],
                location: Some(7),
            }),
            location: Some(7),
        }];
        let err = transform_target_list(&mut pstate, &targets, ParseExprKind::SelectTarget).unwrap_err();
        assert_eq!(err.message, "SELECT * with no tables specified is not valid");
    }

    #[test]
    fn unknown_outputs_become_text() {
        let catalog = crate::catalog::Catalog::default();
        let mut pstate = ParseState::new(&catalog, "");
        let raw = parse_expression("'abc'").unwrap();
        let tle = transform_target_entry(&mut pstate, &raw, None, ParseExprKind::SelectTarget, None, 1, false).unwrap();
        let mut tlist = vec![tle];
        resolve_target_list_unknowns(&pstate, &mut tlist).unwrap();
        assert_eq!(expr_type(&tlist[0].expr), crate::catalog::pg_type::TEXTOID);
    }
}
