//! Expression analysis: raw expression trees to typed [`Expr`] trees.

use tracing::trace;

use crate::catalog::CatalogOracle;
use crate::catalog::oid::{INVALID_OID, Oid};
use crate::catalog::pg_operator::{BT_EQUAL_STRATEGY, CoercionContext};
use crate::catalog::pg_type::{
    BOOLOID, DATEOID, INT4OID, MAX_TUPLE_ATTRIBUTE_NUMBER, NAMEOID, NUMERICOID, RECORDOID, TEXTOID,
    TIMESTAMPOID, TIMESTAMPTZOID, UNKNOWNOID, VOIDOID,
};
use crate::nodes::datum::Datum;
use crate::nodes::makefuncs::{make_bool_expr, make_const, make_not_expr, make_null_test};
use crate::nodes::node_funcs::{
    contain_vars_of_level, expr_collation, expr_location, expr_type, expr_typmod,
};
use crate::nodes::parsenodes::{
    AConstValue, AExprKind, ColumnRefField, FuncCall, Indirection, RawCaseWhen, RawExpr, SelectStmt,
    TypeName,
};
use crate::nodes::primnodes::{
    ArrayExpr, BoolExprType, BoolTestType, BooleanTest, CaseExpr, CaseTestExpr, CaseWhen, CoalesceExpr,
    CoercionForm, CollateExpr, Expr, FnCache, Location, MinMaxExpr, MinMaxOp, NullTest, NullTestType, Param,
    ParamKind, RowCompareExpr, RowCompareType, RowExpr, SetToDefault, SqlValueFunction, SqlValueFunctionOp,
    SubLink, SubLinkType, SubscriptingRef, TargetEntry,
};
use crate::parser::analyze::parse_sub_analyze;
use crate::parser::parse_agg::transform_grouping_func;
use crate::parser::parse_coerce::{
    can_coerce_type, coerce_to_boolean, coerce_to_common_type, coerce_to_target_type, coerce_type,
    select_common_type,
};
use crate::parser::parse_collate::assign_expr_collations;
use crate::parser::parse_func::parse_func_or_column;
use crate::parser::parse_jsonexpr::transform_json_expr;
use crate::parser::parse_node::{ColumnRefInfo, ParseExprKind, ParseState, make_const as make_literal};
use crate::parser::parse_oper::{make_op, make_scalar_array_op};
use crate::parser::parse_relation::{
    colname_to_var, error_missing_column, error_missing_rte, make_whole_row_var, refname_nsitem,
    scan_nsitem_for_column,
};
use crate::parser::parse_target::transform_expression_list;
use crate::parser::parse_type::typename_type_id_and_mod;
use crate::utils::adt::io::numeric_in;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::guc;
use crate::utils::interrupt::StackDepthGuard;

/// Most dimensions an array may have.
pub const MAXDIM: usize = 6;
/// Pseudo btree strategy for `<>`, found through the negator.
const ROWCOMPARE_NE: i16 = 6;

/// Analyze `raw` as an expression appearing in `kind`.
pub fn transform_expr(pstate: &mut ParseState<'_>, raw: &RawExpr, kind: ParseExprKind) -> PgResult<Expr> {
    let saved = pstate.set_expr_kind(kind);
    let result = transform_expr_recurse(pstate, raw);
    pstate.restore_expr_kind(saved);
    result
}

/// Analyze a sub-expression in the current expression kind.
pub fn transform_expr_recurse(pstate: &mut ParseState<'_>, raw: &RawExpr) -> PgResult<Expr> {
    let _guard = StackDepthGuard::enter()?;
    match raw {
        RawExpr::ColumnRef { fields, location } => transform_column_ref(pstate, fields, *location),
        RawExpr::ParamRef { number, location } => transform_param_ref(pstate, *number, *location),
        RawExpr::AConst { value, location } => make_literal(value, *location),
        RawExpr::AExpr {
            kind,
            name,
            lexpr,
            rexpr,
            location,
        } => transform_a_expr(pstate, *kind, name, lexpr.as_deref(), rexpr.as_deref(), *location),
        RawExpr::BoolExpr { op, args, location } => transform_bool_expr(pstate, *op, args, *location),
        RawExpr::NullTest { arg, kind, location } => {
            let arg = transform_expr_recurse(pstate, arg)?;
            let argisrow = pstate.catalog.is_composite_type(expr_type(&arg));
            Ok(Expr::NullTest(Box::new(NullTest {
                arg,
                nulltesttype: *kind,
                argisrow,
                location: Location(*location),
            })))
        }
        RawExpr::BooleanTest { arg, kind, location } => {
            let construct = match kind {
                BoolTestType::IsTrue => "IS TRUE",
                BoolTestType::IsNotTrue => "IS NOT TRUE",
                BoolTestType::IsFalse => "IS FALSE",
                BoolTestType::IsNotFalse => "IS NOT FALSE",
                BoolTestType::IsUnknown => "IS UNKNOWN",
                BoolTestType::IsNotUnknown => "IS NOT UNKNOWN",
            };
            let arg = transform_expr_recurse(pstate, arg)?;
            let arg = coerce_to_boolean(pstate.catalog, arg, construct)?;
            Ok(Expr::BooleanTest(Box::new(BooleanTest {
                arg,
                booltesttype: *kind,
                location: Location(*location),
            })))
        }
        RawExpr::TypeCast {
            arg,
            type_name,
            location,
        } => transform_type_cast(pstate, arg, type_name, *location),
        RawExpr::CollateClause { arg, collname, location } => transform_collate_clause(pstate, arg, collname, *location),
        RawExpr::FuncCall(call) => transform_func_call(pstate, call),
        RawExpr::NamedArgExpr { arg, .. } => transform_expr_recurse(pstate, arg),
        RawExpr::Indirection { arg, indirection } => transform_indirection(pstate, arg, indirection),
        RawExpr::ArrayExpr { elements, location } => {
            transform_array_expr(pstate, elements, INVALID_OID, INVALID_OID, -1, *location)
        }
        RawExpr::RowExpr {
            args,
            explicit_row,
            location,
        } => transform_row_expr(pstate, args, *explicit_row, false, *location),
        RawExpr::SubLink {
            sub_link_type,
            testexpr,
            oper_name,
            subselect,
            location,
        } => transform_sub_link(pstate, *sub_link_type, testexpr.as_deref(), oper_name, subselect, *location),
        RawExpr::CaseExpr {
            arg,
            args,
            defresult,
            location,
        } => transform_case_expr(pstate, arg.as_deref(), args, defresult.as_deref(), *location),
        RawExpr::CoalesceExpr { args, location } => transform_coalesce_expr(pstate, args, *location),
        RawExpr::MinMaxExpr { op, args, location } => transform_min_max_expr(pstate, *op, args, *location),
        RawExpr::SqlValueFunction { op, location } => {
            let type_id = match op {
                SqlValueFunctionOp::CurrentDate => DATEOID,
                SqlValueFunctionOp::CurrentTimestamp => TIMESTAMPTZOID,
                SqlValueFunctionOp::LocalTimestamp => TIMESTAMPOID,
                SqlValueFunctionOp::CurrentRole
                | SqlValueFunctionOp::CurrentUser
                | SqlValueFunctionOp::User
                | SqlValueFunctionOp::SessionUser
                | SqlValueFunctionOp::CurrentCatalog
                | SqlValueFunctionOp::CurrentSchema => NAMEOID,
            };
            Ok(Expr::SqlValueFunction(SqlValueFunction {
                op: *op,
                type_id,
                location: Location(*location),
            }))
        }
        RawExpr::SetToDefault { location } => Err(PgError::new(
            SqlState::SyntaxError,
            "DEFAULT is not allowed in this context",
        )
        .at(*location)),
        RawExpr::MultiAssignRef {
            source,
            colno,
            ncolumns,
        } => transform_multi_assign_ref(pstate, source, *colno, *ncolumns),
        RawExpr::GroupingFunc { args, location } => transform_grouping_func(pstate, args, *location),
        RawExpr::List(items) => Err(elog(format!("unexpected expression list of {} items", items.len()))),
        RawExpr::JsonObjectConstructor { .. }
        | RawExpr::JsonArrayConstructor { .. }
        | RawExpr::JsonArrayQueryConstructor { .. }
        | RawExpr::JsonParseExpr { .. }
        | RawExpr::JsonScalarExpr { .. }
        | RawExpr::JsonSerializeExpr { .. }
        | RawExpr::JsonIsPredicate { .. }
        | RawExpr::JsonFuncExpr(_) => transform_json_expr(pstate, raw),
    }
}

/// Placeholder for `DEFAULT` in a VALUES row or SET clause; the column's
/// type is filled in by the caller.
pub fn make_set_to_default(location: Option<usize>) -> Expr {
    Expr::SetToDefault(SetToDefault {
        type_id: INVALID_OID,
        type_mod: -1,
        collation: INVALID_OID,
        location: Location(location),
    })
}

fn name_list_to_string(fields: &[ColumnRefField]) -> String {
    fields
        .iter()
        .map(|field| match field {
            ColumnRefField::Name(name) => name.as_str(),
            ColumnRefField::Star => "*",
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn star_not_supported(location: Option<usize>) -> PgError {
    PgError::new(SqlState::FeatureNotSupported, "row expansion via \"*\" is not supported here").at(location)
}

fn qualifier<'f>(field: &'f ColumnRefField, location: Option<usize>) -> PgResult<&'f str> {
    match field {
        ColumnRefField::Name(name) => Ok(name),
        ColumnRefField::Star => Err(PgError::new(SqlState::SyntaxError, "improper use of \"*\"").at(location)),
    }
}

/// Outcome of resolving a qualified column reference.
enum Qualified {
    Found(Expr),
    NoRte(String),
}

fn transform_qualified(
    pstate: &mut ParseState<'_>,
    schema: Option<&str>,
    relname: &str,
    col: &ColumnRefField,
    location: Option<usize>,
) -> PgResult<Qualified> {
    let Some((levels_up, ns_index)) = refname_nsitem(pstate, schema, relname, location)? else {
        return Ok(Qualified::NoRte(relname.to_string()));
    };
    let rtindex = pstate
        .level_at(levels_up)
        .and_then(|level| level.namespace.get(ns_index))
        .map(|item| item.rtindex)
        .ok_or_else(|| elog("invalid namespace item"))?;
    let colname = match col {
        ColumnRefField::Star => return make_whole_row_var(pstate, levels_up, rtindex, location).map(Qualified::Found),
        ColumnRefField::Name(name) => name,
    };
    if let Some(var) = scan_nsitem_for_column(pstate, levels_up, ns_index, colname, location)? {
        return Ok(Qualified::Found(var));
    }
    // `t.f` may also be functional notation `f(t)`.
    let whole_row = make_whole_row_var(pstate, levels_up, rtindex, location)?;
    let call = FuncCall::new(vec![colname.clone()], Vec::new(), location);
    match parse_func_or_column(pstate, &call.funcname, vec![whole_row], Vec::new(), &call, location) {
        Ok(expr) => Ok(Qualified::Found(expr)),
        Err(err) if matches!(err.sqlstate, SqlState::UndefinedColumn | SqlState::UndefinedFunction) => {
            Err(error_missing_column(Some(relname), colname, location))
        }
        Err(err) => Err(err),
    }
}

fn transform_column_ref(
    pstate: &mut ParseState<'_>,
    fields: &[ColumnRefField],
    location: Option<usize>,
) -> PgResult<Expr> {
    match pstate.expr_kind() {
        ParseExprKind::ColumnDefault => {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                "cannot use column reference in DEFAULT expression",
            )
            .at(location));
        }
        ParseExprKind::PartitionBound => {
            return Err(PgError::new(
                SqlState::FeatureNotSupported,
                "cannot use column reference in partition bound expression",
            )
            .at(location));
        }
        _ => {}
    }

    if let Some(hook) = pstate.hooks.pre_columnref.clone() {
        let info = ColumnRefInfo {
            fields,
            location,
            resolved: None,
        };
        if let Some(expr) = hook(&info)? {
            return Ok(expr);
        }
    }

    let mut missing_rte: Option<String> = None;
    let resolved = match fields {
        [ColumnRefField::Star] => return Err(star_not_supported(location)),
        [ColumnRefField::Name(colname)] => match colname_to_var(pstate, colname, location)? {
            Some(var) => Some(var),
            None => match refname_nsitem(pstate, None, colname, location)? {
                Some((levels_up, ns_index)) => {
                    let rtindex = pstate
                        .level_at(levels_up)
                        .and_then(|level| level.namespace.get(ns_index))
                        .map(|item| item.rtindex)
                        .ok_or_else(|| elog("invalid namespace item"))?;
                    Some(make_whole_row_var(pstate, levels_up, rtindex, location)?)
                }
                None => None,
            },
        },
        [rel, col] => {
            let relname = qualifier(rel, location)?;
            match transform_qualified(pstate, None, relname, col, location)? {
                Qualified::Found(expr) => Some(expr),
                Qualified::NoRte(name) => {
                    // `schema.table` as a whole-row reference.
                    match col {
                        ColumnRefField::Name(table) => match transform_qualified(
                            pstate,
                            Some(relname),
                            table,
                            &ColumnRefField::Star,
                            location,
                        ) {
                            Ok(Qualified::Found(expr)) => Some(expr),
                            _ => {
                                missing_rte = Some(name);
                                None
                            }
                        },
                        ColumnRefField::Star => {
                            missing_rte = Some(name);
                            None
                        }
                    }
                }
            }
        }
        [schema, rel, col] => {
            let schema = qualifier(schema, location)?;
            let relname = qualifier(rel, location)?;
            match transform_qualified(pstate, Some(schema), relname, col, location)? {
                Qualified::Found(expr) => Some(expr),
                Qualified::NoRte(name) => {
                    missing_rte = Some(name);
                    None
                }
            }
        }
        [db, schema, rel, col] => {
            let db = qualifier(db, location)?;
            if db != pstate.catalog.current_database_name() {
                return Err(PgError::new(
                    SqlState::FeatureNotSupported,
                    format!("cross-database references are not implemented: {}", name_list_to_string(fields)),
                )
                .at(location));
            }
            let schema = qualifier(schema, location)?;
            let relname = qualifier(rel, location)?;
            match transform_qualified(pstate, Some(schema), relname, col, location)? {
                Qualified::Found(expr) => Some(expr),
                Qualified::NoRte(name) => {
                    missing_rte = Some(name);
                    None
                }
            }
        }
        _ => {
            return Err(PgError::new(
                SqlState::SyntaxError,
                format!(
                    "improper qualified name (too many dotted names): {}",
                    name_list_to_string(fields)
                ),
            )
            .at(location));
        }
    };

    let resolved = match pstate.hooks.post_columnref.clone() {
        Some(hook) => {
            let info = ColumnRefInfo {
                fields,
                location,
                resolved: resolved.as_ref(),
            };
            let hooked = hook(&info)?;
            match (hooked, resolved) {
                (Some(_), Some(_)) => {
                    return Err(PgError::new(
                        SqlState::AmbiguousColumn,
                        format!("column reference \"{}\" is ambiguous", name_list_to_string(fields)),
                    )
                    .at(location));
                }
                (Some(hooked), None) => Some(hooked),
                (None, resolved) => resolved,
            }
        }
        None => resolved,
    };

    if let Some(expr) = resolved {
        return Ok(expr);
    }
    if let Some(relname) = missing_rte {
        return Err(error_missing_rte(pstate, &relname, location));
    }
    let (relname, colname) = match fields {
        [.., rel, col] => (
            Some(name_list_to_string(std::slice::from_ref(rel))),
            name_list_to_string(std::slice::from_ref(col)),
        ),
        _ => (None, name_list_to_string(fields)),
    };
    Err(error_missing_column(relname.as_deref(), &colname, location))
}

fn transform_param_ref(pstate: &mut ParseState<'_>, number: i32, location: Option<usize>) -> PgResult<Expr> {
    if let Some(hook) = pstate.hooks.paramref.clone()
        && let Some(expr) = hook(number, location)?
    {
        return Ok(expr);
    }
    let paramtype = usize::try_from(number)
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| pstate.param_types.get(idx).copied())
        .filter(|&typid| typid != INVALID_OID)
        .ok_or_else(|| {
            PgError::new(SqlState::UndefinedParameter, format!("there is no parameter ${number}")).at(location)
        })?;
    Ok(Expr::Param(Param {
        paramkind: ParamKind::Extern,
        paramid: number,
        paramtype,
        paramtypmod: -1,
        paramcollid: pstate.catalog.type_collation(paramtype),
        location: Location(location),
    }))
}

fn is_raw_row(raw: Option<&RawExpr>) -> bool {
    matches!(raw, Some(RawExpr::RowExpr { .. }))
}

fn raw_row_args(raw: &RawExpr) -> &[RawExpr] {
    match raw {
        RawExpr::RowExpr { args, .. } => args,
        _ => std::slice::from_ref(raw),
    }
}

fn transform_list(pstate: &mut ParseState<'_>, raws: &[RawExpr]) -> PgResult<Vec<Expr>> {
    raws.iter().map(|raw| transform_expr_recurse(pstate, raw)).collect()
}

fn transform_a_expr(
    pstate: &mut ParseState<'_>,
    kind: AExprKind,
    name: &[String],
    lexpr: Option<&RawExpr>,
    rexpr: Option<&RawExpr>,
    location: Option<usize>,
) -> PgResult<Expr> {
    let rexpr = rexpr.ok_or_else(|| elog("operator expression without right operand"))?;
    match kind {
        AExprKind::Op => transform_a_expr_op(pstate, name, lexpr, rexpr, location),
        AExprKind::OpAny | AExprKind::OpAll => {
            let lexpr = lexpr.ok_or_else(|| elog("ANY/ALL without left operand"))?;
            let ltree = transform_expr_recurse(pstate, lexpr)?;
            let rtree = transform_expr_recurse(pstate, rexpr)?;
            make_scalar_array_op(pstate, name, kind == AExprKind::OpAny, ltree, rtree, location)
        }
        AExprKind::Distinct | AExprKind::NotDistinct => {
            let lexpr = lexpr.ok_or_else(|| elog("IS DISTINCT FROM without left operand"))?;
            let negate = kind == AExprKind::NotDistinct;
            // `x IS DISTINCT FROM NULL` is `x IS NOT NULL`.
            if lexpr.is_null_const() || rexpr.is_null_const() {
                let other = if lexpr.is_null_const() { rexpr } else { lexpr };
                let arg = transform_expr_recurse(pstate, other)?;
                let argisrow = pstate.catalog.is_composite_type(expr_type(&arg));
                return Ok(Expr::NullTest(Box::new(NullTest {
                    arg,
                    nulltesttype: if negate {
                        NullTestType::IsNull
                    } else {
                        NullTestType::IsNotNull
                    },
                    argisrow,
                    location: Location(location),
                })));
            }
            let result = if is_raw_row(Some(lexpr)) && is_raw_row(Some(rexpr)) {
                let largs = transform_list(pstate, raw_row_args(lexpr))?;
                let rargs = transform_list(pstate, raw_row_args(rexpr))?;
                make_row_distinct_op(pstate, name, largs, rargs, location)?
            } else {
                let ltree = transform_expr_recurse(pstate, lexpr)?;
                let rtree = transform_expr_recurse(pstate, rexpr)?;
                make_distinct_op(pstate, name, ltree, rtree, location)?
            };
            Ok(if negate { make_not_expr(result, location) } else { result })
        }
        AExprKind::NullIf => {
            let lexpr = lexpr.ok_or_else(|| elog("NULLIF without left operand"))?;
            let ltree = transform_expr_recurse(pstate, lexpr)?;
            let rtree = transform_expr_recurse(pstate, rexpr)?;
            let result_type = expr_type(&ltree);
            let Expr::OpExpr(mut op) = make_op(pstate, name, Some(ltree), rtree, location)? else {
                return Err(elog("NULLIF comparison is not an operator"));
            };
            if op.opresulttype != BOOLOID {
                return Err(PgError::new(SqlState::DatatypeMismatch, "NULLIF requires = operator to yield boolean")
                    .at(location));
            }
            if op.opretset {
                return Err(PgError::new(SqlState::DatatypeMismatch, "NULLIF must not return a set").at(location));
            }
            op.opresulttype = result_type;
            Ok(Expr::NullIfExpr(op))
        }
        AExprKind::In => {
            let lexpr = lexpr.ok_or_else(|| elog("IN without left operand"))?;
            let RawExpr::List(items) = rexpr else {
                return Err(elog("IN list is not a list"));
            };
            transform_a_expr_in(pstate, name, lexpr, items, location)
        }
        AExprKind::Between | AExprKind::NotBetween | AExprKind::BetweenSym | AExprKind::NotBetweenSym => {
            let lexpr = lexpr.ok_or_else(|| elog("BETWEEN without left operand"))?;
            let RawExpr::List(bounds) = rexpr else {
                return Err(elog("BETWEEN bounds are not a list"));
            };
            let [lo, hi] = bounds.as_slice() else {
                return Err(elog("BETWEEN needs two bounds"));
            };
            let expanded = expand_between(kind, lexpr, lo, hi, location);
            transform_expr_recurse(pstate, &expanded)
        }
    }
}

fn expand_between(kind: AExprKind, a: &RawExpr, lo: &RawExpr, hi: &RawExpr, location: Option<usize>) -> RawExpr {
    let cmp = |op: &str, l: &RawExpr, r: &RawExpr| RawExpr::op(op, l.clone(), r.clone(), location);
    let bool_expr = |op: BoolExprType, args: Vec<RawExpr>| RawExpr::BoolExpr { op, args, location };
    let inside = |lo: &RawExpr, hi: &RawExpr| bool_expr(BoolExprType::And, vec![cmp(">=", a, lo), cmp("<=", a, hi)]);
    let outside = |lo: &RawExpr, hi: &RawExpr| bool_expr(BoolExprType::Or, vec![cmp("<", a, lo), cmp(">", a, hi)]);
    match kind {
        AExprKind::NotBetween => outside(lo, hi),
        AExprKind::BetweenSym => bool_expr(BoolExprType::Or, vec![inside(lo, hi), inside(hi, lo)]),
        AExprKind::NotBetweenSym => bool_expr(BoolExprType::And, vec![outside(lo, hi), outside(hi, lo)]),
        _ => inside(lo, hi),
    }
}

fn transform_a_expr_op(
    pstate: &mut ParseState<'_>,
    name: &[String],
    lexpr: Option<&RawExpr>,
    rexpr: &RawExpr,
    location: Option<usize>,
) -> PgResult<Expr> {
    if guc::transform_null_equals()
        && name.len() == 1
        && name[0] == "="
        && let Some(lexpr) = lexpr
        && (lexpr.is_null_const() || rexpr.is_null_const())
    {
        let other = if lexpr.is_null_const() { rexpr } else { lexpr };
        let arg = transform_expr_recurse(pstate, other)?;
        return Ok(make_null_test(arg, NullTestType::IsNull, location));
    }
    if let Some(lexpr) = lexpr
        && is_raw_row(Some(lexpr))
    {
        if is_raw_row(Some(rexpr)) {
            let largs = transform_list(pstate, raw_row_args(lexpr))?;
            let rargs = transform_list(pstate, raw_row_args(rexpr))?;
            return make_row_comparison_op(pstate, name, largs, rargs, location);
        }
        if let RawExpr::SubLink {
            sub_link_type: SubLinkType::Expr,
            subselect,
            location: sub_location,
            ..
        } = rexpr
        {
            return transform_sub_link(
                pstate,
                SubLinkType::RowCompare,
                Some(lexpr),
                name,
                subselect,
                sub_location.or(location),
            );
        }
    }
    let ltree = lexpr.map(|l| transform_expr_recurse(pstate, l)).transpose()?;
    let rtree = transform_expr_recurse(pstate, rexpr)?;
    make_op(pstate, name, ltree, rtree, location)
}

/// `x IN (a, b, c)`: constant items become one `= ANY (ARRAY[...])`, the
/// rest are compared one by one.
fn transform_a_expr_in(
    pstate: &mut ParseState<'_>,
    name: &[String],
    lexpr: &RawExpr,
    items: &[RawExpr],
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let use_or = name.len() == 1 && name[0] == "=";
    let lexpr_is_row = is_raw_row(Some(lexpr));
    let ltree = transform_expr_recurse(pstate, lexpr)?;

    let mut rvars = Vec::new();
    let mut rnonvars = Vec::new();
    for item in items {
        let rtree = transform_expr_recurse(pstate, item)?;
        if contain_vars_of_level(&rtree, 0) {
            rvars.push(rtree);
        } else {
            rnonvars.push(rtree);
        }
    }

    let mut result: Option<Expr> = None;
    let mut remaining = rvars;
    let row_typed = lexpr_is_row || matches!(ltree, Expr::RowExpr(_));
    if !row_typed && rnonvars.len() > 1 {
        let mut all: Vec<(Oid, Option<usize>)> = vec![(expr_type(&ltree), expr_location(&ltree))];
        all.extend(rnonvars.iter().map(|e| (expr_type(e), expr_location(e))));
        let scalar_type = select_common_type(catalog, &all, "IN")
            .ok()
            .filter(|&t| {
                let inputs: Vec<Oid> = all.iter().map(|&(typid, _)| typid).collect();
                let targets = vec![t; inputs.len()];
                can_coerce_type(catalog, &inputs, &targets, CoercionContext::Implicit)
            });
        let array_type = scalar_type.and_then(|t| catalog.array_type_of(t).map(|a| (t, a)));
        if let Some((scalar_type, array_type)) = array_type {
            trace!(element = scalar_type, "IN list folded into an array");
            let elements = rnonvars
                .into_iter()
                .map(|e| coerce_to_common_type(catalog, e, scalar_type, "IN"))
                .collect::<PgResult<Vec<_>>>()?;
            let array = Expr::ArrayExpr(Box::new(ArrayExpr {
                array_typeid: array_type,
                array_collid: INVALID_OID,
                element_typeid: scalar_type,
                elements,
                multidims: false,
                location: Location(location),
            }));
            result = Some(make_scalar_array_op(pstate, name, use_or, ltree.clone(), array, location)?);
        } else {
            remaining.extend(rnonvars);
        }
    } else {
        remaining.extend(rnonvars);
    }

    for rtree in remaining {
        let cmp = match (&ltree, &rtree) {
            (Expr::RowExpr(l), Expr::RowExpr(r)) => {
                make_row_comparison_op(pstate, name, l.args.clone(), r.args.clone(), location)?
            }
            _ => make_op(pstate, name, Some(ltree.clone()), rtree, location)?,
        };
        let cmp = coerce_to_boolean(catalog, cmp, "IN")?;
        result = Some(match result {
            None => cmp,
            Some(prev) => make_bool_expr(
                if use_or { BoolExprType::Or } else { BoolExprType::And },
                vec![prev, cmp],
                location,
            ),
        });
    }
    result.ok_or_else(|| elog("empty IN list"))
}

fn make_distinct_op(
    pstate: &mut ParseState<'_>,
    name: &[String],
    ltree: Expr,
    rtree: Expr,
    location: Option<usize>,
) -> PgResult<Expr> {
    let Expr::OpExpr(op) = make_op(pstate, name, Some(ltree), rtree, location)? else {
        return Err(elog("IS DISTINCT FROM comparison is not an operator"));
    };
    if op.opresulttype != BOOLOID {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            "IS DISTINCT FROM requires = operator to yield boolean",
        )
        .at(location));
    }
    if op.opretset {
        return Err(PgError::new(SqlState::DatatypeMismatch, "IS DISTINCT FROM must not return a set").at(location));
    }
    Ok(Expr::DistinctExpr(op))
}

fn make_row_distinct_op(
    pstate: &mut ParseState<'_>,
    name: &[String],
    largs: Vec<Expr>,
    rargs: Vec<Expr>,
    location: Option<usize>,
) -> PgResult<Expr> {
    check_row_lengths(&largs, &rargs, location)?;
    let mut result: Option<Expr> = None;
    for (l, r) in largs.into_iter().zip(rargs) {
        let cmp = make_distinct_op(pstate, name, l, r, location)?;
        result = Some(match result {
            None => cmp,
            Some(prev) => make_bool_expr(BoolExprType::Or, vec![prev, cmp], location),
        });
    }
    result.ok_or_else(|| PgError::new(SqlState::FeatureNotSupported, "cannot compare rows of zero length").at(location))
}

fn check_row_lengths(largs: &[Expr], rargs: &[Expr], location: Option<usize>) -> PgResult<()> {
    if largs.len() != rargs.len() {
        return Err(PgError::new(SqlState::SyntaxError, "unequal number of entries in row expressions").at(location));
    }
    if largs.is_empty() {
        return Err(PgError::new(SqlState::FeatureNotSupported, "cannot compare rows of zero length").at(location));
    }
    Ok(())
}

/// btree interpretations of an operator: `(family, strategy)` pairs. An
/// operator whose negator is a btree equality is read as `<>`.
fn btree_interpretation(pstate: &ParseState<'_>, opno: Oid) -> Vec<(Oid, i16)> {
    let catalog = pstate.catalog;
    let direct: Vec<(Oid, i16)> = catalog
        .opfamily_members(opno)
        .into_iter()
        .map(|m| (m.family, m.strategy))
        .collect();
    if !direct.is_empty() {
        return direct;
    }
    let Some(op) = catalog.operator_by_id(opno) else {
        return Vec::new();
    };
    if op.negator == INVALID_OID {
        return Vec::new();
    }
    catalog
        .opfamily_members(op.negator)
        .into_iter()
        .filter(|m| m.strategy == BT_EQUAL_STRATEGY)
        .map(|m| (m.family, ROWCOMPARE_NE))
        .collect()
}

/// Compare two rows column by column. `=` and `<>` become AND/OR of the
/// per-column comparisons; ordering operators become a RowCompareExpr.
pub fn make_row_comparison_op(
    pstate: &mut ParseState<'_>,
    name: &[String],
    largs: Vec<Expr>,
    rargs: Vec<Expr>,
    location: Option<usize>,
) -> PgResult<Expr> {
    check_row_lengths(&largs, &rargs, location)?;
    let catalog = pstate.catalog;
    let mut opexprs = Vec::with_capacity(largs.len());
    for (l, r) in largs.into_iter().zip(rargs) {
        let cmp = make_op(pstate, name, Some(l), r, location)?;
        let Expr::OpExpr(op) = cmp else {
            return Err(elog("row comparison is not an operator"));
        };
        if op.opresulttype != BOOLOID {
            return Err(PgError::new(
                SqlState::DatatypeMismatch,
                format!(
                    "row comparison operator must yield type boolean, not type {}",
                    catalog.format_type(op.opresulttype)
                ),
            )
            .at(location));
        }
        if op.opretset {
            return Err(
                PgError::new(SqlState::DatatypeMismatch, "row comparison operator must not return a set")
                    .at(location),
            );
        }
        opexprs.push(op);
    }
    if opexprs.len() == 1 {
        return opexprs
            .pop()
            .map(Expr::OpExpr)
            .ok_or_else(|| elog("row comparison lost its operator"));
    }

    let interpretations: Vec<Vec<(Oid, i16)>> =
        opexprs.iter().map(|op| btree_interpretation(pstate, op.opno)).collect();
    let common = (1..=ROWCOMPARE_NE)
        .find(|strategy| interpretations.iter().all(|column| column.iter().any(|(_, s)| s == strategy)))
        .ok_or_else(|| {
            PgError::new(
                SqlState::UndefinedFunction,
                format!("could not determine interpretation of row comparison operator {}", name.join(".")),
            )
            .with_hint("Row comparison operators must be associated with btree operator families.")
            .at(location)
        })?;
    let rctype = match common {
        1 => RowCompareType::Lt,
        2 => RowCompareType::Le,
        3 => RowCompareType::Eq,
        4 => RowCompareType::Ge,
        5 => RowCompareType::Gt,
        _ => RowCompareType::Ne,
    };
    match rctype {
        RowCompareType::Eq => {
            return Ok(make_bool_expr(BoolExprType::And, opexprs.into_iter().map(Expr::OpExpr).collect(), location));
        }
        RowCompareType::Ne => {
            return Ok(make_bool_expr(BoolExprType::Or, opexprs.into_iter().map(Expr::OpExpr).collect(), location));
        }
        _ => {}
    }
    let mut rc = RowCompareExpr {
        rctype,
        opnos: Vec::with_capacity(opexprs.len()),
        opfamilies: Vec::with_capacity(opexprs.len()),
        inputcollids: Vec::new(),
        largs: Vec::with_capacity(opexprs.len()),
        rargs: Vec::with_capacity(opexprs.len()),
        caches: Vec::with_capacity(opexprs.len()),
    };
    for (op, column) in opexprs.into_iter().zip(&interpretations) {
        let family = column
            .iter()
            .find(|(_, s)| *s == common)
            .map(|(f, _)| *f)
            .ok_or_else(|| elog("row comparison lost its operator family"))?;
        let OpExprArgs(l, r) = OpExprArgs::split(op.args)?;
        rc.opnos.push(op.opno);
        rc.opfamilies.push(family);
        rc.largs.push(l);
        rc.rargs.push(r);
        rc.caches.push(FnCache::default());
    }
    Ok(Expr::RowCompareExpr(Box::new(rc)))
}

struct OpExprArgs(Expr, Expr);

impl OpExprArgs {
    fn split(args: Vec<Expr>) -> PgResult<Self> {
        let mut args = args.into_iter();
        match (args.next(), args.next()) {
            (Some(l), Some(r)) => Ok(Self(l, r)),
            _ => Err(elog("binary operator with missing operand")),
        }
    }
}

fn transform_bool_expr(
    pstate: &mut ParseState<'_>,
    op: BoolExprType,
    args: &[RawExpr],
    location: Option<usize>,
) -> PgResult<Expr> {
    let construct = match op {
        BoolExprType::And => "AND",
        BoolExprType::Or => "OR",
        BoolExprType::Not => "NOT",
    };
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let arg = transform_expr_recurse(pstate, arg)?;
        out.push(coerce_to_boolean(pstate.catalog, arg, construct)?);
    }
    Ok(Expr::BoolExpr(Box::new(crate::nodes::primnodes::BoolExpr {
        boolop: op,
        args: out,
        location: Location(location),
    })))
}

fn transform_func_call(pstate: &mut ParseState<'_>, call: &FuncCall) -> PgResult<Expr> {
    let mut targs = Vec::with_capacity(call.args.len());
    let mut argnames: Vec<String> = Vec::new();
    for arg in &call.args {
        match arg {
            RawExpr::NamedArgExpr { arg, name, location } => {
                if argnames.contains(name) {
                    return Err(PgError::new(
                        SqlState::SyntaxError,
                        format!("argument name \"{name}\" used more than once"),
                    )
                    .at(*location));
                }
                targs.push(transform_expr_recurse(pstate, arg)?);
                argnames.push(name.clone());
            }
            other => {
                if !argnames.is_empty() {
                    return Err(PgError::new(
                        SqlState::SyntaxError,
                        "positional argument cannot follow named argument",
                    )
                    .at(other.location()));
                }
                let expr = transform_expr_recurse(pstate, other)?;
                // Drivers may pass output placeholders as void-typed params.
                if !call.agg_within_group && expr_type(&expr) == VOIDOID && matches!(expr, Expr::Param(_)) {
                    continue;
                }
                targs.push(expr);
            }
        }
    }
    parse_func_or_column(pstate, &call.funcname, targs, argnames, call, call.location)
}

fn transform_type_cast(
    pstate: &mut ParseState<'_>,
    arg: &RawExpr,
    type_name: &TypeName,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let (target, typmod) = typename_type_id_and_mod(catalog, type_name)?;
    let location = location.or(type_name.location);

    // An ARRAY[] constructor learns its element type from the cast.
    let expr = match arg {
        RawExpr::ArrayExpr { elements, location: array_location } => {
            let (base, base_typmod) = catalog.base_type_and_typmod(target, typmod);
            match catalog.element_type_of(base) {
                Some(elem) => transform_array_expr(pstate, elements, base, elem, base_typmod, *array_location)?,
                None => transform_expr_recurse(pstate, arg)?,
            }
        }
        // a literal cast to numeric must fit numeric, with no detour through float8
        RawExpr::AConst {
            value: AConstValue::Float(text),
            location: literal,
        } if catalog.base_type_and_typmod(target, typmod).0 == NUMERICOID => {
            numeric_in(text).map_err(|err| err.at(*literal))?;
            transform_expr_recurse(pstate, arg)?
        }
        _ => transform_expr_recurse(pstate, arg)?,
    };
    let input = expr_type(&expr);
    coerce_to_target_type(
        catalog,
        expr,
        input,
        target,
        typmod,
        CoercionContext::Explicit,
        CoercionForm::ExplicitCast,
        location,
    )?
    .ok_or_else(|| {
        PgError::new(
            SqlState::CannotCoerce,
            format!("cannot cast type {} to {}", catalog.format_type(input), catalog.format_type(target)),
        )
        .at(location)
    })
}

fn transform_collate_clause(
    pstate: &mut ParseState<'_>,
    arg: &RawExpr,
    collname: &[String],
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let mut arg = transform_expr_recurse(pstate, arg)?;
    let mut argtype = expr_type(&arg);
    if argtype == UNKNOWNOID {
        arg = coerce_type(
            catalog,
            arg,
            UNKNOWNOID,
            TEXTOID,
            -1,
            CoercionContext::Implicit,
            CoercionForm::ImplicitCast,
            location,
        )?;
        argtype = TEXTOID;
    }
    if catalog.type_collation(argtype) == INVALID_OID {
        return Err(PgError::new(
            SqlState::DatatypeMismatch,
            format!("collations are not supported by type {}", catalog.format_type(argtype)),
        )
        .at(location));
    }
    let name = collname.last().map_or("", String::as_str);
    let coll_oid = catalog.collation_by_name(name).ok_or_else(|| {
        PgError::new(
            SqlState::UndefinedObject,
            format!("collation \"{}\" for encoding \"UTF8\" does not exist", collname.join(".")),
        )
        .at(location)
    })?;
    Ok(Expr::CollateExpr(Box::new(CollateExpr {
        arg,
        coll_oid,
        location: Location(location),
    })))
}

fn transform_indirection(pstate: &mut ParseState<'_>, arg: &RawExpr, indirection: &[Indirection]) -> PgResult<Expr> {
    let location = arg.location();
    let mut result = transform_expr_recurse(pstate, arg)?;
    let mut subscripts: Vec<&Indirection> = Vec::new();
    for step in indirection {
        match step {
            Indirection::Subscript { .. } => subscripts.push(step),
            Indirection::Star => return Err(star_not_supported(location)),
            Indirection::Field(field) => {
                if !subscripts.is_empty() {
                    let container = expr_type(&result);
                    let typmod = expr_typmod(&result);
                    let sref = transform_container_subscripts(pstate, result, container, typmod, &subscripts, false)?;
                    result = Expr::SubscriptingRef(Box::new(sref));
                    subscripts.clear();
                }
                let call = FuncCall::new(vec![field.clone()], Vec::new(), location);
                result = parse_func_or_column(pstate, &call.funcname, vec![result], Vec::new(), &call, location)?;
            }
        }
    }
    if !subscripts.is_empty() {
        let container = expr_type(&result);
        let typmod = expr_typmod(&result);
        let sref = transform_container_subscripts(pstate, result, container, typmod, &subscripts, false)?;
        result = Expr::SubscriptingRef(Box::new(sref));
    }
    Ok(result)
}

fn transform_subscript(pstate: &mut ParseState<'_>, raw: &RawExpr) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let expr = transform_expr_recurse(pstate, raw)?;
    let input = expr_type(&expr);
    let location = expr_location(&expr);
    coerce_to_target_type(
        catalog,
        expr,
        input,
        INT4OID,
        -1,
        CoercionContext::Assignment,
        CoercionForm::ImplicitCast,
        location,
    )?
    .ok_or_else(|| PgError::new(SqlState::DatatypeMismatch, "array subscript must have type integer").at(location))
}

/// Array element or slice reference. For an assignment the caller fills in
/// `refassgnexpr`.
pub fn transform_container_subscripts(
    pstate: &mut ParseState<'_>,
    container: Expr,
    container_type: Oid,
    container_typmod: i32,
    indirection: &[&Indirection],
    is_assignment: bool,
) -> PgResult<SubscriptingRef> {
    let catalog = pstate.catalog;
    let location = expr_location(&container);
    let (base, base_typmod) = catalog.base_type_and_typmod(container_type, container_typmod);
    let elemtype = catalog.element_type_of(base).ok_or_else(|| {
        PgError::new(
            SqlState::DatatypeMismatch,
            format!(
                "cannot subscript type {} because it does not support subscripting",
                catalog.format_type(container_type)
            ),
        )
        .at(location)
    })?;
    if indirection.len() > MAXDIM {
        return Err(PgError::new(
            SqlState::ProgramLimitExceeded,
            format!(
                "number of array dimensions ({}) exceeds the maximum allowed ({MAXDIM})",
                indirection.len()
            ),
        )
        .at(location));
    }
    let is_slice = indirection
        .iter()
        .any(|step| matches!(step, Indirection::Subscript { is_slice: true, .. }));

    let mut upper = Vec::with_capacity(indirection.len());
    let mut lower = Vec::new();
    for step in indirection {
        let Indirection::Subscript { lidx, uidx, is_slice: step_slice } = step else {
            return Err(elog("non-subscript in subscript list"));
        };
        if is_slice {
            let lo = match lidx {
                Some(raw) => Some(transform_subscript(pstate, raw)?),
                // `a[1:2][3]` reads the plain subscript as `1:3`.
                None if !step_slice => Some(make_const(INT4OID, Datum::Int4(1))),
                None => None,
            };
            lower.push(lo);
        }
        let up = match uidx {
            Some(raw) => Some(transform_subscript(pstate, raw)?),
            None if is_slice => None,
            None => return Err(elog("array subscript without an index")),
        };
        upper.push(up);
    }
    let refrestype = if is_slice || is_assignment { base } else { elemtype };
    Ok(SubscriptingRef {
        refcontainertype: base,
        refelemtype: elemtype,
        refrestype,
        reftypmod: base_typmod,
        refcollid: INVALID_OID,
        refupperindexpr: upper,
        reflowerindexpr: lower,
        refexpr: container,
        refassgnexpr: None,
    })
}

/// `ARRAY[...]`. `array_type` and `element_type` are given when a cast
/// decides the result type; otherwise they are inferred from the elements.
pub fn transform_array_expr(
    pstate: &mut ParseState<'_>,
    elements: &[RawExpr],
    array_type: Oid,
    element_type: Oid,
    typmod: i32,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let mut multidims = false;
    let mut newelems = Vec::with_capacity(elements.len());
    for element in elements {
        let expr = match element {
            RawExpr::ArrayExpr {
                elements: sub,
                location: sub_location,
            } => {
                multidims = true;
                transform_array_expr(pstate, sub, array_type, element_type, typmod, *sub_location)?
            }
            other => {
                let expr = transform_expr_recurse(pstate, other)?;
                if !multidims && catalog.is_array_type(expr_type(&expr)) {
                    multidims = true;
                }
                expr
            }
        };
        newelems.push(expr);
    }

    let (array_type, element_type, coerce_to, coerce_hard) = if array_type != INVALID_OID {
        let target = if multidims { array_type } else { element_type };
        (array_type, element_type, target, true)
    } else {
        if newelems.is_empty() {
            return Err(PgError::new(SqlState::IndeterminateDatatype, "cannot determine type of empty array")
                .with_hint("Explicitly cast to the desired type, for example ARRAY[]::integer[].")
                .at(location));
        }
        let inputs: Vec<(Oid, Option<usize>)> =
            newelems.iter().map(|e| (expr_type(e), expr_location(e))).collect();
        let common = select_common_type(catalog, &inputs, "ARRAY")?;
        if multidims {
            let elem = catalog.element_type_of(common).ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedObject,
                    format!("could not find element type for data type {}", catalog.format_type(common)),
                )
                .at(location)
            })?;
            (common, elem, common, false)
        } else {
            let array = catalog.array_type_of(common).ok_or_else(|| {
                PgError::new(
                    SqlState::UndefinedObject,
                    format!("could not find array type for data type {}", catalog.format_type(common)),
                )
                .at(location)
            })?;
            (array, common, common, false)
        }
    };

    let mut coerced = Vec::with_capacity(newelems.len());
    for expr in newelems {
        let expr = if coerce_hard {
            let input = expr_type(&expr);
            let elem_location = expr_location(&expr);
            coerce_to_target_type(
                catalog,
                expr,
                input,
                coerce_to,
                typmod,
                CoercionContext::Explicit,
                CoercionForm::ExplicitCast,
                elem_location,
            )?
            .ok_or_else(|| {
                PgError::new(
                    SqlState::CannotCoerce,
                    format!("cannot cast type {} to {}", catalog.format_type(input), catalog.format_type(coerce_to)),
                )
                .at(elem_location)
            })?
        } else {
            coerce_to_common_type(catalog, expr, coerce_to, "ARRAY")?
        };
        coerced.push(expr);
    }
    Ok(Expr::ArrayExpr(Box::new(ArrayExpr {
        array_typeid: array_type,
        array_collid: INVALID_OID,
        element_typeid: element_type,
        elements: coerced,
        multidims,
        location: Location(location),
    })))
}

/// `ROW(...)` or `(a, b)`; `allow_default` admits DEFAULT fields for
/// multiple-column UPDATE sources.
pub fn transform_row_expr(
    pstate: &mut ParseState<'_>,
    args: &[RawExpr],
    explicit_row: bool,
    allow_default: bool,
    location: Option<usize>,
) -> PgResult<Expr> {
    let kind = pstate.expr_kind();
    let args = transform_expression_list(pstate, args, kind, allow_default)?;
    if args.len() > MAX_TUPLE_ATTRIBUTE_NUMBER {
        return Err(PgError::new(
            SqlState::ProgramLimitExceeded,
            format!("ROW expressions can have at most {MAX_TUPLE_ATTRIBUTE_NUMBER} entries"),
        )
        .at(location));
    }
    let colnames = (1..=args.len()).map(|i| format!("f{i}")).collect();
    Ok(Expr::RowExpr(Box::new(RowExpr {
        args,
        row_typeid: RECORDOID,
        row_format: if explicit_row {
            CoercionForm::ExplicitCall
        } else {
            CoercionForm::ImplicitCast
        },
        colnames,
        location: Location(location),
    })))
}

fn subquery_not_allowed(kind: ParseExprKind) -> Option<&'static str> {
    Some(match kind {
        ParseExprKind::CheckConstraint | ParseExprKind::DomainCheck => "cannot use subquery in check constraint",
        ParseExprKind::ColumnDefault | ParseExprKind::FunctionDefault => "cannot use subquery in DEFAULT expression",
        ParseExprKind::IndexExpression => "cannot use subquery in index expression",
        ParseExprKind::IndexPredicate => "cannot use subquery in index predicate",
        ParseExprKind::StatsExpression => "cannot use subquery in statistics expression",
        ParseExprKind::AlterColTransform => "cannot use subquery in transform expression",
        ParseExprKind::ExecuteParameter => "cannot use subquery in EXECUTE parameter",
        ParseExprKind::TriggerWhen => "cannot use subquery in trigger WHEN condition",
        ParseExprKind::PartitionBound => "cannot use subquery in partition bound",
        ParseExprKind::PartitionExpression => "cannot use subquery in partition key expression",
        ParseExprKind::CallArgument => "cannot use subquery in CALL argument",
        ParseExprKind::CopyWhere => "cannot use subquery in COPY FROM WHERE condition",
        ParseExprKind::GeneratedColumn => "cannot use subquery in column generation expression",
        _ => return None,
    })
}

fn transform_sub_link(
    pstate: &mut ParseState<'_>,
    sub_link_type: SubLinkType,
    testexpr: Option<&RawExpr>,
    oper_name: &[String],
    subselect: &SelectStmt,
    location: Option<usize>,
) -> PgResult<Expr> {
    if let Some(message) = subquery_not_allowed(pstate.expr_kind()) {
        return Err(PgError::new(SqlState::FeatureNotSupported, message).at(location));
    }
    pstate.level_mut().has_sub_links = true;
    let query = parse_sub_analyze(pstate, subselect)?;
    let visible: Vec<&TargetEntry> = query.visible_targets().collect();

    let (testexpr, result_type) = match sub_link_type {
        SubLinkType::Exists => (None, BOOLOID),
        SubLinkType::Expr | SubLinkType::Array => {
            let [tle] = visible.as_slice() else {
                return Err(PgError::new(SqlState::SyntaxError, "subquery must return only one column").at(location));
            };
            let coltype = expr_type(&tle.expr);
            let result_type = if sub_link_type == SubLinkType::Array {
                pstate.catalog.array_type_of(coltype).ok_or_else(|| {
                    PgError::new(
                        SqlState::UndefinedObject,
                        format!("could not find array type for data type {}", pstate.catalog.format_type(coltype)),
                    )
                    .at(location)
                })?
            } else {
                coltype
            };
            (None, result_type)
        }
        SubLinkType::MultiExpr => (None, RECORDOID),
        SubLinkType::Any | SubLinkType::All | SubLinkType::RowCompare => {
            let raw_left = testexpr.ok_or_else(|| elog("comparison sub-select without a left operand"))?;
            let left = transform_list(pstate, raw_row_args(raw_left))?;
            let right: Vec<Expr> = visible
                .iter()
                .map(|tle| {
                    Expr::Param(Param {
                        paramkind: ParamKind::Sublink,
                        paramid: i32::from(tle.resno),
                        paramtype: expr_type(&tle.expr),
                        paramtypmod: expr_typmod(&tle.expr),
                        paramcollid: expr_collation(&tle.expr),
                        location: Location(None),
                    })
                })
                .collect();
            if left.len() < right.len() {
                return Err(PgError::new(SqlState::SyntaxError, "subquery has too many columns").at(location));
            }
            if left.len() > right.len() {
                return Err(PgError::new(SqlState::SyntaxError, "subquery has too few columns").at(location));
            }
            let names: Vec<String> = if oper_name.is_empty() {
                vec!["=".to_string()]
            } else {
                oper_name.to_vec()
            };
            let test = make_row_comparison_op(pstate, &names, left, right, location)?;
            (Some(test), BOOLOID)
        }
    };
    Ok(Expr::SubLink(Box::new(SubLink {
        sub_link_type,
        sub_link_id: 0,
        testexpr,
        oper_name: oper_name.to_vec(),
        subselect: Box::new(query),
        result_type,
        location: Location(location),
    })))
}

fn reject_srfs(pstate: &ParseState<'_>, before: usize, construct: &str, location: Option<usize>) -> PgResult<()> {
    if pstate.srf_count() != before {
        return Err(PgError::new(
            SqlState::FeatureNotSupported,
            format!("set-returning functions are not allowed in {construct}"),
        )
        .with_hint("You might be able to move the set-returning function into a LATERAL FROM item.")
        .at(location));
    }
    Ok(())
}

fn transform_case_expr(
    pstate: &mut ParseState<'_>,
    arg: Option<&RawExpr>,
    whens: &[RawCaseWhen],
    defresult: Option<&RawExpr>,
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let srfs_before = pstate.srf_count();

    let arg = match arg {
        Some(raw) => {
            let mut arg = transform_expr_recurse(pstate, raw)?;
            if expr_type(&arg) == UNKNOWNOID {
                arg = coerce_to_common_type(catalog, arg, TEXTOID, "CASE")?;
            }
            assign_expr_collations(catalog, &mut arg)?;
            Some(arg)
        }
        None => None,
    };
    let placeholder = arg.as_ref().map(|arg| {
        Expr::CaseTestExpr(CaseTestExpr {
            type_id: expr_type(arg),
            type_mod: expr_typmod(arg),
            collation: expr_collation(arg),
        })
    });

    let mut conditions = Vec::with_capacity(whens.len());
    let mut results = Vec::with_capacity(whens.len());
    for when in whens {
        let cond = transform_expr_recurse(pstate, &when.expr)?;
        let cond = match &placeholder {
            Some(test) => make_op(pstate, &["=".to_string()], Some(test.clone()), cond, when.location)?,
            None => cond,
        };
        conditions.push((coerce_to_boolean(catalog, cond, "CASE/WHEN")?, when.location));
        results.push(transform_expr_recurse(pstate, &when.result)?);
    }
    let defresult = match defresult {
        Some(raw) => transform_expr_recurse(pstate, raw)?,
        None => make_null_literal(location),
    };

    // The default goes first so that it decides ties like PostgreSQL does.
    let mut inputs: Vec<(Oid, Option<usize>)> = vec![(expr_type(&defresult), expr_location(&defresult))];
    inputs.extend(results.iter().map(|r| (expr_type(r), expr_location(r))));
    let casetype = select_common_type(catalog, &inputs, "CASE")?;
    let defresult = coerce_to_common_type(catalog, defresult, casetype, "CASE")?;
    let mut args = Vec::with_capacity(results.len());
    for ((expr, when_location), result) in conditions.into_iter().zip(results) {
        args.push(CaseWhen {
            expr,
            result: coerce_to_common_type(catalog, result, casetype, "CASE")?,
            location: Location(when_location),
        });
    }
    reject_srfs(pstate, srfs_before, "CASE", location)?;
    Ok(Expr::CaseExpr(Box::new(CaseExpr {
        casetype,
        casecollid: INVALID_OID,
        arg,
        args,
        defresult,
        location: Location(location),
    })))
}

fn make_null_literal(location: Option<usize>) -> Expr {
    Expr::Const(crate::nodes::primnodes::Const {
        consttype: UNKNOWNOID,
        consttypmod: -1,
        constcollid: INVALID_OID,
        constvalue: Datum::Null,
        location: Location(location),
    })
}

fn transform_coalesce_expr(pstate: &mut ParseState<'_>, args: &[RawExpr], location: Option<usize>) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let srfs_before = pstate.srf_count();
    let args = transform_list(pstate, args)?;
    let inputs: Vec<(Oid, Option<usize>)> = args.iter().map(|a| (expr_type(a), expr_location(a))).collect();
    let coalescetype = select_common_type(catalog, &inputs, "COALESCE")?;
    let args = args
        .into_iter()
        .map(|arg| coerce_to_common_type(catalog, arg, coalescetype, "COALESCE"))
        .collect::<PgResult<Vec<_>>>()?;
    reject_srfs(pstate, srfs_before, "COALESCE", location)?;
    Ok(Expr::CoalesceExpr(Box::new(CoalesceExpr {
        coalescetype,
        coalescecollid: INVALID_OID,
        args,
        location: Location(location),
    })))
}

fn transform_min_max_expr(
    pstate: &mut ParseState<'_>,
    op: MinMaxOp,
    args: &[RawExpr],
    location: Option<usize>,
) -> PgResult<Expr> {
    let catalog = pstate.catalog;
    let funcname = match op {
        MinMaxOp::Greatest => "GREATEST",
        MinMaxOp::Least => "LEAST",
    };
    let srfs_before = pstate.srf_count();
    let args = transform_list(pstate, args)?;
    let inputs: Vec<(Oid, Option<usize>)> = args.iter().map(|a| (expr_type(a), expr_location(a))).collect();
    let minmaxtype = select_common_type(catalog, &inputs, funcname)?;
    let args = args
        .into_iter()
        .map(|arg| coerce_to_common_type(catalog, arg, minmaxtype, funcname))
        .collect::<PgResult<Vec<_>>>()?;
    reject_srfs(pstate, srfs_before, funcname, location)?;
    Ok(Expr::MinMaxExpr(Box::new(MinMaxExpr {
        minmaxtype,
        minmaxcollid: INVALID_OID,
        inputcollid: INVALID_OID,
        op,
        args,
        location: Location(location),
        cache: FnCache::default(),
    })))
}

/// One column of `(a, b, ...) = source` in UPDATE SET. The first column
/// analyzes the source and stashes it; later columns read from the stash.
fn transform_multi_assign_ref(
    pstate: &mut ParseState<'_>,
    source: &RawExpr,
    colno: usize,
    ncolumns: usize,
) -> PgResult<Expr> {
    let location = source.location();
    if colno == 1 {
        let mismatch = || {
            PgError::new(SqlState::SyntaxError, "number of columns does not match number of values").at(location)
        };
        let tle_expr = match source {
            RawExpr::SubLink {
                sub_link_type: SubLinkType::Expr,
                subselect,
                location: sub_location,
                ..
            } => {
                let mut sublink =
                    transform_sub_link(pstate, SubLinkType::MultiExpr, None, &[], subselect, *sub_location)?;
                if let Expr::SubLink(s) = &mut sublink {
                    if s.subselect.visible_targets().count() != ncolumns {
                        return Err(mismatch());
                    }
                    s.sub_link_id = pstate.level().multiassign_exprs.len() as i32 + 1;
                }
                sublink
            }
            RawExpr::RowExpr {
                args,
                explicit_row,
                location: row_location,
            } => {
                let row = transform_row_expr(pstate, args, *explicit_row, true, *row_location)?;
                if let Expr::RowExpr(r) = &row
                    && r.args.len() != ncolumns
                {
                    return Err(mismatch());
                }
                row
            }
            _ => {
                return Err(PgError::new(
                    SqlState::SyntaxError,
                    "source for a multiple-column UPDATE item must be a sub-SELECT or ROW() expression",
                )
                .at(location));
            }
        };
        pstate
            .level_mut()
            .multiassign_exprs
            .push(TargetEntry::new(tle_expr, 0, None, true));
    }

    let stashed = pstate
        .level()
        .multiassign_exprs
        .last()
        .map(|tle| tle.expr.clone())
        .ok_or_else(|| elog("multiple-assignment source is missing"))?;
    match stashed {
        Expr::SubLink(sublink) => {
            let tle = sublink
                .subselect
                .visible_targets()
                .nth(colno - 1)
                .ok_or_else(|| elog("multiple-assignment column out of range"))?;
            Ok(Expr::Param(Param {
                paramkind: ParamKind::Multiexpr,
                paramid: (sublink.sub_link_id << 16) | colno as i32,
                paramtype: expr_type(&tle.expr),
                paramtypmod: expr_typmod(&tle.expr),
                paramcollid: expr_collation(&tle.expr),
                location: Location(location),
            }))
        }
        Expr::RowExpr(row) => {
            let value = row
                .args
                .get(colno - 1)
                .cloned()
                .ok_or_else(|| elog("multiple-assignment column out of range"))?;
            // A ROW source is consumed column by column and not kept.
            if colno == ncolumns {
                pstate.level_mut().multiassign_exprs.pop();
            }
            Ok(value)
        }
        _ => Err(elog("unexpected multiple-assignment source")),
    }
}

/// Resolve any remaining `unknown` result to text.
pub fn resolve_unknown_to_text(pstate: &ParseState<'_>, expr: Expr) -> PgResult<Expr> {
    if expr_type(&expr) != UNKNOWNOID {
        return Ok(expr);
    }
    let location = expr_location(&expr);
    coerce_type(
        pstate.catalog,
        expr,
        UNKNOWNOID,
        TEXTOID,
        -1,
        CoercionContext::Implicit,
        CoercionForm::ImplicitCast,
        location,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::catalog::pg_type::{INT4ARRAYOID, INT8OID};
    use crate::parser::gram::parse_expression;

    fn analyze(catalog: &Catalog, sql: &str) -> PgResult<Expr> {
        let raw = parse_expression(sql)?;
        let mut pstate = ParseState::new(catalog, sql);
        transform_expr(&mut pstate, &raw, ParseExprKind::SelectTarget)
    }

    #[test]
    fn integer_addition_is_int4() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "1 + 2").unwrap();
        assert_eq!(expr_type(&expr), INT4OID);
        assert!(matches!(expr, Expr::OpExpr(_)));
    }

    #[test]
    fn row_equality_becomes_and_of_columns() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "(1, 2) = (1, 3)").unwrap();
        let Expr::BoolExpr(b) = expr else { panic!("expected BoolExpr") };
        assert_eq!(b.boolop, BoolExprType::And);
        assert_eq!(b.args.len(), 2);
        let expr = analyze(&catalog, "(1, 2) < (1, 3)").unwrap();
        let Expr::RowCompareExpr(rc) = expr else { panic!("expected RowCompareExpr") };
        assert_eq!(rc.rctype, RowCompareType::Lt);
    }

    #[test]
    fn row_length_mismatch_is_rejected() {
        let catalog = Catalog::default();
        let err = analyze(&catalog, "(1, 2) = (1, 2, 3)").unwrap_err();
        assert_eq!(err.message, "unequal number of entries in row expressions");
    }

    #[test]
    fn constant_in_list_folds_into_array() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "3 IN (1, 2, 3)").unwrap();
        let Expr::ScalarArrayOpExpr(saop) = expr else { panic!("expected ScalarArrayOpExpr") };
        assert!(saop.use_or);
        assert_eq!(expr_type(&saop.args[1]), INT4ARRAYOID);
        let expr = analyze(&catalog, "3 NOT IN (1, 2)").unwrap();
        let Expr::ScalarArrayOpExpr(saop) = expr else { panic!("expected ScalarArrayOpExpr") };
        assert!(!saop.use_or);
    }

    #[test]
    fn case_results_share_a_type() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "CASE WHEN true THEN 'a' ELSE NULL END").unwrap();
        assert_eq!(expr_type(&expr), TEXTOID);
        let err = analyze(&catalog, "CASE WHEN true THEN 1 ELSE 'x'::text END").unwrap_err();
        assert_eq!(err.message, "CASE types text and integer cannot be matched");
    }

    #[test]
    fn distinct_from_null_is_a_null_test() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "1 IS DISTINCT FROM NULL").unwrap();
        let Expr::NullTest(nt) = expr else { panic!("expected NullTest") };
        assert_eq!(nt.nulltesttype, NullTestType::IsNotNull);
    }

    #[test]
    fn array_literals_infer_their_type() {
        let catalog = Catalog::default();
        let expr = analyze(&catalog, "ARRAY[1, 2::int8]").unwrap();
        let Expr::ArrayExpr(arr) = expr else { panic!("expected ArrayExpr") };
        assert_eq!(arr.element_typeid, INT8OID);
        let err = analyze(&catalog, "ARRAY[]").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::IndeterminateDatatype);
    }

    #[test]
    fn unknown_column_reports_its_name() {
        let catalog = Catalog::default();
        let err = analyze(&catalog, "nosuch + 1").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedColumn);
        assert_eq!(err.message, "column \"nosuch\" does not exist");
        let err = analyze(&catalog, "t.x").unwrap_err();
        assert_eq!(err.message, "missing FROM-clause entry for table \"t\"");
    }

    #[test]
    fn missing_parameter_is_reported() {
        let catalog = Catalog::default();
        let err = analyze(&catalog, "$1").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::UndefinedParameter);
    }
}
